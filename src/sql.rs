use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::directory::{ResourceKind, Role};
use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertUser {
        id: Ulid,
        display_name: String,
        role: Role,
    },
    UpsertResource {
        id: Ulid,
        name: String,
        kind: ResourceKind,
        capacity: u32,
        location: Option<String>,
        active: bool,
    },
    InsertAvailability {
        window: WeeklyAvailability,
    },
    DeleteAvailability {
        id: Ulid,
        professor_id: Ulid,
    },
    InsertTutoringBooking {
        request: TutoringRequest,
    },
    InsertResourceBooking {
        id: Ulid,
        resource_id: Ulid,
        user_id: Ulid,
        reserved_at: Ms,
    },
    DeleteResourceBooking {
        id: Ulid,
        actor_id: Ulid,
    },
    SetBookingStatus {
        booking_id: Ulid,
        status: BookingStatus,
        actor_id: Ulid,
    },
    Reschedule {
        booking_id: Ulid,
        new_id: Ulid,
        actor_id: Ulid,
        start: Ms,
        end: Ms,
    },
    SelectAvailability {
        professor_id: Ulid,
        include_inactive: bool,
    },
    SelectSlots {
        professor_id: Ulid,
        horizon_days: Option<u32>,
    },
    SelectTutoringBookings {
        filter: BookingFilter,
    },
    SelectResourceBookings {
        filter: BookingFilter,
    },
}

/// Exactly one statement, as the extended protocol carries.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut commands = parse_batch(sql)?;
    if commands.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements in one prepared query".into()));
    }
    commands.pop().ok_or(SqlError::Empty)
}

/// Every statement of a simple query, in order. Nothing is returned unless
/// all of them parse.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::Unsupported("query too long".into()));
    }
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// FROM table of a SELECT, used to describe result columns before parameters are bound.
pub fn select_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let Statement::Query(query) = stmts.first()? else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row addressed by column name. Without an explicit column
/// list, values are matched against the table's canonical column order.
struct Row<'a> {
    table: &'static str,
    names: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn new(table: &'static str, canonical: &[&str], insert: &ast::Insert, values: &'a [Expr]) -> Result<Self, SqlError> {
        let names: Vec<String> = if insert.columns.is_empty() {
            canonical.iter().take(values.len()).map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if names.len() != values.len() {
            return Err(SqlError::WrongArity(table, names.len(), values.len()));
        }
        Ok(Self { table, names, values })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        let values = self.values;
        self.names
            .iter()
            .position(|n| n == column)
            .map(|i| &values[i])
            .filter(|e| !is_null(e))
    }

    fn req(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }
}

const USER_COLUMNS: &[&str] = &["id", "display_name", "role"];
const RESOURCE_COLUMNS: &[&str] = &["id", "name", "kind", "capacity", "location", "active"];
const AVAILABILITY_COLUMNS: &[&str] = &[
    "id",
    "professor_id",
    "subject",
    "modality",
    "location",
    "day_of_week",
    "start_time",
    "end_time",
];
const TUTORING_COLUMNS: &[&str] = &[
    "id",
    "professor_id",
    "student_id",
    "start",
    "end",
    "topic",
    "description",
    "modality",
    "location",
];
const RESERVATION_COLUMNS: &[&str] = &["id", "resource_id", "user_id", "reserved_at"];
const STATUS_COLUMNS: &[&str] = &["booking_id", "status", "actor_id"];
const RESCHEDULE_COLUMNS: &[&str] = &["booking_id", "new_id", "actor_id", "start", "end"];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_single_row(insert)?;

    match table.as_str() {
        "users" => {
            let row = Row::new("users", USER_COLUMNS, insert, &values)?;
            Ok(Command::UpsertUser {
                id: parse_ulid(row.req("id")?)?,
                display_name: parse_string(row.req("display_name")?)?,
                role: parse_enum(row.req("role")?, "role", Role::parse)?,
            })
        }
        "resources" => {
            let row = Row::new("resources", RESOURCE_COLUMNS, insert, &values)?;
            Ok(Command::UpsertResource {
                id: parse_ulid(row.req("id")?)?,
                name: parse_string(row.req("name")?)?,
                kind: parse_enum(row.req("kind")?, "kind", ResourceKind::parse)?,
                capacity: row.get("capacity").map(parse_u32).transpose()?.unwrap_or(1),
                location: row.get("location").map(parse_string).transpose()?,
                active: row.get("active").map(parse_bool).transpose()?.unwrap_or(true),
            })
        }
        "availability" => {
            let row = Row::new("availability", AVAILABILITY_COLUMNS, insert, &values)?;
            Ok(Command::InsertAvailability {
                window: WeeklyAvailability {
                    id: parse_ulid(row.req("id")?)?,
                    professor_id: parse_ulid(row.req("professor_id")?)?,
                    subject: parse_string(row.req("subject")?)?,
                    modality: row
                        .get("modality")
                        .map(|e| parse_enum(e, "modality", Modality::parse))
                        .transpose()?
                        .unwrap_or(Modality::InPerson),
                    location: row.get("location").map(parse_string).transpose()?,
                    day_of_week: parse_string(row.req("day_of_week")?)?,
                    start_time: parse_string(row.req("start_time")?)?,
                    end_time: parse_string(row.req("end_time")?)?,
                    active: true,
                },
            })
        }
        "tutoring_bookings" => {
            let row = Row::new("tutoring_bookings", TUTORING_COLUMNS, insert, &values)?;
            Ok(Command::InsertTutoringBooking {
                request: TutoringRequest {
                    id: parse_ulid(row.req("id")?)?,
                    professor_id: parse_ulid(row.req("professor_id")?)?,
                    student_id: parse_ulid(row.req("student_id")?)?,
                    start: parse_i64(row.req("start")?)?,
                    end: parse_i64(row.req("end")?)?,
                    details: BookingDetails {
                        topic: parse_string(row.req("topic")?)?,
                        description: row.get("description").map(parse_string).transpose()?,
                        modality: row
                            .get("modality")
                            .map(|e| parse_enum(e, "modality", Modality::parse))
                            .transpose()?
                            .unwrap_or(Modality::InPerson),
                        location: row.get("location").map(parse_string).transpose()?,
                    },
                },
            })
        }
        "resource_bookings" => {
            let row = Row::new("resource_bookings", RESERVATION_COLUMNS, insert, &values)?;
            Ok(Command::InsertResourceBooking {
                id: parse_ulid(row.req("id")?)?,
                resource_id: parse_ulid(row.req("resource_id")?)?,
                user_id: parse_ulid(row.req("user_id")?)?,
                reserved_at: parse_i64(row.req("reserved_at")?)?,
            })
        }
        "booking_status" => {
            let row = Row::new("booking_status", STATUS_COLUMNS, insert, &values)?;
            Ok(Command::SetBookingStatus {
                booking_id: parse_ulid(row.req("booking_id")?)?,
                status: parse_enum(row.req("status")?, "status", BookingStatus::parse)?,
                actor_id: parse_ulid(row.req("actor_id")?)?,
            })
        }
        "reschedules" => {
            let row = Row::new("reschedules", RESCHEDULE_COLUMNS, insert, &values)?;
            Ok(Command::Reschedule {
                booking_id: parse_ulid(row.req("booking_id")?)?,
                new_id: parse_ulid(row.req("new_id")?)?,
                actor_id: parse_ulid(row.req("actor_id")?)?,
                start: parse_i64(row.req("start")?)?,
                end: parse_i64(row.req("end")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "availability" => {
            filters.allow(&[("id", BinaryOperator::Eq), ("professor_id", BinaryOperator::Eq)])?;
            Ok(Command::DeleteAvailability {
            id: filters.ulid("id")?.ok_or(SqlError::MissingFilter("id"))?,
            professor_id: filters
                .ulid("professor_id")?
                .ok_or(SqlError::MissingFilter("professor_id"))?,
            })
        }
        "resource_bookings" => {
            filters.allow(&[("id", BinaryOperator::Eq), ("actor_id", BinaryOperator::Eq)])?;
            Ok(Command::DeleteResourceBooking {
                id: filters.ulid("id")?.ok_or(SqlError::MissingFilter("id"))?,
                actor_id: filters.ulid("actor_id")?.ok_or(SqlError::MissingFilter("actor_id"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "availability" => {
            filters.allow(&[("professor_id", BinaryOperator::Eq), ("active", BinaryOperator::Eq)])?;
            let include_inactive = match filters.bool_eq("active")? {
                None => true,
                Some(true) => false,
                Some(false) => return Err(SqlError::Unsupported("filter active = false".into())),
            };
            Ok(Command::SelectAvailability {
                professor_id: filters
                    .ulid("professor_id")?
                    .ok_or(SqlError::MissingFilter("professor_id"))?,
                include_inactive,
            })
        }
        "slots" => {
            filters.allow(&[("professor_id", BinaryOperator::Eq), ("horizon_days", BinaryOperator::Eq)])?;
            Ok(Command::SelectSlots {
                professor_id: filters
                    .ulid("professor_id")?
                    .ok_or(SqlError::MissingFilter("professor_id"))?,
                horizon_days: filters.find("horizon_days", &BinaryOperator::Eq).map(parse_u32).transpose()?,
            })
        }
        "tutoring_bookings" => {
            filters.allow(&[
                ("professor_id", BinaryOperator::Eq),
                ("student_id", BinaryOperator::Eq),
                ("start", BinaryOperator::GtEq),
                ("end", BinaryOperator::LtEq),
                ("status", BinaryOperator::NotEq),
            ])?;
            let scope = match (filters.ulid("professor_id")?, filters.ulid("student_id")?) {
                (Some(id), None) => BookingScope::Professor(id),
                (None, Some(id)) => BookingScope::Student(id),
                (Some(_), Some(_)) => {
                    return Err(SqlError::Unsupported("filter on both professor_id and student_id".into()));
                }
                (None, None) => return Err(SqlError::MissingFilter("professor_id or student_id")),
            };
            Ok(Command::SelectTutoringBookings {
                filter: filters.booking_filter(scope, "start", "end")?,
            })
        }
        "resource_bookings" => {
            filters.allow(&[
                ("resource_id", BinaryOperator::Eq),
                ("user_id", BinaryOperator::Eq),
                ("reserved_at", BinaryOperator::GtEq),
                ("reserved_at", BinaryOperator::LtEq),
                ("status", BinaryOperator::NotEq),
            ])?;
            let scope = match (filters.ulid("resource_id")?, filters.ulid("user_id")?) {
                (Some(id), None) => BookingScope::Resource(id),
                (None, Some(id)) => BookingScope::User(id),
                (Some(_), Some(_)) => {
                    return Err(SqlError::Unsupported("filter on both resource_id and user_id".into()));
                }
                (None, None) => return Err(SqlError::MissingFilter("resource_id or user_id")),
            };
            Ok(Command::SelectResourceBookings {
                filter: filters.booking_filter(scope, "reserved_at", "reserved_at")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column <op> literal` terms of an AND-only WHERE clause.
struct Filters {
    terms: Vec<(String, BinaryOperator, Expr)>,
}

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    /// Every term must be one of `allowed`, and appear once.
    fn allow(&self, allowed: &[(&str, BinaryOperator)]) -> Result<(), SqlError> {
        for (i, (column, op, _)) in self.terms.iter().enumerate() {
            if !allowed.iter().any(|(c, o)| c == column && o == op) {
                return Err(SqlError::Unsupported(format!("filter {column} {op}")));
            }
            if self.terms[..i].iter().any(|(c, o, _)| c == column && o == op) {
                return Err(SqlError::Unsupported(format!("repeated filter {column} {op}")));
            }
        }
        Ok(())
    }

    fn find(&self, column: &str, op: &BinaryOperator) -> Option<&Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && o == op)
            .map(|(_, _, e)| e)
    }

    fn ulid(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.find(column, &BinaryOperator::Eq).map(parse_ulid).transpose()
    }

    fn bool_eq(&self, column: &str) -> Result<Option<bool>, SqlError> {
        self.find(column, &BinaryOperator::Eq).map(parse_bool).transpose()
    }

    /// `<from_col> >= a AND <to_col> <= b AND status <> 'cancelled'`, each optional.
    fn booking_filter(&self, scope: BookingScope, from_col: &str, to_col: &str) -> Result<BookingFilter, SqlError> {
        let range = TimeRange {
            from: self.find(from_col, &BinaryOperator::GtEq).map(parse_i64).transpose()?,
            to: self.find(to_col, &BinaryOperator::LtEq).map(parse_i64).transpose()?,
        };
        let mut filter = BookingFilter::new(scope).with_range(range);
        if let Some(expr) = self.find("status", &BinaryOperator::NotEq) {
            if parse_enum(expr, "status", BookingStatus::parse)? != BookingStatus::Cancelled {
                return Err(SqlError::Unsupported("only status <> 'cancelled' is supported".into()));
            }
            filter = filter.active_only();
        }
        Ok(filter)
    }
}

fn collect_terms(expr: &Expr, terms: &mut Vec<(String, BinaryOperator, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_terms(inner, terms),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_terms(left, terms)?;
            collect_terms(right, terms)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            terms.push((column, op.clone(), right.as_ref().clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into())),
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_single_row(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_enum<T>(expr: &Expr, column: &'static str, parse: fn(&str) -> Option<T>) -> Result<T, SqlError> {
    let raw = parse_string(expr)?;
    parse(&raw).ok_or(SqlError::BadValue { column, value: raw })
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => {
                s.parse().map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid {column}: {value:?}")]
    BadValue { column: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_user() {
        let sql = format!("INSERT INTO users (id, display_name, role) VALUES ('{A}', 'Ada Lovelace', 'profesor')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpsertUser {
                id: ulid(A),
                display_name: "Ada Lovelace".into(),
                role: Role::Professor,
            }
        );
    }

    #[test]
    fn parse_insert_resource_defaults() {
        let sql = format!("INSERT INTO resources (id, name, kind) VALUES ('{A}', 'Lab 1', 'compute_lab')");
        match parse_sql(&sql).unwrap() {
            Command::UpsertResource { capacity, location, active, kind, .. } => {
                assert_eq!(capacity, 1);
                assert_eq!(location, None);
                assert!(active);
                assert_eq!(kind, ResourceKind::ComputeLab);
            }
            other => panic!("expected UpsertResource, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_availability_positional() {
        let sql = format!(
            "INSERT INTO availability VALUES ('{A}', '{B}', 'Algebra', 'online', NULL, 'lunes', '09:00', '11:00')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertAvailability { window } => {
                assert_eq!(window.id, ulid(A));
                assert_eq!(window.professor_id, ulid(B));
                assert_eq!(window.modality, Modality::Online);
                assert_eq!(window.location, None);
                assert_eq!(window.day_of_week, "lunes");
                assert_eq!(window.end_time, "11:00");
                assert!(window.active);
            }
            other => panic!("expected InsertAvailability, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_tutoring_by_column_name() {
        let sql = format!(
            r#"INSERT INTO tutoring_bookings (topic, "end", start, student_id, professor_id, id) VALUES ('Integrals', 2000, 1000, '{B}', '{A}', '{B}')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertTutoringBooking { request } => {
                assert_eq!(request.professor_id, ulid(A));
                assert_eq!(request.student_id, ulid(B));
                assert_eq!((request.start, request.end), (1000, 2000));
                assert_eq!(request.details.topic, "Integrals");
                assert_eq!(request.details.modality, Modality::InPerson);
                assert_eq!(request.details.description, None);
            }
            other => panic!("expected InsertTutoringBooking, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_column() {
        let sql = format!("INSERT INTO tutoring_bookings (id, professor_id) VALUES ('{A}', '{A}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("tutoring_bookings", "student_id"))
        ));
    }

    #[test]
    fn arity_mismatch() {
        let sql = format!("INSERT INTO resource_bookings (id, resource_id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("resource_bookings", 2, 1))));
    }

    #[test]
    fn parse_status_change() {
        let sql = format!("INSERT INTO booking_status (booking_id, status, actor_id) VALUES ('{A}', 'confirmed', '{B}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetBookingStatus {
                booking_id: ulid(A),
                status: BookingStatus::Confirmed,
                actor_id: ulid(B),
            }
        );
        let bad = format!("INSERT INTO booking_status VALUES ('{A}', 'finished', '{B}')");
        assert!(matches!(parse_sql(&bad), Err(SqlError::BadValue { column: "status", .. })));
    }

    #[test]
    fn parse_reschedule() {
        let sql = format!(r#"INSERT INTO reschedules (booking_id, new_id, actor_id, start, "end") VALUES ('{A}', '{B}', '{A}', 5000, 6000)"#);
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::Reschedule { start: 5000, end: 6000, .. }
        ));
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM availability WHERE id = '{A}' AND professor_id = '{B}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::DeleteAvailability { id: ulid(A), professor_id: ulid(B) }
        );
        let sql = format!("DELETE FROM resource_bookings WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("actor_id"))));
    }

    #[test]
    fn parse_select_slots() {
        let sql = format!("SELECT * FROM slots WHERE professor_id = '{A}' AND horizon_days = 7");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots { professor_id: ulid(A), horizon_days: Some(7) }
        );
        let sql = format!("SELECT * FROM slots WHERE professor_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots { professor_id: ulid(A), horizon_days: None }
        );
    }

    #[test]
    fn parse_select_availability_active_only() {
        let sql = format!("SELECT * FROM availability WHERE professor_id = '{A}' AND active = true");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability { professor_id: ulid(A), include_inactive: false }
        );
    }

    #[test]
    fn parse_select_tutoring_range() {
        let sql = format!(
            r#"SELECT * FROM tutoring_bookings WHERE student_id = '{A}' AND start >= 1000 AND "end" <= 9000 AND status <> 'cancelled'"#
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectTutoringBookings { filter } => {
                assert_eq!(filter.scope, BookingScope::Student(ulid(A)));
                assert_eq!(filter.range, TimeRange { from: Some(1000), to: Some(9000) });
                assert!(!filter.include_cancelled);
            }
            other => panic!("expected SelectTutoringBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_resource_bookings_needs_scope() {
        assert!(matches!(
            parse_sql("SELECT * FROM resource_bookings"),
            Err(SqlError::MissingFilter(_))
        ));
        let sql = format!("SELECT * FROM resource_bookings WHERE user_id = '{B}'");
        match parse_sql(&sql).unwrap() {
            Command::SelectResourceBookings { filter } => {
                assert_eq!(filter.scope, BookingScope::User(ulid(B)));
                assert!(filter.include_cancelled);
            }
            other => panic!("expected SelectResourceBookings, got {other:?}"),
        }
    }

    #[test]
    fn bad_ulid_rejected() {
        let sql = "SELECT * FROM slots WHERE professor_id = 'not-a-ulid'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn unsupported_filters_rejected() {
        let rejected = [
            format!("SELECT * FROM tutoring_bookings WHERE professor_id = '{A}' AND status = 'pending'"),
            format!("SELECT * FROM tutoring_bookings WHERE professor_id = '{A}' AND student_id = '{B}'"),
            format!("SELECT * FROM tutoring_bookings WHERE student_id = '{A}' AND status <> 'pending'"),
            format!("SELECT * FROM tutoring_bookings WHERE student_id = '{A}' AND start > 1000"),
            format!("SELECT * FROM resource_bookings WHERE user_id = '{A}' AND resource_id = '{B}'"),
            format!("SELECT * FROM availability WHERE professor_id = '{A}' AND active = false"),
            format!("SELECT * FROM availability WHERE professor_id = '{A}' AND subject = 'Algebra'"),
            format!("SELECT * FROM slots WHERE professor_id = '{A}' AND professor_id = '{B}'"),
            format!("DELETE FROM availability WHERE id = '{A}' AND professor_id = '{B}' AND active = true"),
        ];
        for sql in &rejected {
            assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))), "{sql}");
        }

        let sql = format!(
            "SELECT * FROM resource_bookings WHERE resource_id = '{A}' AND reserved_at >= 10 AND reserved_at <= 20"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectResourceBookings { filter } => {
                assert_eq!(filter.range, TimeRange { from: Some(10), to: Some(20) });
            }
            other => panic!("expected SelectResourceBookings, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn select_table_with_placeholders() {
        assert_eq!(
            select_table("SELECT * FROM slots WHERE professor_id = $1").as_deref(),
            Some("slots")
        );
        assert_eq!(select_table("INSERT INTO users VALUES ($1, $2, $3)"), None);
    }

    #[test]
    fn batch_keeps_statement_order() {
        let (prof, window) = (Ulid::new(), Ulid::new());
        let sql = format!(
            "INSERT INTO users (id, display_name, role) VALUES ('{prof}', 'Dr. X', 'professor');
             INSERT INTO availability (id, professor_id, subject, day_of_week, start_time, end_time)
                 VALUES ('{window}', '{prof}', 'Algebra', 'friday', '14:00', '16:00');
             SELECT * FROM availability WHERE professor_id = '{prof}'"
        );
        let commands = parse_batch(&sql).unwrap();
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[0], Command::UpsertUser { id, .. } if id == prof));
        assert!(matches!(&commands[1], Command::InsertAvailability { window: w } if w.id == window));
        assert!(matches!(commands[2], Command::SelectAvailability { professor_id, .. } if professor_id == prof));

        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn batch_with_a_bad_statement_is_rejected_whole() {
        let sql = format!(
            "INSERT INTO users (id, display_name, role) VALUES ('{}', 'Ana', 'student');
             INSERT INTO users (id, display_name, role) VALUES ('{}', 'Luis', 'janitor')",
            Ulid::new(),
            Ulid::new()
        );
        assert!(matches!(parse_batch(&sql), Err(SqlError::BadValue { column: "role", .. })));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
