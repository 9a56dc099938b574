use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SharedPassword;
use crate::directory::{DirectoryError, ResourceRecord, UserRecord};
use crate::engine::EngineError;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::{Tenant, TenantManager};

pub struct TutorbookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<TutorbookQueryParser>,
}

impl TutorbookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(TutorbookQueryParser),
        }
    }

    fn resolve_tenant<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Tenant>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    async fn run(&self, tenant: &Tenant, cmd: Command, format: &Format) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(tenant, cmd, format).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, tenant: &Tenant, cmd: Command, format: &Format) -> PgWireResult<Vec<Response>> {
        let engine = &tenant.engine;
        match cmd {
            Command::UpsertUser { id, display_name, role } => {
                tenant
                    .directory
                    .upsert_user(UserRecord { id, display_name, role })
                    .map_err(directory_err)?;
                Ok(vec![inserted(1)])
            }
            Command::UpsertResource {
                id,
                name,
                kind,
                capacity,
                location,
                active,
            } => {
                tenant
                    .directory
                    .upsert_resource(ResourceRecord {
                        id,
                        name,
                        kind,
                        capacity,
                        location,
                        active,
                    })
                    .map_err(directory_err)?;
                Ok(vec![inserted(1)])
            }
            Command::InsertAvailability { window } => {
                match engine.add_availability(window.clone()).await {
                    Err(EngineError::AlreadyExists(_)) => {
                        engine.update_availability(window).await.map_err(engine_err)?;
                    }
                    other => {
                        other.map_err(engine_err)?;
                    }
                }
                Ok(vec![inserted(1)])
            }
            Command::DeleteAvailability { id, professor_id } => {
                engine
                    .deactivate_availability(id, professor_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertTutoringBooking { request } => {
                engine.admit_tutoring_booking(request).await.map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::InsertResourceBooking {
                id,
                resource_id,
                user_id,
                reserved_at,
            } => {
                engine
                    .admit_resource_booking(id, resource_id, user_id, reserved_at)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::DeleteResourceBooking { id, actor_id } => {
                engine
                    .delete_resource_booking(id, actor_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SetBookingStatus {
                booking_id,
                status,
                actor_id,
            } => {
                engine
                    .set_booking_status(booking_id, status, actor_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::Reschedule {
                booking_id,
                new_id,
                actor_id,
                start,
                end,
            } => {
                engine
                    .reschedule_tutoring_booking(booking_id, new_id, actor_id, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted(1)])
            }
            Command::SelectAvailability {
                professor_id,
                include_inactive,
            } => {
                let windows = engine.list_availability(professor_id, include_inactive).await;
                let schema = Arc::new(availability_schema(format));
                let rows: Vec<PgWireResult<_>> = windows
                    .into_iter()
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&w.id.to_string())?;
                        encoder.encode_field(&w.professor_id.to_string())?;
                        encoder.encode_field(&w.subject)?;
                        encoder.encode_field(&w.modality.as_str())?;
                        encoder.encode_field(&w.location)?;
                        encoder.encode_field(&w.day_of_week)?;
                        encoder.encode_field(&w.start_time)?;
                        encoder.encode_field(&w.end_time)?;
                        encoder.encode_field(&w.active)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectSlots {
                professor_id,
                horizon_days,
            } => {
                let horizon = horizon_days.unwrap_or(engine.config().default_horizon_days);
                let slots = engine
                    .compute_slots(professor_id, horizon)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(slots_schema(format));
                let pid = professor_id.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&pid)?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectTutoringBookings { filter } => {
                let schema = Arc::new(tutoring_schema(format));
                let rows: Vec<PgWireResult<_>> = engine
                    .list_bookings(filter)
                    .await
                    .into_iter()
                    .filter_map(|b| match b {
                        Booking::Tutoring(t) => Some(t),
                        Booking::Resource(_) => None,
                    })
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.professor_id.to_string())?;
                        encoder.encode_field(&b.student_id.to_string())?;
                        encoder.encode_field(&b.span.start)?;
                        encoder.encode_field(&b.span.end)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.details.topic)?;
                        encoder.encode_field(&b.details.description)?;
                        encoder.encode_field(&b.details.modality.as_str())?;
                        encoder.encode_field(&b.details.location)?;
                        encoder.encode_field(&b.created_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectResourceBookings { filter } => {
                let schema = Arc::new(resource_booking_schema(format));
                let rows: Vec<PgWireResult<_>> = engine
                    .list_bookings(filter)
                    .await
                    .into_iter()
                    .filter_map(|b| match b {
                        Booking::Resource(r) => Some(r),
                        Booking::Tutoring(_) => None,
                    })
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.resource_id.to_string())?;
                        encoder.encode_field(&b.user_id.to_string())?;
                        encoder.encode_field(&b.reserved_at)?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.created_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

// ── Result schemas ───────────────────────────────────────────────

/// Field descriptions in the client's requested format, column by column.
fn fields(columns: Vec<(&str, Type)>, format: &Format) -> Vec<FieldInfo> {
    columns
        .into_iter()
        .enumerate()
        .map(|(idx, (name, ty))| FieldInfo::new(name.into(), None, None, ty, format.format_for(idx)))
        .collect()
}

fn availability_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        vec![
            ("id", Type::VARCHAR),
            ("professor_id", Type::VARCHAR),
            ("subject", Type::VARCHAR),
            ("modality", Type::VARCHAR),
            ("location", Type::VARCHAR),
            ("day_of_week", Type::VARCHAR),
            ("start_time", Type::VARCHAR),
            ("end_time", Type::VARCHAR),
            ("active", Type::BOOL),
        ],
        format,
    )
}

fn slots_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        vec![("professor_id", Type::VARCHAR), ("start", Type::INT8), ("end", Type::INT8)],
        format,
    )
}

fn tutoring_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        vec![
            ("id", Type::VARCHAR),
            ("professor_id", Type::VARCHAR),
            ("student_id", Type::VARCHAR),
            ("start", Type::INT8),
            ("end", Type::INT8),
            ("status", Type::VARCHAR),
            ("topic", Type::VARCHAR),
            ("description", Type::VARCHAR),
            ("modality", Type::VARCHAR),
            ("location", Type::VARCHAR),
            ("created_at", Type::INT8),
        ],
        format,
    )
}

fn resource_booking_schema(format: &Format) -> Vec<FieldInfo> {
    fields(
        vec![
            ("id", Type::VARCHAR),
            ("resource_id", Type::VARCHAR),
            ("user_id", Type::VARCHAR),
            ("reserved_at", Type::INT8),
            ("status", Type::VARCHAR),
            ("created_at", Type::INT8),
        ],
        format,
    )
}

/// Columns a statement returns; empty for anything that is not a known SELECT.
fn result_schema(stmt: &str, format: &Format) -> Vec<FieldInfo> {
    match sql::select_table(stmt).as_deref() {
        Some("availability") => availability_schema(format),
        Some("slots") => slots_schema(format),
        Some("tutoring_bookings") => tutoring_schema(format),
        Some("resource_bookings") => resource_booking_schema(format),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for TutorbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let commands = sql::parse_batch(query).map_err(sql_err)?;

        // One response per statement; the first failure ends the batch.
        let mut responses = Vec::with_capacity(commands.len());
        for cmd in commands {
            match self.run(&tenant, cmd, &Format::UnifiedText).await {
                Ok(mut done) => responses.append(&mut done),
                Err(PgWireError::UserError(info)) => {
                    responses.push(Response::Error(info));
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct TutorbookQueryParser;

#[async_trait]
impl QueryParser for TutorbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for TutorbookHandler {
    type Statement = String;
    type QueryParser = TutorbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(&self, client: &mut C, portal: &Portal<Self::Statement>, _max_rows: usize) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let tenant = self.resolve_tenant(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run(&tenant, cmd, &portal.result_column_format).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement, &Format::UnifiedText)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Inline bound text-format parameters as quoted literals. Highest index
/// first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct TutorbookFactory {
    handler: Arc<TutorbookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SharedPassword, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl TutorbookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(TutorbookHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SharedPassword::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for TutorbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(TutorbookFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidInterval { .. }
        | EngineError::InvalidWindow(_)
        | EngineError::InvalidHorizon { .. }
        | EngineError::MissingField(_)
        | EngineError::ResourceInactive(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Forbidden(_) => "42501",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
        EngineError::OutsideAvailability
        | EngineError::SlotNoLongerAvailable(_)
        | EngineError::AlreadyReserved(_) => "23P01",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn directory_err(e: DirectoryError) -> PgWireError {
    let code = match e {
        DirectoryError::LimitExceeded(_) => "54000",
        DirectoryError::Io(_) | DirectoryError::Json(_) => "58030",
    };
    user_error(code, e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::BadValue { .. } => "22023",
        SqlError::Unsupported(_) => "0A000",
        _ => "42601",
    };
    user_error(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    #[test]
    fn count_params_takes_highest_index() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(count_params("INSERT INTO users VALUES ($1, $2, $3)"), 3);
        assert_eq!(count_params("SELECT * FROM slots WHERE professor_id = $12"), 12);
    }

    #[test]
    fn sqlstate_classes() {
        let id = Ulid::new();
        assert_eq!(engine_sqlstate(&EngineError::SlotNoLongerAvailable(id)), "23P01");
        assert_eq!(engine_sqlstate(&EngineError::AlreadyReserved(id)), "23P01");
        assert_eq!(engine_sqlstate(&EngineError::OutsideAvailability), "23P01");
        assert_eq!(engine_sqlstate(&EngineError::InvalidInterval { start: 5, end: 5 }), "22023");
        assert_eq!(engine_sqlstate(&EngineError::NotFound(id)), "P0002");
        assert_eq!(engine_sqlstate(&EngineError::Forbidden("no")), "42501");
        assert_eq!(
            engine_sqlstate(&EngineError::InvalidTransition {
                from: BookingStatus::Cancelled,
                to: BookingStatus::Confirmed,
            }),
            "55000"
        );
        assert_eq!(engine_sqlstate(&EngineError::WalError("disk".into())), "58030");
    }

    #[test]
    fn unsupported_sql_is_feature_not_supported() {
        let PgWireError::UserError(info) = sql_err(SqlError::Unsupported("filter status =".into())) else {
            panic!("expected a user error");
        };
        assert_eq!(info.code, "0A000");
        let PgWireError::UserError(info) = sql_err(SqlError::UnknownTable("lectures".into())) else {
            panic!("expected a user error");
        };
        assert_eq!(info.code, "42601");
    }

    #[test]
    fn result_schema_by_table() {
        let text = Format::UnifiedText;
        assert_eq!(result_schema("SELECT * FROM slots WHERE professor_id = $1", &text).len(), 3);
        assert_eq!(result_schema("SELECT * FROM tutoring_bookings WHERE student_id = $1", &text).len(), 11);
        assert_eq!(result_schema("SELECT * FROM resource_bookings WHERE user_id = $1", &text).len(), 6);
        assert_eq!(result_schema("SELECT * FROM availability WHERE professor_id = $1", &text).len(), 9);
        assert!(result_schema("INSERT INTO users (id, display_name, role) VALUES ($1, $2, $3)", &text).is_empty());
    }
}
