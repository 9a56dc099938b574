use crate::model::Ms;

// ── Tenants ──────────────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

// ── Directory ────────────────────────────────────────────────────

pub const MAX_DIRECTORY_ENTRIES: usize = 100_000;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_LOCATION_LEN: usize = 200;

// ── Calendars ────────────────────────────────────────────────────

pub const MAX_WINDOWS_PER_PROFESSOR: usize = 512;
pub const MAX_BOOKINGS_PER_CALENDAR: usize = 100_000;
pub const MAX_SUBJECT_LEN: usize = 200;
pub const MAX_TOPIC_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 4_000;

// ── Time ─────────────────────────────────────────────────────────

pub const MAX_HORIZON_DAYS: u32 = 90;
/// A tutoring session never runs past one day.
pub const MAX_SESSION_MS: Ms = 24 * 3_600_000;
/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

// ── Storage ──────────────────────────────────────────────────────

/// Largest encoded WAL event. Text limits keep real records far below this.
pub const MAX_WAL_RECORD_LEN: usize = 64 * 1024;

// ── Wire ─────────────────────────────────────────────────────────

pub const MAX_SQL_LEN: usize = 64 * 1024;
