use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tutorbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tutorbook_query_duration_seconds";

/// Counter: admission attempts. Labels: kind (tutoring, resource), outcome.
pub const ADMISSIONS_TOTAL: &str = "tutorbook_admissions_total";

/// Counter: lifecycle transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "tutorbook_transitions_total";

/// Histogram: slot generation latency in seconds.
pub const SLOT_COMPUTE_DURATION_SECONDS: &str = "tutorbook_slot_compute_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tutorbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tutorbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tutorbook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "tutorbook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tutorbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tutorbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertUser { .. } => "upsert_user",
        Command::UpsertResource { .. } => "upsert_resource",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::DeleteAvailability { .. } => "delete_availability",
        Command::InsertTutoringBooking { .. } => "insert_tutoring_booking",
        Command::InsertResourceBooking { .. } => "insert_resource_booking",
        Command::DeleteResourceBooking { .. } => "delete_resource_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::Reschedule { .. } => "reschedule",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectTutoringBookings { .. } => "select_tutoring_bookings",
        Command::SelectResourceBookings { .. } => "select_resource_bookings",
    }
}
