use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total SQL statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "repairdesk_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "repairdesk_query_duration_seconds";

/// Counter: tool invocations over MCP. Labels: tool, status.
pub const TOOL_CALLS_TOTAL: &str = "repairdesk_tool_calls_total";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: appointments booked.
pub const APPOINTMENTS_CREATED_TOTAL: &str = "repairdesk_appointments_created_total";

/// Counter: bookings and reschedules rejected for overlapping a visit.
pub const SCHEDULING_CONFLICTS_TOTAL: &str = "repairdesk_scheduling_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "repairdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "repairdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "repairdesk_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "repairdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "repairdesk_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectAppointment { .. } => "select_appointment",
        Command::SelectAvailableSlots(_) => "select_available_slots",
        Command::SelectAlternativeSlots { .. } => "select_alternative_slots",
        Command::SelectFreeWindows { .. } => "select_free_windows",
        Command::InsertAppointment(_) => "insert_appointment",
        Command::UpdateAppointment { .. } => "update_appointment",
        Command::RescheduleAppointment { .. } => "reschedule_appointment",
        Command::CancelAppointment { .. } => "cancel_appointment",
        Command::SelectCustomers { .. } => "select_customers",
        Command::SelectPolicy { .. } => "select_policy",
        Command::SelectCoverage { .. } => "select_coverage",
        Command::SelectClaims { .. } => "select_claims",
        Command::InsertClaim(_) => "insert_claim",
        Command::UpdateClaim { .. } => "update_claim",
        Command::SelectTechnicians { .. } => "select_technicians",
        Command::SelectTechnicianLocation { .. } => "select_technician_location",
        Command::SelectTechnicianRoute { .. } => "select_technician_route",
        Command::SelectAvailableTechnicians { .. } => "select_available_technicians",
        Command::UpdateTechnician { .. } => "update_technician",
        Command::InsertNotification { .. } => "insert_notification",
    }
}
