use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotguard_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotguard_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: commitment admissions. Labels: outcome (accepted, rejected).
pub const ADMISSIONS_TOTAL: &str = "slotguard_admissions_total";

/// Counter: conflict groups returned by grid reports.
pub const CONFLICT_GROUPS_REPORTED_TOTAL: &str = "slotguard_conflict_groups_reported_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotguard_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotguard_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotguard_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotguard_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotguard_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
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
        Command::InsertResource { .. } => "insert_resource",
        Command::DeleteResource { .. } => "delete_resource",
        Command::SetResourceStatus { .. } => "set_resource_status",
        Command::InsertBooking { .. } => "insert_booking",
        Command::InsertTimetableEntry { .. } => "insert_timetable_entry",
        Command::InsertEvent { .. } => "insert_event",
        Command::DeleteCommitment { .. } => "delete_commitment",
        Command::SelectCommitments { .. } => "select_commitments",
        Command::SelectResources { .. } => "select_resources",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::InsertFaculty { .. } => "insert_faculty",
        Command::SetFacultyCapacity { .. } => "set_faculty_capacity",
        Command::InsertAllocation { .. } => "insert_allocation",
        Command::DeleteAllocation { .. } => "delete_allocation",
        Command::SelectWorkload { .. } => "select_workload",
    }
}
