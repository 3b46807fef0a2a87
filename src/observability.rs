use std::io;
use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "parkd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "parkd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkd_wal_flush_batch_size";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: successful booking transitions. Labels: transition
/// (reserve, check_in, check_out, cancel).
pub const BOOKING_TRANSITIONS_TOTAL: &str = "parkd_booking_transitions_total";

/// Counter: reserve attempts refused because the slot was taken.
pub const RESERVE_CONFLICTS_TOTAL: &str = "parkd_reserve_conflicts_total";

/// Counter: admin slot status overrides.
pub const SLOT_OVERRIDES_TOTAL: &str = "parkd_slot_overrides_total";

/// Counter: statements refused for lack of the admin role.
pub const FORBIDDEN_TOTAL: &str = "parkd_forbidden_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| io::Error::other(format!("failed to install Prometheus exporter: {e}")))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertLot { .. } => "insert_lot",
        Command::UpdateLot { .. } => "update_lot",
        Command::DeleteLot { .. } => "delete_lot",
        Command::InsertSlot { .. } => "insert_slot",
        Command::UpdateSlotStatus { .. } => "update_slot_status",
        Command::DeleteSlot { .. } => "delete_slot",
        Command::Reserve { .. } => "reserve",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::Cancel { .. } => "cancel",
        Command::SelectLots { .. } => "select_lots",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectStatistics => "select_statistics",
        Command::SelectOccupancy => "select_occupancy",
        Command::SelectUsers => "select_users",
    }
}
