use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: SQL commands executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "assetd_queries_total";

/// Histogram: command latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "assetd_query_duration_seconds";

// ── Lifecycle metrics ───────────────────────────────────────────

/// Counter: allocation attempts. Labels: outcome (ok, capacity_exceeded, duplicate, other).
pub const ALLOCATIONS_TOTAL: &str = "assetd_allocations_total";

/// Counter: completed returns. Labels: mode (standard, forced).
pub const RETURNS_TOTAL: &str = "assetd_returns_total";

/// Histogram: holders per batch call. Labels: op (allocate, return).
pub const BATCH_SIZE: &str = "assetd_batch_size";

/// Counter: notifications handed to the hub. Labels: outcome (delivered, dropped).
pub const NOTIFICATIONS_TOTAL: &str = "assetd_notifications_total";

/// Gauge: return requests currently past the overdue threshold (last sweep).
pub const OVERDUE_RETURNS: &str = "assetd_overdue_returns";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "assetd_connections_active";
pub const CONNECTIONS_TOTAL: &str = "assetd_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "assetd_connections_rejected_total";

/// Gauge: inventories with a loaded engine.
pub const INVENTORIES_ACTIVE: &str = "assetd_inventories_active";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "assetd_journal_flush_duration_seconds";

/// Histogram: events per journal group commit.
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "assetd_journal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op when unset.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::InsertAsset { .. } => "insert_asset",
        Command::ResizeSeats { .. } => "resize_seats",
        Command::SetStatus { .. } => "set_status",
        Command::Allocate { .. } => "allocate",
        Command::AllocateMany { .. } => "allocate_many",
        Command::RequestReturn { .. } => "request_return",
        Command::AcknowledgeReturn { .. } => "acknowledge_return",
        Command::CompleteReturn { .. } => "complete_return",
        Command::ReturnMany { .. } => "return_many",
        Command::SelectAssets => "select_assets",
        Command::SelectUsers => "select_users",
        Command::SelectSeats { .. } => "select_seats",
        Command::SelectCurrentHolders { .. } => "select_current_holders",
        Command::SelectAllocations { .. } => "select_allocations",
        Command::SelectOverdueReturns => "select_overdue_returns",
    }
}
