use std::net::SocketAddr;

// ── Booking traffic ─────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (booked, unavailable, rejected).
pub const RESERVATIONS_TOTAL: &str = "innkeep_reservations_total";

/// Histogram: time from request to durable commit, in seconds.
pub const RESERVATION_COMMIT_SECONDS: &str = "innkeep_reservation_commit_seconds";

/// Counter: availability queries. Labels: scope (room, all).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "innkeep_availability_checks_total";

// ── Booking drafts ──────────────────────────────────────────────

/// Gauge: drafts held in memory after the last reaper pass.
pub const DRAFTS_ACTIVE: &str = "innkeep_drafts_active";

/// Counter: drafts dropped for being idle past the TTL.
pub const DRAFTS_EXPIRED_TOTAL: &str = "innkeep_drafts_expired_total";

/// Counter: draft submissions. Labels: outcome (committed, failed).
pub const DRAFT_COMMITS_TOTAL: &str = "innkeep_draft_commits_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "innkeep_wal_compactions_total";

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
