use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::session::Sessions;

/// Background task that drops booking drafts idle past their TTL.
pub async fn run_draft_reaper(sessions: Arc<Sessions>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let expired = sessions.expire_idle(Instant::now());
        if expired > 0 {
            info!("reaped {expired} idle booking drafts");
        }
    }
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        debug!("compacting WAL after {appends} appends");
        if let Err(e) = engine.compact_wal().await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[tokio::test]
    async fn draft_reaper_drops_idle_drafts() {
        let sessions = Arc::new(Sessions::new(Duration::from_millis(20)));
        let start: NaiveDate = "2024-06-01".parse().unwrap();
        let end: NaiveDate = "2024-06-03".parse().unwrap();
        sessions.set_dates("idle", start, end).unwrap();
        assert_eq!(sessions.len(), 1);

        let task = tokio::spawn(run_draft_reaper(sessions.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sessions.is_empty());
        task.abort();
    }
}
