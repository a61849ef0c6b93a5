use std::sync::Arc;

use tracing::{info, warn};

use innkeep::config::{self, Config};
use innkeep::engine::{Engine, EngineError};
use innkeep::reaper;
use innkeep::session::Sessions;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    innkeep::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::open(config.wal_path())?);
    if let Some(path) = &config.rooms_file {
        let rooms = config::load_rooms(path)?;
        let mut created = 0;
        for room in rooms {
            match engine.create_room(room.id, room.name).await {
                Ok(()) => created += 1,
                Err(EngineError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("seeded {created} rooms from {}", path.display());
    }

    let sessions = Arc::new(Sessions::new(config.draft_ttl));
    tokio::spawn(reaper::run_draft_reaper(
        sessions.clone(),
        config.reap_interval,
    ));
    tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    info!("innkeep ready");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  rooms: {}", engine.store().room_count());
    info!("  draft ttl: {}s", config.draft_ttl.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Run until SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, compacting WAL");
    if let Err(e) = engine.compact_wal().await {
        warn!("final compaction failed: {e}");
    }
    info!("innkeep stopped");
    Ok(())
}
