use std::path::PathBuf;
use std::sync::Arc;

use streamwatch::config::AppConfig;
use streamwatch::manager::{LogSink, StreamManager};
use streamwatch::probe::http::RoomStatusProbe;
use streamwatch::recorder::SupervisorTuning;
use streamwatch::scheduler::AvailabilityScheduler;
use streamwatch::{config, events, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("streamwatch.json"));

    let _log_guard = logging::init_logging(None)?;

    let app_config = AppConfig::load(&config_path)?;
    let record_on_start = app_config.settings.record_on_start;
    let settings = config::settings_handle(app_config.settings.clone());

    let probe = Arc::new(RoomStatusProbe::new(
        app_config.settings.probe_endpoint.clone(),
        app_config.settings.probe_referer_base.clone(),
    )?);

    let (events_tx, events_rx) = events::channel();
    let scheduler = AvailabilityScheduler::spawn(probe, settings.clone(), events_tx.clone());
    let requester = Arc::new(scheduler.handle());

    let (manager, manager_join) = StreamManager::spawn(
        settings.clone(),
        requester,
        Arc::new(LogSink),
        events_tx,
        events_rx,
        SupervisorTuning::default(),
    );

    for record in &app_config.records {
        manager.track(record.clone());
    }
    for favorite in &app_config.favorites {
        manager.add_favorite(favorite.clone());
    }
    if record_on_start {
        manager.start_all();
    }

    tracing::info!(config = %config_path.display(), "streamwatch running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    // Persist tracked entries and favorites before tearing anything down.
    let report = manager.report().await?;
    let mut saved = AppConfig {
        settings: settings.read().clone(),
        records: report.records,
        favorites: report.favorites.keys().cloned().collect(),
    };
    saved.records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
    if let Err(e) = saved.save(&config_path) {
        tracing::error!(error = %e, "failed to save configuration");
    }

    StreamManager::shutdown(&manager, manager_join).await;
    scheduler.shutdown().await;

    Ok(())
}
