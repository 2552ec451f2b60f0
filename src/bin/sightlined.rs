//! sightlined - Sightline daemon
//!
//! This daemon:
//! 1. Opens the telemetry store
//! 2. Opens the camera and detector behind the capture arbiter
//! 3. Records a prediction every recorder interval
//! 4. Serves the query API and the live stream
//! 5. Shuts down on SIGINT/SIGTERM, finishing queued cycles first

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use sightline::api::{ApiConfig, ApiServer};
use sightline::{CaptureArbiter, Recorder, SharedStore, SightlineConfig, SqliteTelemetryStore};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Camera detection recorder with GPS telemetry and a live stream"
)]
struct Args {
    /// JSON configuration file. Environment overrides apply on top.
    #[arg(long, env = "SIGHTLINE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = SightlineConfig::load_from(args.config.as_deref())?;

    log::info!("sightlined {} starting", env!("CARGO_PKG_VERSION"));
    log::info!(
        "camera={} {}x{}@{} detector={} db={}",
        cfg.camera.device,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.target_fps,
        cfg.detector.backend,
        cfg.db_path
    );

    let store: SharedStore = Arc::new(
        SqliteTelemetryStore::open(&cfg.db_path)
            .with_context(|| format!("open telemetry store {}", cfg.db_path))?,
    );

    let camera = cfg.camera.clone();
    let detector = cfg.detector.clone();
    let arbiter =
        tokio::task::spawn_blocking(move || CaptureArbiter::from_settings(&camera, &detector))
            .await
            .map_err(|e| anyhow!("arbiter startup task failed: {}", e))??;

    let cancel = CancellationToken::new();

    let recorder = if cfg.recorder.enabled {
        Some(
            Recorder::new(arbiter.handle(), store.clone(), cfg.recorder.interval)
                .spawn(cancel.clone()),
        )
    } else {
        log::info!("periodic recorder disabled");
        None
    };

    let api = ApiServer::new(ApiConfig::from(&cfg), arbiter.handle(), store.clone())
        .spawn(cancel.clone())
        .await?;
    log::info!("sightlined running; api on http://{}", api.addr);

    shutdown_signal().await;
    log::info!("shutdown signal received");
    cancel.cancel();

    if let Err(err) = api.stop().await {
        log::error!("api shutdown: {:#}", err);
    }
    if let Some(recorder) = recorder {
        let stats = recorder.stop().await;
        log::info!(
            "recorder wrote {} predictions ({} failed ticks)",
            stats.records_written,
            stats.failed_ticks
        );
    }
    tokio::task::spawn_blocking(move || arbiter.shutdown())
        .await
        .map_err(|e| anyhow!("arbiter shutdown task failed: {}", e))?;

    log::info!("sightlined stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(err) => log::warn!("SIGTERM handler unavailable: {}", err),
        }
    }
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("ctrl-c handler failed: {}", err);
    }
}
