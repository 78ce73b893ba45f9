//! Edge Camserver
//!
//! Main entry point: loads the roster, starts one worker per enabled camera,
//! and supervises them until shutdown.

use edge_camserver::{
    alert_log::AlertLog,
    camera_worker::WorkerContext,
    config_store::ConfigStore,
    detection_log::DetectionLog,
    detector::DetectorRegistry,
    evidence_recorder::SinkKind,
    gpu_admission::GpuAdmission,
    state::{AppConfig, SystemHealth},
    supervisor::Supervisor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edge_camserver=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Edge Camserver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        roster = %config.roster_path.display(),
        preview_dir = %config.preview_dir.display(),
        evidence_dir = %config.evidence_dir.display(),
        relay_url = %config.relay_url,
        gpu_slots = config.gpu_slots,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.evidence_dir).await?;
    tokio::fs::create_dir_all(&config.detection_log_dir).await?;
    tokio::fs::create_dir_all(&config.preview_dir).await?;

    // Initialize components
    let config_store = Arc::new(ConfigStore::new(config.roster_path.clone()).await?);
    tracing::info!("ConfigStore initialized");

    let admission = Arc::new(GpuAdmission::new(config.gpu_slots));
    let registry = Arc::new(DetectorRegistry::with_builtins());
    let alerts = Arc::new(AlertLog::default());
    let detection_log = Arc::new(DetectionLog::new(config.detection_log_dir.clone()));
    let system_health = Arc::new(RwLock::new(SystemHealth::default()));

    let ctx = WorkerContext {
        admission,
        registry,
        alerts,
        detection_log,
        config: config.clone(),
        evidence_sink: SinkKind::Mp4,
    };
    let supervisor = Arc::new(Supervisor::new(config_store.clone(), ctx));
    tracing::info!("Supervisor initialized");

    // Start every enabled camera; a bad descriptor skips that camera only
    for camera in config_store.list_enabled().await {
        if let Err(e) = supervisor.start_camera(&camera.camera_id, None).await {
            tracing::error!(
                camera_id = %camera.camera_id,
                error = %e,
                "Camera not started"
            );
        }
    }

    // Watchdog loop
    let watchdog = supervisor.start_watchdog();
    tracing::info!(
        interval_sec = config.watchdog_interval_sec,
        "Watchdog started"
    );

    // System health monitoring
    let health_monitor = system_health.clone();
    let health_task = tokio::spawn(async move {
        use sysinfo::System;
        let mut sys = System::new_all();
        let mut interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            interval.tick().await;
            sys.refresh_all();

            let cpu = {
                let cpus = sys.cpus();
                if cpus.is_empty() {
                    0.0
                } else {
                    cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
                }
            };
            let memory = if sys.total_memory() > 0 {
                (sys.used_memory() as f32 / sys.total_memory() as f32) * 100.0
            } else {
                0.0
            };

            let mut health = health_monitor.write().await;
            health.update(cpu, memory);
            if health.overloaded {
                tracing::warn!(
                    cpu_percent = cpu,
                    memory_percent = memory,
                    "System overloaded"
                );
            }
        }
    });

    // Run until interrupted, then finalize every worker so no recording is
    // left truncated
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    watchdog.abort();
    health_task.abort();
    supervisor.shutdown().await;

    tracing::info!("Edge Camserver stopped");
    Ok(())
}
