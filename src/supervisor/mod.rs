//! Supervisor - Worker Table and Watchdog
//!
//! ## Responsibilities
//!
//! - Own the table of active workers; start/stop/status surface
//! - Watchdog pass: restart workers whose task died or whose frames went stale
//! - Detector swap through a full stop-then-start cycle
//!
//! ## Design
//!
//! - `start_camera` is an idempotent no-op for an already-active camera and
//!   fails immediately on configuration faults (no retry)
//! - Stop is cooperative with a bounded grace period, then force-kill with
//!   defensive resource cleanup
//! - The watchdog only observes externally visible signals (task finished?
//!   timestamp fresh?) and acts through the same start/stop surface as any
//!   caller, so a camera is never double-registered

use crate::camera_worker::{self, SpawnedWorker, WorkerContext};
use crate::config_store::{CameraDescriptor, ConfigStore};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Externally visible worker status
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub camera_id: String,
    pub active: bool,
    pub detector_kind: String,
    pub buffer_name: String,
    pub frame_shape: (u32, u32),
    pub last_frame_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

/// Whether a worker counts as stalled.
///
/// A worker that has never produced a frame is measured from its start time,
/// so a slow first connect is not an instant restart.
pub fn is_stale(
    last_frame_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold: ChronoDuration,
) -> bool {
    let reference = last_frame_at.unwrap_or(started_at);
    now - reference > threshold
}

/// Supervisor instance
pub struct Supervisor {
    config_store: Arc<ConfigStore>,
    ctx: WorkerContext,
    workers: RwLock<HashMap<String, SpawnedWorker>>,
}

impl Supervisor {
    /// Create new Supervisor
    pub fn new(config_store: Arc<ConfigStore>, ctx: WorkerContext) -> Self {
        Self {
            config_store,
            ctx,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Start a camera from its roster config.
    ///
    /// `detector_override` replaces the configured kind for this run only.
    pub async fn start_camera(
        &self,
        camera_id: &str,
        detector_override: Option<&str>,
    ) -> Result<()> {
        let mut camera = self.config_store.get_camera(camera_id).await?;
        if let Some(kind) = detector_override {
            camera.detector_kind = kind.to_string();
        }
        self.start_from_descriptor(camera).await
    }

    /// Start a worker for a fully resolved descriptor (restart path)
    async fn start_from_descriptor(&self, camera: CameraDescriptor) -> Result<()> {
        // Fail fast on configuration faults; retrying an invalid config
        // would spin forever
        ConfigStore::validate(&camera)?;
        if !self.ctx.registry.contains(&camera.detector_kind) {
            return Err(Error::Validation(format!(
                "Unknown detector kind '{}' for camera {}",
                camera.detector_kind, camera.camera_id
            )));
        }

        let mut workers = self.workers.write().await;
        loop {
            match workers.get(&camera.camera_id) {
                Some(existing) if !existing.join.is_finished() => {
                    tracing::debug!(
                        camera_id = %camera.camera_id,
                        "Camera already active, start is a no-op"
                    );
                    return Ok(());
                }
                Some(_) => {
                    // Dead entry: clean it up before the new worker registers.
                    // Reaping releases the table lock, so a concurrent start
                    // may register meanwhile; loop to re-check before inserting
                    let dead = workers.remove(&camera.camera_id);
                    drop(workers);
                    if let Some(dead) = dead {
                        self.reap(dead).await;
                    }
                    workers = self.workers.write().await;
                }
                None => break,
            }
        }

        tracing::info!(
            camera_id = %camera.camera_id,
            detector = %camera.detector_kind,
            "Starting worker"
        );
        let worker = camera_worker::spawn(camera, self.ctx.clone());
        workers.insert(worker.camera.camera_id.clone(), worker);
        Ok(())
    }

    /// Stop a camera's worker. No-op if not active.
    ///
    /// Cooperative stop with a bounded grace period; a worker that does not
    /// exit in time is force-terminated and its resources cleaned defensively.
    pub async fn stop_camera(&self, camera_id: &str) -> Result<()> {
        let worker = {
            let mut workers = self.workers.write().await;
            workers.remove(camera_id)
        };
        match worker {
            Some(worker) => {
                self.reap(worker).await;
                Ok(())
            }
            None => {
                tracing::debug!(camera_id = %camera_id, "Stop for inactive camera, no-op");
                Ok(())
            }
        }
    }

    /// Cooperatively stop one removed worker, force-killing after the grace period
    async fn reap(&self, worker: SpawnedWorker) {
        let camera_id = worker.camera.camera_id.clone();
        worker.stop.store(true, Ordering::Relaxed);

        let grace = Duration::from_millis(self.ctx.config.stop_grace_ms);
        let mut join = worker.join;
        match tokio::time::timeout(grace, &mut join).await {
            Ok(Ok(())) => {
                tracing::info!(camera_id = %camera_id, "Worker stopped cleanly");
            }
            Ok(Err(e)) => {
                tracing::warn!(camera_id = %camera_id, error = %e, "Worker task panicked");
                self.cleanup_after_kill(&worker.camera, &worker.buffer_name).await;
            }
            Err(_) => {
                tracing::warn!(
                    camera_id = %camera_id,
                    grace_ms = self.ctx.config.stop_grace_ms,
                    "Worker did not stop in time, force-killing"
                );
                join.abort();
                let _ = join.await;
                self.cleanup_after_kill(&worker.camera, &worker.buffer_name).await;
            }
        }
    }

    /// Defensive cleanup for a worker that could not run its own shutdown path
    async fn cleanup_after_kill(&self, camera: &CameraDescriptor, buffer_name: &str) {
        self.ctx.admission.release_slot(&camera.camera_id).await;
        let region = self.ctx.config.preview_dir.join(buffer_name);
        if let Err(e) = tokio::fs::remove_file(&region).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    camera_id = %camera.camera_id,
                    error = %e,
                    "Preview region cleanup failed"
                );
            }
        }
    }

    /// Whether a camera currently has a live worker
    pub async fn is_active(&self, camera_id: &str) -> bool {
        self.workers
            .read()
            .await
            .get(camera_id)
            .map(|w| !w.join.is_finished())
            .unwrap_or(false)
    }

    /// Status of all registered workers
    pub async fn status(&self) -> Vec<WorkerStatus> {
        let workers = self.workers.read().await;
        let mut out = Vec::with_capacity(workers.len());
        for worker in workers.values() {
            out.push(WorkerStatus {
                camera_id: worker.camera.camera_id.clone(),
                active: !worker.join.is_finished(),
                detector_kind: worker.camera.detector_kind.clone(),
                buffer_name: worker.buffer_name.clone(),
                frame_shape: worker.frame_shape,
                last_frame_at: *worker.last_frame_at.read().await,
                started_at: worker.started_at,
            });
        }
        out.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        out
    }

    /// Reassign a camera's detector and restart its worker if active
    pub async fn swap_detector(&self, camera_id: &str, detector_kind: &str) -> Result<()> {
        if !self.ctx.registry.contains(detector_kind) {
            return Err(Error::Validation(format!(
                "Unknown detector kind '{}'",
                detector_kind
            )));
        }
        self.config_store.set_detector(camera_id, detector_kind).await?;

        let was_active = self.is_active(camera_id).await;
        if was_active {
            // Stop fully releases resources before the matching start runs
            self.stop_camera(camera_id).await?;
            self.start_camera(camera_id, None).await?;
        }
        tracing::info!(
            camera_id = %camera_id,
            detector = %detector_kind,
            restarted = was_active,
            "Detector swapped"
        );
        Ok(())
    }

    /// One watchdog health pass: restart dead or stalled workers
    pub async fn watchdog_tick(&self) {
        let threshold = ChronoDuration::seconds(self.ctx.config.frame_staleness_sec as i64);
        let now = Utc::now();

        let mut unhealthy: Vec<(CameraDescriptor, &'static str)> = Vec::new();
        {
            let workers = self.workers.read().await;
            for worker in workers.values() {
                if worker.join.is_finished() {
                    unhealthy.push((worker.camera.clone(), "dead"));
                } else if is_stale(
                    *worker.last_frame_at.read().await,
                    worker.started_at,
                    now,
                    threshold,
                ) {
                    unhealthy.push((worker.camera.clone(), "stalled"));
                }
            }
        }

        for (camera, reason) in unhealthy {
            tracing::warn!(
                camera_id = %camera.camera_id,
                reason = reason,
                "Watchdog restarting worker"
            );
            if let Err(e) = self.stop_camera(&camera.camera_id).await {
                tracing::error!(
                    camera_id = %camera.camera_id,
                    error = %e,
                    "Watchdog stop failed"
                );
                continue;
            }
            // Restart with last-known config, overrides included
            if let Err(e) = self.start_from_descriptor(camera.clone()).await {
                tracing::error!(
                    camera_id = %camera.camera_id,
                    error = %e,
                    "Watchdog restart failed"
                );
            }
        }
    }

    /// Spawn the periodic watchdog loop
    pub fn start_watchdog(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let supervisor = self.clone();
        let interval = Duration::from_secs(supervisor.ctx.config.watchdog_interval_sec);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                supervisor.watchdog_tick().await;
            }
        })
    }

    /// Stop every worker (process shutdown)
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.workers.read().await.keys().cloned().collect();
        for camera_id in ids {
            if let Err(e) = self.stop_camera(&camera_id).await {
                tracing::error!(camera_id = %camera_id, error = %e, "Shutdown stop failed");
            }
        }
        tracing::info!("All workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_log::AlertLog;
    use crate::detection_log::DetectionLog;
    use crate::detector::DetectorRegistry;
    use crate::evidence_recorder::SinkKind;
    use crate::gpu_admission::GpuAdmission;
    use crate::state::AppConfig;

    fn descriptor(id: &str) -> CameraDescriptor {
        CameraDescriptor {
            camera_id: id.to_string(),
            name: String::new(),
            stream_uri: "rtsp://127.0.0.1:1/unreachable".to_string(),
            detector_kind: "motion".to_string(),
            width: 16,
            height: 16,
            fps: 30,
            zone: None,
            enabled: true,
        }
    }

    async fn supervisor_with(
        dir: &std::path::Path,
        cameras: Vec<CameraDescriptor>,
    ) -> Arc<Supervisor> {
        let mut config = AppConfig::default();
        config.preview_dir = dir.join("preview");
        config.evidence_dir = dir.join("evidence");
        config.detection_log_dir = dir.join("detections");
        config.stop_grace_ms = 3000;
        std::fs::create_dir_all(&config.preview_dir).unwrap();

        let store = Arc::new(ConfigStore::in_memory());
        for camera in cameras {
            store.upsert(camera).await;
        }

        let ctx = WorkerContext {
            admission: Arc::new(GpuAdmission::new(2)),
            registry: Arc::new(DetectorRegistry::with_builtins()),
            alerts: Arc::new(AlertLog::new(100)),
            detection_log: Arc::new(DetectionLog::new(dir.join("detections"))),
            config,
            evidence_sink: SinkKind::RawBgr,
        };
        Arc::new(Supervisor::new(store, ctx))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), vec![descriptor("cam1")]).await;

        supervisor.start_camera("cam1", None).await.unwrap();
        supervisor.start_camera("cam1", None).await.unwrap();

        assert!(supervisor.is_active("cam1").await);
        assert_eq!(supervisor.status().await.len(), 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_config_fault_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = descriptor("cam1");
        bad.stream_uri = "".to_string();
        let supervisor = supervisor_with(dir.path(), vec![bad]).await;

        let err = supervisor.start_camera("cam1", None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!supervisor.is_active("cam1").await);
    }

    #[tokio::test]
    async fn test_unknown_detector_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), vec![descriptor("cam1")]).await;

        let err = supervisor
            .start_camera("cam1", Some("teleport"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_camera_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), vec![]).await;
        let err = supervisor.start_camera("ghost", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stop_then_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), vec![descriptor("cam1")]).await;

        supervisor.start_camera("cam1", None).await.unwrap();
        assert!(supervisor.is_active("cam1").await);

        supervisor.stop_camera("cam1").await.unwrap();
        assert!(!supervisor.is_active("cam1").await);
        assert!(supervisor.status().await.is_empty());

        // stopping again is a no-op
        supervisor.stop_camera("cam1").await.unwrap();
    }

    #[tokio::test]
    async fn test_watchdog_restarts_dead_worker_without_double_registration() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), vec![descriptor("cam1")]).await;

        supervisor.start_camera("cam1", None).await.unwrap();
        let before = supervisor.status().await[0].started_at;

        // kill the worker through its own stop flag, simulating task death
        {
            let workers = supervisor.workers.read().await;
            workers.get("cam1").unwrap().stop.store(true, Ordering::Relaxed);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!supervisor.is_active("cam1").await);

        supervisor.watchdog_tick().await;

        let status = supervisor.status().await;
        assert_eq!(status.len(), 1, "camera registered exactly once");
        assert!(status[0].active);
        assert!(status[0].started_at > before);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_starts_over_dead_entry_register_once() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), vec![descriptor("cam1")]).await;

        supervisor.start_camera("cam1", None).await.unwrap();
        {
            let workers = supervisor.workers.read().await;
            workers.get("cam1").unwrap().stop.store(true, Ordering::Relaxed);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!supervisor.is_active("cam1").await);

        // both starts find the dead entry; reaping it releases the table
        // lock, so the loser must notice the winner's insert and no-op
        let (a, b) = tokio::join!(
            supervisor.start_camera("cam1", None),
            supervisor.start_camera("cam1", None),
        );
        a.unwrap();
        b.unwrap();
        // the winner's worker reaches request_slot only after its async
        // setup; let it settle before asserting the slot count
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = supervisor.status().await;
        assert_eq!(status.len(), 1, "camera registered exactly once");
        assert!(status[0].active);
        assert_eq!(supervisor.ctx.admission.used().await, 1);

        supervisor.shutdown().await;
        assert_eq!(supervisor.ctx.admission.used().await, 0);
    }

    #[test]
    fn test_staleness_predicate() {
        let t0: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let threshold = ChronoDuration::seconds(30);

        // fresh frame
        assert!(!is_stale(
            Some(t0 + ChronoDuration::seconds(50)),
            t0,
            t0 + ChronoDuration::seconds(60),
            threshold
        ));
        // frame older than threshold
        assert!(is_stale(
            Some(t0),
            t0,
            t0 + ChronoDuration::seconds(31),
            threshold
        ));
        // no frame yet, measured from start
        assert!(!is_stale(None, t0, t0 + ChronoDuration::seconds(10), threshold));
        assert!(is_stale(None, t0, t0 + ChronoDuration::seconds(31), threshold));
    }
}
