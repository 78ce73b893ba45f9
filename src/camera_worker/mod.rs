//! CameraWorker - Per-Camera Pipeline
//!
//! ## Responsibilities
//!
//! - Compose frame source, detection, sentinel, evidence recorder,
//!   preview region and egress encoder for one camera
//! - Run the single processing loop: analyze every Nth frame, re-render the
//!   cached detections between analyses, refresh preview and egress every frame
//! - Release every resource on stop, finalizing any open recording
//!
//! ## Isolation
//!
//! Each worker runs in its own task so a fault in one camera's pipeline never
//! touches another camera or the supervisor. Capture, processing and evidence
//! encoding are three concurrent units inside the worker; the only cross-worker
//! state is the admission slot table.

use crate::alert_log::{AlertEvent, AlertLevel, AlertLog, AlertStatus};
use crate::config_store::CameraDescriptor;
use crate::detection_log::DetectionLog;
use crate::detector::{Detection, DetectorRegistry};
use crate::egress_streamer::{EgressConfig, EgressStreamer};
use crate::evidence_recorder::{
    EvidenceRecorder, EvidenceRecording, RecorderConfig, SinkKind,
};
use crate::frame_source::{FrameRegister, FrameSource};
use crate::gpu_admission::{ExecMode, GpuAdmission};
use crate::imaging::{draw_rect, encode_thumbnail, Frame};
use crate::preview_buffer::PreviewWriter;
use crate::sentinel::{Sentinel, SentinelPolicy, SentinelTransition};
use crate::state::AppConfig;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Annotation color for detection boxes (BGR)
const BOX_COLOR: [u8; 3] = [0, 255, 0];

/// Shared services handed to every worker
#[derive(Clone)]
pub struct WorkerContext {
    pub admission: Arc<GpuAdmission>,
    pub registry: Arc<DetectorRegistry>,
    pub alerts: Arc<AlertLog>,
    pub detection_log: Arc<DetectionLog>,
    pub config: AppConfig,
    /// Evidence sink format; tests use RawBgr to run without ffmpeg
    pub evidence_sink: SinkKind,
}

/// A running worker, as seen by the supervisor
pub struct SpawnedWorker {
    pub camera: CameraDescriptor,
    pub stop: Arc<AtomicBool>,
    pub join: JoinHandle<()>,
    /// Deterministic preview region name external readers attach to
    pub buffer_name: String,
    pub frame_shape: (u32, u32),
    pub last_frame_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub started_at: DateTime<Utc>,
    /// Latest-frame register; tests publish into it directly
    pub register: FrameRegister,
}

/// Spawn the worker task for one camera.
///
/// The descriptor is assumed validated; configuration faults are rejected by
/// the supervisor before this point.
pub fn spawn(camera: CameraDescriptor, ctx: WorkerContext) -> SpawnedWorker {
    let stop = Arc::new(AtomicBool::new(false));
    let source = FrameSource::spawn(
        camera.camera_id.clone(),
        camera.stream_uri.clone(),
        camera.width,
        camera.height,
        Duration::from_secs(ctx.config.reconnect_backoff_sec),
        stop.clone(),
    );
    let register = source.register().clone();
    let last_frame_at = register.last_frame_at_handle();
    let buffer_name = crate::preview_buffer::region_name(&camera.camera_id);
    let frame_shape = (camera.width, camera.height);

    let task_camera = camera.clone();
    let task_stop = stop.clone();
    let task_register = register.clone();
    let join = tokio::spawn(async move {
        run(task_camera, ctx, task_stop.clone(), task_register).await;
        // run() may have exited on a setup fault; the capture task must not
        // outlive the processing loop
        task_stop.store(true, Ordering::Relaxed);
        source.join().await;
    });

    SpawnedWorker {
        camera,
        stop,
        join,
        buffer_name,
        frame_shape,
        last_frame_at,
        started_at: Utc::now(),
        register,
    }
}

async fn run(
    camera: CameraDescriptor,
    ctx: WorkerContext,
    stop: Arc<AtomicBool>,
    register: FrameRegister,
) {
    let camera_id = camera.camera_id.clone();

    // Setup: everything here is acquired before the GPU slot, so a setup
    // failure never leaks a slot
    let mut detector = match ctx.registry.resolve(&camera) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(camera_id = %camera_id, error = %e, "Worker setup failed");
            return;
        }
    };
    let mut preview = match PreviewWriter::create(
        &ctx.config.preview_dir,
        &camera_id,
        camera.width,
        camera.height,
    ) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(camera_id = %camera_id, error = %e, "Preview region create failed");
            return;
        }
    };

    let camera_dir = ctx.config.evidence_dir.join(&camera_id);
    let recorder = EvidenceRecorder::spawn(RecorderConfig {
        camera_id: camera_id.clone(),
        camera_dir: camera_dir.clone(),
        width: camera.width,
        height: camera.height,
        fps: camera.fps,
        sink: ctx.evidence_sink,
    });
    let mut egress = EgressStreamer::new(EgressConfig {
        camera_id: camera_id.clone(),
        width: camera.width,
        height: camera.height,
        fps: camera.fps,
        relay_url: ctx.config.relay_url.clone(),
    });

    let granted = ctx
        .admission
        .request_slot(&camera_id, &camera.detector_kind)
        .await;
    let mode = if granted {
        ExecMode::Accelerated
    } else {
        ExecMode::Fallback
    };
    let skip = if granted {
        ctx.config.frame_skip_accelerated
    } else {
        ctx.config.frame_skip_fallback
    };

    tracing::info!(
        camera_id = %camera_id,
        detector = %camera.detector_kind,
        mode = ?mode,
        frame_skip = skip,
        "Worker started"
    );

    let mut sentinel = Sentinel::new(SentinelPolicy::new(
        ctx.config.sentinel_cooldown_sec,
        ctx.config.heartbeat_interval_sec,
    ));
    let mut cached: Vec<Detection> = Vec::new();
    let mut open_recording: Option<EvidenceRecording> = None;
    let mut frame_counter: u64 = 0;
    let mut detector_faults: u64 = 0;

    // Clamped to 1ms: a zero period would panic the interval timer
    let period_ms = (1000 / u64::from(camera.fps.max(1))).max(1);
    let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while !stop.load(Ordering::Relaxed) {
        interval.tick().await;

        let frame = match register.take().await {
            Some(f) => f,
            None => continue,
        };
        frame_counter += 1;

        // Analyze every Nth frame; the cached list is replaced wholesale
        if frame_counter % skip == 0 {
            match detector.detect(&frame, mode) {
                Ok(detections) => cached = detections,
                Err(e) => {
                    detector_faults += 1;
                    cached = Vec::new();
                    tracing::error!(
                        camera_id = %camera_id,
                        error = %e,
                        faults = detector_faults,
                        "Detector call failed, frame treated as empty"
                    );
                }
            }
        }

        // Re-render the held detections every frame to avoid flicker
        let mut annotated = frame;
        for d in &cached {
            draw_rect(&mut annotated, &d.bbox, BOX_COLOR);
        }

        if let Err(e) = preview.write(&annotated) {
            tracing::warn!(camera_id = %camera_id, error = %e, "Preview write failed");
        }
        egress.write_frame(&annotated).await;

        let positive = !cached.is_empty();
        let now = Utc::now();
        match sentinel.observe(positive, now) {
            Some(SentinelTransition::EventStarted) => {
                open_recording = begin_recording(
                    &camera, &ctx, &recorder, &camera_dir, &annotated, now,
                )
                .await;
            }
            Some(SentinelTransition::Heartbeat) => {
                let refs = recording_refs(&open_recording);
                ctx.alerts
                    .push(AlertEvent::new(
                        &camera_id,
                        format!("{} event still active", camera.detector_kind),
                        AlertLevel::Info,
                        AlertStatus::Heartbeat,
                        refs,
                    ))
                    .await;
            }
            Some(SentinelTransition::EventFinished) => {
                finish_recording(&camera, &ctx, &recorder, &mut open_recording).await;
            }
            None => {}
        }

        if sentinel.is_event_active() && positive {
            recorder.push_frame(annotated.clone());
        }

        if frame_counter % ctx.config.detection_row_interval == 0 {
            if let Err(e) = ctx.detection_log.append(&camera_id, now, &cached).await {
                tracing::warn!(camera_id = %camera_id, error = %e, "Detection row append failed");
            }
        }
    }

    // Shutdown: an open event is finalized, never left truncated
    if sentinel.force_close() {
        finish_recording(&camera, &ctx, &recorder, &mut open_recording).await;
    }
    recorder.shutdown().await;
    egress.kill().await;
    ctx.admission.release_slot(&camera_id).await;
    drop(preview);

    tracing::info!(
        camera_id = %camera_id,
        frames = frame_counter,
        detector_faults = detector_faults,
        "Worker stopped"
    );
}

/// Open a recording and emit the detected alert
async fn begin_recording(
    camera: &CameraDescriptor,
    ctx: &WorkerContext,
    recorder: &EvidenceRecorder,
    camera_dir: &std::path::Path,
    annotated: &Frame,
    now: DateTime<Utc>,
) -> Option<EvidenceRecording> {
    let camera_id = &camera.camera_id;
    let stamp = now.format("%Y%m%dT%H%M%S%3f");
    let file_name = format!("{}.{}", stamp, ctx.evidence_sink.extension());
    let thumbnail_name = format!("{}.jpg", stamp);

    if let Err(e) = recorder.start(file_name.clone()).await {
        tracing::error!(camera_id = %camera_id, error = %e, "Recording start failed");
        return None;
    }

    match encode_thumbnail(annotated) {
        Ok(jpeg) => {
            // the recorder creates this directory too, but asynchronously
            if let Err(e) = tokio::fs::create_dir_all(camera_dir).await {
                tracing::warn!(camera_id = %camera_id, error = %e, "Evidence dir create failed");
            }
            let path = camera_dir.join(&thumbnail_name);
            if let Err(e) = tokio::fs::write(&path, jpeg).await {
                tracing::warn!(camera_id = %camera_id, error = %e, "Thumbnail write failed");
            }
        }
        Err(e) => {
            tracing::warn!(camera_id = %camera_id, error = %e, "Thumbnail encode failed");
        }
    }

    let recording = EvidenceRecording {
        file_name: format!("evidence/{}/{}", camera_id, file_name),
        thumbnail_name: format!("evidence/{}/{}", camera_id, thumbnail_name),
        started_at: now,
    };

    let level = if camera.detector_kind == "intrusion" {
        AlertLevel::Critical
    } else {
        AlertLevel::Warning
    };
    ctx.alerts
        .push(AlertEvent::new(
            camera_id,
            format!("{} detected", camera.detector_kind),
            level,
            AlertStatus::Detected,
            vec![
                recording.file_name.clone(),
                recording.thumbnail_name.clone(),
            ],
        ))
        .await;

    Some(recording)
}

/// Finalize the open recording and emit the finished alert
async fn finish_recording(
    camera: &CameraDescriptor,
    ctx: &WorkerContext,
    recorder: &EvidenceRecorder,
    open_recording: &mut Option<EvidenceRecording>,
) {
    let camera_id = &camera.camera_id;
    if let Err(e) = recorder.stop().await {
        tracing::error!(camera_id = %camera_id, error = %e, "Recording stop failed");
    }
    let refs = recording_refs(open_recording);
    *open_recording = None;

    ctx.alerts
        .push(AlertEvent::new(
            camera_id,
            format!("{} event finished", camera.detector_kind),
            AlertLevel::Info,
            AlertStatus::Finished,
            refs,
        ))
        .await;
}

fn recording_refs(open_recording: &Option<EvidenceRecording>) -> Vec<String> {
    open_recording
        .as_ref()
        .map(|r| vec![r.file_name.clone(), r.thumbnail_name.clone()])
        .unwrap_or_default()
}
