//! Edge Camserver Library
//!
//! Multi-camera surveillance core for a single edge device.
//!
//! ## Architecture
//!
//! 1. ConfigStore - SSoT for the camera roster and detector assignments
//! 2. FrameSource - per-camera RTSP ingest with transparent reconnect
//! 3. GpuAdmission - fixed accelerator slot pool, no preemption
//! 4. DetectorRegistry - pluggable detection backends resolved by kind
//! 5. Sentinel - anomaly event state machine per camera
//! 6. EvidenceRecorder - background clip encoding behind a bounded queue
//! 7. PreviewBuffer - named shared frame region per camera
//! 8. EgressStreamer - annotated restream through an external encoder
//! 9. CameraWorker - the isolated per-camera pipeline composing the above
//! 10. Supervisor - worker table, watchdog, start/stop/status surface
//! 11. AlertLog / DetectionLog - alert ring buffer and detection-row sink
//!
//! ## Design Principles
//!
//! - SSoT: ConfigStore is the single source of truth for camera config
//! - One failing camera pipeline never affects another or the supervisor
//! - Freshness over completeness: latest-frame registers, never queues

pub mod alert_log;
pub mod camera_worker;
pub mod config_store;
pub mod detection_log;
pub mod detector;
pub mod egress_streamer;
pub mod error;
pub mod evidence_recorder;
pub mod frame_source;
pub mod gpu_admission;
pub mod imaging;
pub mod preview_buffer;
pub mod retry;
pub mod sentinel;
pub mod state;
pub mod supervisor;

pub use error::{Error, Result};
pub use state::AppConfig;
