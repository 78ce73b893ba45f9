//! Detector - Pluggable Detection Backends
//!
//! ## Responsibilities
//!
//! - `Detector` capability contract (frame + mode -> detections)
//! - Registry mapping detector kinds to constructors
//! - Built-in pixel-diff backends (`motion`, `intrusion`)
//!
//! ## Design
//!
//! - Backends are stateless across cameras: one instance per worker,
//!   resolved once at worker start and held for its lifetime
//! - Callable synchronously from the worker's single processing loop;
//!   the core assumes no internal concurrency

mod pixel_diff;

pub use pixel_diff::{IntrusionDetector, MotionDetector};

use crate::config_store::{CameraDescriptor, Rect};
use crate::error::{Error, Result};
use crate::gpu_admission::ExecMode;
use crate::imaging::Frame;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One detection produced by a backend.
///
/// Each cycle's list replaces the previous wholesale; lists are never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: Rect,
    pub class_label: String,
    /// In [0, 1]
    pub confidence: f32,
}

/// Detection backend contract
pub trait Detector: Send {
    /// Stable id this backend was registered under
    fn kind(&self) -> &'static str;

    /// Analyze one frame. Resolution and cadence are decided by the caller
    /// through `mode`; the backend only honors the resize target it implies.
    fn detect(&mut self, frame: &Frame, mode: ExecMode) -> Result<Vec<Detection>>;
}

/// Analysis resolution implied by an execution mode
pub fn analysis_size(mode: ExecMode) -> (u32, u32) {
    match mode {
        ExecMode::Accelerated => (320, 240),
        ExecMode::Fallback => (160, 120),
    }
}

type DetectorFactory = fn(&CameraDescriptor) -> Box<dyn Detector>;

/// Registry mapping detector kinds to constructors.
///
/// Constructed once at startup and shared by handle; workers resolve their
/// backend exactly once at start.
pub struct DetectorRegistry {
    factories: HashMap<&'static str, DetectorFactory>,
}

impl DetectorRegistry {
    /// Registry with the built-in backends
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("motion", |camera| {
            Box::new(MotionDetector::new(camera.zone))
        });
        registry.register("intrusion", |camera| {
            Box::new(IntrusionDetector::new(camera.zone))
        });
        registry
    }

    /// Register a backend constructor under a kind id
    pub fn register(&mut self, kind: &'static str, factory: DetectorFactory) {
        self.factories.insert(kind, factory);
    }

    /// Whether a kind is known
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Construct a backend for one camera
    pub fn resolve(&self, camera: &CameraDescriptor) -> Result<Box<dyn Detector>> {
        let factory = self
            .factories
            .get(camera.detector_kind.as_str())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Unknown detector kind '{}' for camera {}",
                    camera.detector_kind, camera.camera_id
                ))
            })?;
        Ok(factory(camera))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: &str) -> CameraDescriptor {
        CameraDescriptor {
            camera_id: "cam1".to_string(),
            name: String::new(),
            stream_uri: "rtsp://test".to_string(),
            detector_kind: kind.to_string(),
            width: 640,
            height: 480,
            fps: 15,
            zone: None,
            enabled: true,
        }
    }

    #[test]
    fn test_builtins_resolve() {
        let registry = DetectorRegistry::with_builtins();
        assert!(registry.contains("motion"));
        assert!(registry.contains("intrusion"));
        let det = registry.resolve(&descriptor("motion")).unwrap();
        assert_eq!(det.kind(), "motion");
    }

    #[test]
    fn test_unknown_kind_is_validation_error() {
        let registry = DetectorRegistry::with_builtins();
        match registry.resolve(&descriptor("teleport")) {
            Ok(_) => panic!("unknown kind must not resolve"),
            Err(e) => assert!(matches!(e, Error::Validation(_))),
        }
    }

    #[test]
    fn test_analysis_size_per_mode() {
        assert_eq!(analysis_size(ExecMode::Accelerated), (320, 240));
        assert_eq!(analysis_size(ExecMode::Fallback), (160, 120));
    }
}
