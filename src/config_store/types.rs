//! ConfigStore data types
//!
//! SSoT data structures for the camera roster

use serde::{Deserialize, Serialize};

/// Rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Camera entity (SSoT)
///
/// Immutable for the lifetime of a worker; copied in at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDescriptor {
    pub camera_id: String,
    #[serde(default)]
    pub name: String,
    /// RTSP source URI
    pub stream_uri: String,
    /// Detector id resolved against the registry at worker start
    pub detector_kind: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Optional detection zone; detections outside it do not qualify
    #[serde(default)]
    pub zone: Option<Rect>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_fps() -> u32 {
    15
}

fn default_enabled() -> bool {
    true
}

/// Roster file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraRoster {
    pub cameras: Vec<CameraDescriptor>,
}
