//! Application state
//!
//! Holds the runtime configuration and shared health status

use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Camera roster file (JSON)
    pub roster_path: PathBuf,
    /// Directory for named preview regions (one file per camera)
    pub preview_dir: PathBuf,
    /// Directory for evidence recordings and thumbnails
    pub evidence_dir: PathBuf,
    /// Directory for detection-row CSV files
    pub detection_log_dir: PathBuf,
    /// Streaming-media relay base URL (per-camera path appended)
    pub relay_url: String,
    /// Number of accelerator slots
    pub gpu_slots: usize,
    /// Camera reconnect backoff in seconds
    pub reconnect_backoff_sec: u64,
    /// Detection cadence on an accelerator slot (every Nth frame)
    pub frame_skip_accelerated: u64,
    /// Detection cadence on CPU fallback (every Nth frame)
    pub frame_skip_fallback: u64,
    /// Sentinel cooldown before an event closes, in seconds
    pub sentinel_cooldown_sec: u64,
    /// Heartbeat alert interval while an event is active, in seconds
    pub heartbeat_interval_sec: u64,
    /// Watchdog poll interval in seconds
    pub watchdog_interval_sec: u64,
    /// Frame staleness threshold before a worker counts as stalled, in seconds
    pub frame_staleness_sec: u64,
    /// Grace period for cooperative worker stop before force-kill, in milliseconds
    pub stop_grace_ms: u64,
    /// Detection rows are appended every Nth processed frame
    pub detection_row_interval: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            roster_path: std::env::var("ROSTER_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/etc/edge-camserver/cameras.json")),
            preview_dir: std::env::var("PREVIEW_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/dev/shm")),
            evidence_dir: std::env::var("EVIDENCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/edge-camserver/evidence")),
            detection_log_dir: std::env::var("DETECTION_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/edge-camserver/detections")),
            relay_url: std::env::var("RELAY_URL")
                .unwrap_or_else(|_| "rtsp://localhost:8554".to_string()),
            gpu_slots: std::env::var("GPU_SLOTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            reconnect_backoff_sec: std::env::var("RECONNECT_BACKOFF_SEC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            frame_skip_accelerated: 5,
            frame_skip_fallback: 7,
            sentinel_cooldown_sec: std::env::var("SENTINEL_COOLDOWN_SEC")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            heartbeat_interval_sec: 10,
            watchdog_interval_sec: 5,
            frame_staleness_sec: 30,
            stop_grace_ms: 2500,
            detection_row_interval: 30,
        }
    }
}

/// System health metrics
#[derive(Debug, Clone, Default)]
pub struct SystemHealth {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub overloaded: bool,
    pub last_overload_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl SystemHealth {
    /// Check and update overload status
    pub fn update(&mut self, cpu: f32, memory: f32) {
        self.cpu_percent = cpu;
        self.memory_percent = memory;

        if cpu > 85.0 || memory > 90.0 {
            self.overloaded = true;
            self.last_overload_at = Some(chrono::Utc::now());
        } else if self.overloaded {
            // Recovery with hysteresis
            if let Some(last) = self.last_overload_at {
                let elapsed = chrono::Utc::now() - last;
                if elapsed > chrono::Duration::seconds(60) && cpu < 60.0 && memory < 70.0 {
                    self.overloaded = false;
                }
            }
        }
    }
}
