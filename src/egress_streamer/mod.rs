//! EgressStreamer - Annotated Restream Encoder
//!
//! ## Responsibilities
//!
//! - One external real-time encoder subprocess per camera
//! - Raw BGR24 frames piped in; H.264 republished to the media relay
//! - Liveness check before every write; cold restart on detected death
//!
//! ## Design
//!
//! - A write to a dead process is a dropped frame, not fatal
//! - Frames are resized to the declared fixed input shape before writing;
//!   a byte-count mismatch would desynchronize the pipe irrecoverably

use crate::error::{Error, Result};
use crate::imaging::{resize_nearest, Frame};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

/// Per-camera egress configuration
#[derive(Debug, Clone)]
pub struct EgressConfig {
    pub camera_id: String,
    /// Fixed encoder input shape
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Relay base URL; the per-camera path is appended
    pub relay_url: String,
}

impl EgressConfig {
    /// Relay publish URL for this camera
    pub fn output_url(&self) -> String {
        format!("{}/cam_{}", self.relay_url.trim_end_matches('/'), self.camera_id)
    }
}

/// Low-latency H.264 encoder argv for one camera
fn encoder_args(config: &EgressConfig) -> Vec<String> {
    let size = format!("{}x{}", config.width, config.height);
    [
        "-y",
        "-f", "rawvideo",
        "-vcodec", "rawvideo",
        "-pix_fmt", "bgr24",
        "-s", &size,
        "-r", &config.fps.to_string(),
        "-i", "-",
        "-c:v", "libx264",
        "-preset", "ultrafast",
        "-tune", "zerolatency",
        "-profile:v", "baseline",
        "-b:v", "1500k",
        "-maxrate", "1500k",
        "-bufsize", "3000k",
        "-g", "30",
        "-loglevel", "error",
        "-f", "rtsp",
        "-rtsp_transport", "tcp",
        &config.output_url(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// EgressStreamer instance, owned by one worker
pub struct EgressStreamer {
    config: EgressConfig,
    child: Option<(Child, ChildStdin)>,
    dropped_frames: u64,
    command_override: Option<(String, Vec<String>)>,
}

impl EgressStreamer {
    /// Create without spawning; the encoder starts lazily on the first write
    pub fn new(config: EgressConfig) -> Self {
        Self {
            config,
            child: None,
            dropped_frames: 0,
            command_override: None,
        }
    }

    /// Replace the encoder command (test fixtures)
    #[cfg(test)]
    pub fn with_command(mut self, program: &str, args: &[&str]) -> Self {
        self.command_override = Some((
            program.to_string(),
            args.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Frames dropped because the encoder was dead or the pipe broke
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Write one frame to the encoder, resizing to the fixed input shape.
    ///
    /// Returns true when the frame reached the pipe. A dead encoder is
    /// cold-restarted first; if that fails the frame is dropped.
    pub async fn write_frame(&mut self, frame: &Frame) -> bool {
        if let Err(e) = self.ensure_running().await {
            tracing::warn!(
                camera_id = %self.config.camera_id,
                error = %e,
                "Egress encoder unavailable, frame dropped"
            );
            self.dropped_frames += 1;
            return false;
        }

        let sized;
        let data = if frame.width == self.config.width && frame.height == self.config.height {
            &frame.data
        } else {
            sized = resize_nearest(frame, self.config.width, self.config.height);
            &sized.data
        };

        if let Some((_, stdin)) = self.child.as_mut() {
            if let Err(e) = stdin.write_all(data).await {
                tracing::warn!(
                    camera_id = %self.config.camera_id,
                    error = %e,
                    "Egress pipe write failed, encoder will be restarted"
                );
                self.kill().await;
                self.dropped_frames += 1;
                return false;
            }
        }
        true
    }

    /// Spawn the encoder if it is not running, reaping a dead child first
    async fn ensure_running(&mut self) -> Result<()> {
        if let Some((child, _)) = self.child.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => {
                    tracing::warn!(
                        camera_id = %self.config.camera_id,
                        status = %status,
                        "Egress encoder died, cold-restarting"
                    );
                    self.child = None;
                }
                Err(e) => {
                    tracing::warn!(
                        camera_id = %self.config.camera_id,
                        error = %e,
                        "Egress encoder status check failed, restarting"
                    );
                    self.kill().await;
                }
            }
        }

        let (program, args) = match &self.command_override {
            Some((program, args)) => (program.clone(), args.clone()),
            None => ("ffmpeg".to_string(), encoder_args(&self.config)),
        };

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Encoder(format!("encoder spawn failed: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Encoder("encoder stdin unavailable".to_string()))?;

        tracing::info!(
            camera_id = %self.config.camera_id,
            output = %self.config.output_url(),
            "Egress encoder started"
        );
        self.child = Some((child, stdin));
        Ok(())
    }

    /// Kill the encoder subprocess and reap it
    pub async fn kill(&mut self) {
        if let Some((mut child, stdin)) = self.child.take() {
            drop(stdin);
            if let Err(e) = child.kill().await {
                tracing::warn!(
                    camera_id = %self.config.camera_id,
                    error = %e,
                    "Egress encoder kill failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EgressConfig {
        EgressConfig {
            camera_id: "cam1".to_string(),
            width: 8,
            height: 8,
            fps: 15,
            relay_url: "rtsp://localhost:8554".to_string(),
        }
    }

    #[test]
    fn test_output_url_per_camera() {
        assert_eq!(config().output_url(), "rtsp://localhost:8554/cam_cam1");
        let mut c = config();
        c.relay_url = "rtsp://relay:8554/".to_string();
        assert_eq!(c.output_url(), "rtsp://relay:8554/cam_cam1");
    }

    #[test]
    fn test_encoder_args_shape() {
        let args = encoder_args(&config());
        assert!(args.contains(&"8x8".to_string()));
        assert!(args.contains(&"zerolatency".to_string()));
        assert!(args.contains(&"rtsp://localhost:8554/cam_cam1".to_string()));
        // rawvideo input from stdin
        assert!(args.contains(&"-".to_string()));
    }

    #[tokio::test]
    async fn test_writes_reach_live_encoder() {
        // cat consumes stdin forever, standing in for a healthy encoder
        let mut streamer = EgressStreamer::new(config()).with_command("cat", &[]);
        let frame = Frame::filled(8, 8, [1, 2, 3]);
        assert!(streamer.write_frame(&frame).await);
        assert!(streamer.write_frame(&frame).await);
        assert_eq!(streamer.dropped_frames(), 0);
        streamer.kill().await;
    }

    #[tokio::test]
    async fn test_oversized_frame_resized_not_rejected() {
        let mut streamer = EgressStreamer::new(config()).with_command("cat", &[]);
        let big = Frame::filled(64, 64, [5, 5, 5]);
        assert!(streamer.write_frame(&big).await);
        streamer.kill().await;
    }

    #[tokio::test]
    async fn test_dead_encoder_restarted_between_writes() {
        // `true` exits immediately, so every liveness check finds a corpse
        let mut streamer = EgressStreamer::new(config()).with_command("true", &[]);
        let frame = Frame::filled(8, 8, [0, 0, 0]);

        // Writes may race the child's exit; what matters is that they never
        // error out and the streamer keeps attempting cold restarts.
        for _ in 0..3 {
            streamer.write_frame(&frame).await;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        streamer.kill().await;
    }

    #[tokio::test]
    async fn test_spawn_failure_drops_frame() {
        let mut streamer =
            EgressStreamer::new(config()).with_command("/nonexistent/encoder-binary", &[]);
        let frame = Frame::filled(8, 8, [0, 0, 0]);
        assert!(!streamer.write_frame(&frame).await);
        assert_eq!(streamer.dropped_frames(), 1);
    }
}
