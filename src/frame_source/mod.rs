//! FrameSource - Camera Ingest Adapter
//!
//! ## Responsibilities
//!
//! - Pull one camera's RTSP stream through an ffmpeg rawvideo decode
//! - Publish only the most recent frame (overwrite, never enqueue)
//! - Reconnect transparently with fixed backoff, forever, until cancelled
//! - Maintain the "last frame at" timestamp the watchdog reads
//!
//! Latency beats completeness here: buffering would add delay proportional
//! to backlog, so the single-slot register overwrites.

use crate::error::{Error, Result};
use crate::imaging::Frame;
use crate::retry::{retry_until_stopped, sleep_interruptible};
use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Single-slot latest-frame register shared with the processing loop
#[derive(Clone)]
pub struct FrameRegister {
    latest: Arc<Mutex<Option<Frame>>>,
    last_frame_at: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl FrameRegister {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(Mutex::new(None)),
            last_frame_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Overwrite the register with a newer frame
    pub async fn publish(&self, frame: Frame) {
        {
            let mut slot = self.latest.lock().await;
            *slot = Some(frame);
        }
        let mut at = self.last_frame_at.write().await;
        *at = Some(Utc::now());
    }

    /// Take the newest frame, leaving the register empty.
    ///
    /// Each captured frame is processed at most once.
    pub async fn take(&self) -> Option<Frame> {
        self.latest.lock().await.take()
    }

    /// Timestamp of the last published frame
    pub async fn last_frame_at(&self) -> Option<DateTime<Utc>> {
        *self.last_frame_at.read().await
    }

    /// Shared handle to the timestamp, held by the supervisor's watchdog
    pub fn last_frame_at_handle(&self) -> Arc<RwLock<Option<DateTime<Utc>>>> {
        self.last_frame_at.clone()
    }
}

impl Default for FrameRegister {
    fn default() -> Self {
        Self::new()
    }
}

/// FrameSource instance, owned by one worker
pub struct FrameSource {
    camera_id: String,
    register: FrameRegister,
    handle: JoinHandle<()>,
}

impl FrameSource {
    /// Spawn the capture task for one camera
    pub fn spawn(
        camera_id: String,
        stream_uri: String,
        width: u32,
        height: u32,
        backoff: Duration,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let register = FrameRegister::new();
        let task_register = register.clone();
        let task_id = camera_id.clone();

        let handle = tokio::spawn(async move {
            capture_loop(task_id, stream_uri, width, height, backoff, stop, task_register).await;
        });

        Self {
            camera_id,
            register,
            handle,
        }
    }

    pub fn register(&self) -> &FrameRegister {
        &self.register
    }

    /// Wait for the capture task to exit after the stop flag was raised
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!(camera_id = %self.camera_id, error = %e, "Capture task join failed");
        }
    }
}

async fn capture_loop(
    camera_id: String,
    stream_uri: String,
    width: u32,
    height: u32,
    backoff: Duration,
    stop: Arc<AtomicBool>,
    register: FrameRegister,
) {
    let frame_len = width as usize * height as usize * 3;

    while !stop.load(Ordering::Relaxed) {
        // Open (or reopen) the stream, retrying with backoff until cancelled
        let opened = retry_until_stopped("Stream open", &camera_id, backoff, &stop, || {
            open_stream(&stream_uri, width, height)
        })
        .await;

        let (mut child, mut stdout) = match opened {
            Some(pair) => pair,
            None => break,
        };

        tracing::info!(camera_id = %camera_id, uri = %stream_uri, "Camera stream connected");

        let mut buf = vec![0u8; frame_len];
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            match stdout.read_exact(&mut buf).await {
                Ok(_) => {
                    match Frame::from_bgr(width, height, buf.clone()) {
                        Ok(frame) => register.publish(frame).await,
                        Err(e) => {
                            tracing::warn!(camera_id = %camera_id, error = %e, "Bad frame dropped");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        camera_id = %camera_id,
                        error = %e,
                        "Camera stream interrupted, reconnecting"
                    );
                    break;
                }
            }
        }

        if let Err(e) = child.kill().await {
            tracing::debug!(camera_id = %camera_id, error = %e, "Decoder already gone");
        }

        if stop.load(Ordering::Relaxed) {
            break;
        }
        if !sleep_interruptible(backoff, &stop).await {
            break;
        }
    }

    tracing::info!(camera_id = %camera_id, "Capture loop stopped");
}

/// Spawn the ffmpeg decode subprocess for one RTSP source
async fn open_stream(
    stream_uri: &str,
    width: u32,
    height: u32,
) -> Result<(Child, ChildStdout)> {
    let size = format!("{}x{}", width, height);
    let mut child = Command::new("ffmpeg")
        .args([
            "-rtsp_transport", "tcp",
            "-i", stream_uri,
            "-f", "rawvideo",
            "-pix_fmt", "bgr24",
            "-s", &size,
            "-an",
            "-loglevel", "error",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Capture(format!("ffmpeg spawn failed: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Capture("ffmpeg stdout unavailable".to_string()))?;
    Ok((child, stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_overwrites_and_takes_once() {
        let register = FrameRegister::new();
        register.publish(Frame::filled(4, 4, [1, 1, 1])).await;
        register.publish(Frame::filled(4, 4, [2, 2, 2])).await;

        let frame = register.take().await.unwrap();
        assert_eq!(frame.pixel(0, 0), [2, 2, 2]);
        assert!(register.take().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_updates_timestamp() {
        let register = FrameRegister::new();
        assert!(register.last_frame_at().await.is_none());
        register.publish(Frame::filled(4, 4, [0, 0, 0])).await;
        assert!(register.last_frame_at().await.is_some());
    }

    #[tokio::test]
    async fn test_stop_flag_ends_capture_task() {
        let stop = Arc::new(AtomicBool::new(false));
        let source = FrameSource::spawn(
            "cam1".to_string(),
            "rtsp://127.0.0.1:1/unreachable".to_string(),
            4,
            4,
            Duration::from_millis(50),
            stop.clone(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.store(true, Ordering::Relaxed);
        // join must return promptly once the flag is raised
        tokio::time::timeout(Duration::from_secs(5), source.join())
            .await
            .expect("capture task did not stop");
    }
}
