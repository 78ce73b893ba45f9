//! EvidenceRecorder - Background Clip Encoding
//!
//! ## Responsibilities
//!
//! - Own one camera's evidence encode pipeline, fed by a bounded command queue
//! - Decouple file/encoder writes from the detection loop
//! - Never leak an open target: `Start` while recording closes the previous
//!   file first, `Stop` flushes and closes
//!
//! ## Backpressure
//!
//! `Frame` messages are best-effort and may be dropped when the queue is full.
//! `Start`/`Stop` wait for queue space and are never dropped.

use crate::error::{Error, Result};
use crate::imaging::Frame;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const QUEUE_CAPACITY: usize = 64;

/// Evidence sink format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// H.264 file through an ffmpeg subprocess
    Mp4,
    /// Raw concatenated BGR24 frames written directly (no external encoder)
    RawBgr,
}

impl SinkKind {
    /// File extension for clip names
    pub fn extension(&self) -> &'static str {
        match self {
            SinkKind::Mp4 => "mp4",
            SinkKind::RawBgr => "bgr",
        }
    }
}

/// Per-camera recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub camera_id: String,
    /// Camera directory under the evidence root
    pub camera_dir: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sink: SinkKind,
}

/// Metadata for one finalized clip
#[derive(Debug, Clone)]
pub struct EvidenceRecording {
    /// Relative path, e.g. evidence/cam1/20260101T000000.mp4
    pub file_name: String,
    /// Relative path of the JPEG thumbnail
    pub thumbnail_name: String,
    pub started_at: DateTime<Utc>,
}

enum RecorderCommand {
    Start { file_name: String },
    Frame(Frame),
    Stop { ack: oneshot::Sender<()> },
}

/// Handle to one camera's recorder task
pub struct EvidenceRecorder {
    camera_id: String,
    tx: mpsc::Sender<RecorderCommand>,
    handle: JoinHandle<()>,
}

impl EvidenceRecorder {
    /// Spawn the recorder task for one camera
    pub fn spawn(config: RecorderConfig) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let camera_id = config.camera_id.clone();
        let handle = tokio::spawn(run(config, rx));
        Self {
            camera_id,
            tx,
            handle,
        }
    }

    /// Begin recording to a new file. Waits for queue space; never dropped.
    pub async fn start(&self, file_name: String) -> Result<()> {
        self.tx
            .send(RecorderCommand::Start { file_name })
            .await
            .map_err(|_| Error::Internal(format!("Recorder for {} is gone", self.camera_id)))
    }

    /// Feed one frame. Best-effort: dropped silently when the queue is full.
    pub fn push_frame(&self, frame: Frame) {
        if let Err(mpsc::error::TrySendError::Full(_)) =
            self.tx.try_send(RecorderCommand::Frame(frame))
        {
            tracing::debug!(camera_id = %self.camera_id, "Recorder queue full, frame dropped");
        }
    }

    /// Stop recording. Returns only after the file is flushed and closed.
    pub async fn stop(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(RecorderCommand::Stop { ack })
            .await
            .map_err(|_| Error::Internal(format!("Recorder for {} is gone", self.camera_id)))?;
        done.await
            .map_err(|_| Error::Internal(format!("Recorder for {} died mid-stop", self.camera_id)))
    }

    /// Close the queue and wait for the task to drain and exit.
    ///
    /// Any open recording is finalized before the task ends.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            tracing::warn!(camera_id = %self.camera_id, error = %e, "Recorder task join failed");
        }
    }
}

async fn run(config: RecorderConfig, mut rx: mpsc::Receiver<RecorderCommand>) {
    let mut sink: Option<OpenSink> = None;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RecorderCommand::Start { file_name } => {
                // Never leak the previous target
                if let Some(open) = sink.take() {
                    open.close(&config.camera_id).await;
                }
                match OpenSink::open(&config, &file_name).await {
                    Ok(open) => {
                        tracing::info!(
                            camera_id = %config.camera_id,
                            file = %file_name,
                            "Evidence recording started"
                        );
                        sink = Some(open);
                    }
                    Err(e) => {
                        tracing::error!(
                            camera_id = %config.camera_id,
                            file = %file_name,
                            error = %e,
                            "Failed to open evidence sink"
                        );
                    }
                }
            }
            RecorderCommand::Frame(frame) => {
                if let Some(open) = sink.as_mut() {
                    if let Err(e) = open.write_frame(&frame).await {
                        // Broken sink: close it, the event's remaining frames are lost
                        tracing::warn!(
                            camera_id = %config.camera_id,
                            error = %e,
                            "Evidence write failed, closing sink"
                        );
                        if let Some(open) = sink.take() {
                            open.close(&config.camera_id).await;
                        }
                    }
                }
            }
            RecorderCommand::Stop { ack } => {
                if let Some(open) = sink.take() {
                    open.close(&config.camera_id).await;
                }
                let _ = ack.send(());
            }
        }
    }

    // Queue closed while recording (worker shutdown): finalize, never truncate
    if let Some(open) = sink.take() {
        open.close(&config.camera_id).await;
    }
}

enum OpenSink {
    Raw(tokio::fs::File),
    Mp4 { child: Child, stdin: ChildStdin },
}

impl OpenSink {
    async fn open(config: &RecorderConfig, file_name: &str) -> Result<Self> {
        tokio::fs::create_dir_all(&config.camera_dir).await?;
        let path = config.camera_dir.join(file_name);

        match config.sink {
            SinkKind::RawBgr => {
                let file = tokio::fs::File::create(&path).await?;
                Ok(OpenSink::Raw(file))
            }
            SinkKind::Mp4 => {
                let size = format!("{}x{}", config.width, config.height);
                let mut child = Command::new("ffmpeg")
                    .args([
                        "-y",
                        "-f", "rawvideo",
                        "-pix_fmt", "bgr24",
                        "-s", &size,
                        "-r", &config.fps.to_string(),
                        "-i", "-",
                        "-c:v", "libx264",
                        "-preset", "ultrafast",
                        "-pix_fmt", "yuv420p",
                        "-loglevel", "error",
                    ])
                    .arg(&path)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| Error::Encoder(format!("ffmpeg spawn failed: {}", e)))?;

                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| Error::Encoder("ffmpeg stdin unavailable".to_string()))?;
                Ok(OpenSink::Mp4 { child, stdin })
            }
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        match self {
            OpenSink::Raw(file) => {
                file.write_all(&frame.data).await?;
                Ok(())
            }
            OpenSink::Mp4 { stdin, .. } => {
                stdin
                    .write_all(&frame.data)
                    .await
                    .map_err(|e| Error::Encoder(format!("ffmpeg pipe write failed: {}", e)))
            }
        }
    }

    /// Flush and close; for mp4, closing stdin lets ffmpeg finalize the file
    async fn close(self, camera_id: &str) {
        match self {
            OpenSink::Raw(mut file) => {
                if let Err(e) = file.flush().await {
                    tracing::warn!(camera_id = %camera_id, error = %e, "Evidence flush failed");
                }
            }
            OpenSink::Mp4 { mut child, stdin } => {
                drop(stdin);
                match child.wait().await {
                    Ok(status) if !status.success() => {
                        tracing::warn!(
                            camera_id = %camera_id,
                            status = %status,
                            "Evidence encoder exited with error"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(camera_id = %camera_id, error = %e, "Evidence encoder wait failed");
                    }
                    _ => {}
                }
            }
        }
        tracing::info!(camera_id = %camera_id, "Evidence recording closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> RecorderConfig {
        RecorderConfig {
            camera_id: "cam1".to_string(),
            camera_dir: dir.to_path_buf(),
            width: 4,
            height: 4,
            fps: 15,
            sink: SinkKind::RawBgr,
        }
    }

    #[tokio::test]
    async fn test_frames_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = EvidenceRecorder::spawn(config(dir.path()));

        let a = Frame::filled(4, 4, [1, 1, 1]);
        let b = Frame::filled(4, 4, [2, 2, 2]);

        recorder.start("clip.bgr".to_string()).await.unwrap();
        recorder.push_frame(a.clone());
        recorder.push_frame(b.clone());
        recorder.stop().await.unwrap();

        // Stop returned, so the file is flushed and closed
        let bytes = std::fs::read(dir.path().join("clip.bgr")).unwrap();
        assert_eq!(bytes.len(), a.data.len() + b.data.len());
        assert_eq!(&bytes[..a.data.len()], &a.data[..]);
        assert_eq!(&bytes[a.data.len()..], &b.data[..]);

        recorder.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_while_recording_closes_previous() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = EvidenceRecorder::spawn(config(dir.path()));

        recorder.start("first.bgr".to_string()).await.unwrap();
        recorder.push_frame(Frame::filled(4, 4, [1, 1, 1]));
        recorder.start("second.bgr".to_string()).await.unwrap();
        recorder.push_frame(Frame::filled(4, 4, [2, 2, 2]));
        recorder.stop().await.unwrap();
        recorder.shutdown().await;

        let first = std::fs::read(dir.path().join("first.bgr")).unwrap();
        let second = std::fs::read(dir.path().join("second.bgr")).unwrap();
        assert_eq!(first.len(), 48);
        assert!(first.iter().all(|&x| x == 1));
        assert_eq!(second.len(), 48);
        assert!(second.iter().all(|&x| x == 2));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = EvidenceRecorder::spawn(config(dir.path()));
        recorder.stop().await.unwrap();
        recorder.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_finalizes_open_recording() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = EvidenceRecorder::spawn(config(dir.path()));

        recorder.start("open.bgr".to_string()).await.unwrap();
        recorder.push_frame(Frame::filled(4, 4, [3, 3, 3]));
        // no Stop: shutdown must still flush and close
        recorder.shutdown().await;

        let bytes = std::fs::read(dir.path().join("open.bgr")).unwrap();
        assert_eq!(bytes.len(), 48);
    }

    #[tokio::test]
    async fn test_frames_without_open_sink_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = EvidenceRecorder::spawn(config(dir.path()));
        recorder.push_frame(Frame::filled(4, 4, [9, 9, 9]));
        recorder.stop().await.unwrap();
        recorder.shutdown().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
