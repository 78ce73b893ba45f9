//! PreviewBuffer - Named Shared Frame Region
//!
//! ## Responsibilities
//!
//! - Fixed-capacity memory-mapped region per camera (exactly w*h*3 bytes)
//! - Deterministic naming so external readers attach by camera id alone
//! - Whole-region overwrite per processed frame; readers never see a partial write
//!
//! ## Reader contract
//!
//! Attach, copy synchronously, detach. Never hold the attachment across calls;
//! a restarted worker recreates the region, so a fresh attach must be retried
//! on not-found.

use crate::error::{Error, Result};
use crate::imaging::Frame;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Deterministic region file name for a camera
pub fn region_name(camera_id: &str) -> String {
    format!("cam_{}_preview", camera_id)
}

/// Writer side, owned by one worker
pub struct PreviewWriter {
    path: PathBuf,
    mmap: MmapMut,
    len: usize,
    width: u32,
    height: u32,
}

impl PreviewWriter {
    /// Create (or recreate) the region for one camera
    pub fn create(dir: &Path, camera_id: &str, width: u32, height: u32) -> Result<Self> {
        let len = width as usize * height as usize * 3;
        let path = dir.join(region_name(camera_id));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(len as u64)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        tracing::debug!(
            camera_id = %camera_id,
            path = %path.display(),
            bytes = len,
            "Preview region created"
        );

        Ok(Self {
            path,
            mmap,
            len,
            width,
            height,
        })
    }

    /// Overwrite the whole region with one frame in a single contiguous copy
    pub fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.data.len() != self.len {
            return Err(Error::Validation(format!(
                "Preview write size mismatch: got {} expected {}",
                frame.data.len(),
                self.len
            )));
        }
        self.mmap[..].copy_from_slice(&frame.data);
        Ok(())
    }

    /// Region file path (for logging/status)
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shape(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for PreviewWriter {
    fn drop(&mut self) {
        // Remove the region file so stale readers get not-found, not stale frames
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove preview region"
                );
            }
        }
    }
}

/// One-shot reader: attach by name, copy, detach
pub fn read_preview(dir: &Path, camera_id: &str, width: u32, height: u32) -> Result<Frame> {
    let len = width as usize * height as usize * 3;
    let path = dir.join(region_name(camera_id));

    let data = std::fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("Preview region for camera {} not found", camera_id))
        } else {
            Error::Io(e)
        }
    })?;

    if data.len() != len {
        return Err(Error::Validation(format!(
            "Preview region size mismatch for camera {}: got {} expected {}",
            camera_id,
            data.len(),
            len
        )));
    }

    Frame::from_bgr(width, height, data)
}
