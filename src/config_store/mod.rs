//! ConfigStore - Single Source of Truth (SSoT)
//!
//! ## Responsibilities
//!
//! - Camera roster management (JSON file backed)
//! - Per-camera detector assignment
//! - Descriptor validation at worker start
//!
//! ## Design Principles
//!
//! - SSoT: all camera configuration reads/writes go through here
//! - No other module stores camera config locally; workers receive a copy at start

mod types;

pub use types::*;

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

/// ConfigStore instance
pub struct ConfigStore {
    roster_path: PathBuf,
    /// In-memory cache for frequent reads
    cache: RwLock<HashMap<String, CameraDescriptor>>,
}

impl ConfigStore {
    /// Create new ConfigStore, loading the roster file
    pub async fn new(roster_path: PathBuf) -> Result<Self> {
        let store = Self {
            roster_path,
            cache: RwLock::new(HashMap::new()),
        };
        store.reload().await?;
        Ok(store)
    }

    /// Create an empty store with no backing file (used by tests)
    pub fn in_memory() -> Self {
        Self {
            roster_path: PathBuf::new(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Reload the roster file into the cache
    pub async fn reload(&self) -> Result<()> {
        let raw = fs::read_to_string(&self.roster_path).await.map_err(|e| {
            Error::Config(format!(
                "Cannot read roster {}: {}",
                self.roster_path.display(),
                e
            ))
        })?;
        let roster: CameraRoster = serde_json::from_str(&raw)?;

        let mut cache = self.cache.write().await;
        cache.clear();
        for camera in roster.cameras {
            if cache.contains_key(&camera.camera_id) {
                return Err(Error::Conflict(format!(
                    "Duplicate camera_id in roster: {}",
                    camera.camera_id
                )));
            }
            cache.insert(camera.camera_id.clone(), camera);
        }

        tracing::info!(
            roster = %self.roster_path.display(),
            cameras = cache.len(),
            "Camera roster loaded"
        );
        Ok(())
    }

    /// Get one camera descriptor
    pub async fn get_camera(&self, camera_id: &str) -> Result<CameraDescriptor> {
        self.cache
            .read()
            .await
            .get(camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Camera {} not in roster", camera_id)))
    }

    /// List all enabled cameras
    pub async fn list_enabled(&self) -> Vec<CameraDescriptor> {
        self.cache
            .read()
            .await
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect()
    }

    /// Insert or replace a descriptor in the cache (used by tests and hot-reload)
    pub async fn upsert(&self, camera: CameraDescriptor) {
        self.cache
            .write()
            .await
            .insert(camera.camera_id.clone(), camera);
    }

    /// Reassign the detector for one camera and persist the roster
    pub async fn set_detector(&self, camera_id: &str, detector_kind: &str) -> Result<()> {
        {
            let mut cache = self.cache.write().await;
            let camera = cache
                .get_mut(camera_id)
                .ok_or_else(|| Error::NotFound(format!("Camera {} not in roster", camera_id)))?;
            camera.detector_kind = detector_kind.to_string();
        }
        self.persist().await?;
        tracing::info!(
            camera_id = %camera_id,
            detector = %detector_kind,
            "Detector assignment updated"
        );
        Ok(())
    }

    /// Validate a descriptor before a worker is started
    ///
    /// Configuration faults fail immediately with a reason; they are never retried.
    pub fn validate(camera: &CameraDescriptor) -> Result<()> {
        if camera.stream_uri.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Camera {} has no stream URI",
                camera.camera_id
            )));
        }
        if camera.width == 0 || camera.height == 0 {
            return Err(Error::Validation(format!(
                "Camera {} has zero resolution",
                camera.camera_id
            )));
        }
        if camera.fps == 0 {
            return Err(Error::Validation(format!(
                "Camera {} has zero fps",
                camera.camera_id
            )));
        }
        Ok(())
    }

    /// Write the cache back to the roster file
    async fn persist(&self) -> Result<()> {
        if self.roster_path.as_os_str().is_empty() {
            return Ok(());
        }
        let cache = self.cache.read().await;
        let mut cameras: Vec<CameraDescriptor> = cache.values().cloned().collect();
        cameras.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        let roster = CameraRoster { cameras };
        let json = serde_json::to_string_pretty(&roster)?;
        fs::write(&self.roster_path, json).await?;
        Ok(())
    }
}
