//! DetectionLog - Detection Row Persistence
//!
//! ## Responsibilities
//!
//! - Append-only per-camera CSV rows on a fixed cadence
//! - Independent of alerting; rows are written whether or not an event is open
//!
//! Row layout: `timestamp,label:count;...,max_confidence`

use crate::detector::Detection;
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// DetectionLog instance, shared across workers
pub struct DetectionLog {
    dir: PathBuf,
}

impl DetectionLog {
    /// Create new DetectionLog rooted at `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// CSV file path for one camera
    pub fn file_path(&self, camera_id: &str) -> PathBuf {
        self.dir.join(format!("cam_{}.csv", camera_id))
    }

    /// Append one row summarizing the current detections
    pub async fn append(
        &self,
        camera_id: &str,
        at: DateTime<Utc>,
        detections: &[Detection],
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut max_confidence = 0.0f32;
        for d in detections {
            *counts.entry(d.class_label.as_str()).or_insert(0) += 1;
            max_confidence = max_confidence.max(d.confidence);
        }
        let labels = counts
            .iter()
            .map(|(label, count)| format!("{}:{}", label, count))
            .collect::<Vec<_>>()
            .join(";");

        let row = format!(
            "{},{},{:.3}\n",
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            labels,
            max_confidence
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(camera_id))
            .await?;
        file.write_all(row.as_bytes()).await?;
        // tokio files buffer in a background task; without a flush the row
        // may not be on disk when append returns
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::Rect;

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection {
            bbox: Rect {
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            },
            class_label: label.to_string(),
            confidence,
        }
    }

    #[tokio::test]
    async fn test_rows_appended_per_camera() {
        let dir = tempfile::tempdir().unwrap();
        let log = DetectionLog::new(dir.path().to_path_buf());
        let now = Utc::now();

        log.append("cam1", now, &[detection("person", 0.8)])
            .await
            .unwrap();
        log.append("cam1", now, &[detection("person", 0.5), detection("vehicle", 0.9)])
            .await
            .unwrap();
        log.append("cam2", now, &[]).await.unwrap();

        let cam1 = std::fs::read_to_string(log.file_path("cam1")).unwrap();
        let lines: Vec<&str> = cam1.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("person:1"));
        assert!(lines[0].ends_with("0.800"));
        assert!(lines[1].contains("person:1;vehicle:1"));
        assert!(lines[1].ends_with("0.900"));

        let cam2 = std::fs::read_to_string(log.file_path("cam2")).unwrap();
        assert_eq!(cam2.lines().count(), 1);
        assert!(cam2.trim_end().ends_with("0.000"));
    }
}
