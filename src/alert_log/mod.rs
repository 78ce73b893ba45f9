//! AlertLog - Alert Recording (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Store alert events in a bounded ring buffer
//! - Fan out new alerts to subscribers
//! - Provide alert queries per camera

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// Alert lifecycle marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Event opened
    Detected,
    /// Periodic reminder while the event stays open
    Heartbeat,
    /// Event closed
    Finished,
}

/// Alert event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: Uuid,
    pub camera_id: String,
    pub message: String,
    pub level: AlertLevel,
    pub status: AlertStatus,
    /// Relative paths to evidence artifacts (video, thumbnail)
    pub evidence_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(
        camera_id: &str,
        message: String,
        level: AlertLevel,
        status: AlertStatus,
        evidence_refs: Vec<String>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            camera_id: camera_id.to_string(),
            message,
            level,
            status,
            evidence_refs,
            created_at: Utc::now(),
        }
    }
}

/// Ring buffer for alerts
struct AlertRingBuffer {
    alerts: VecDeque<AlertEvent>,
    capacity: usize,
}

impl AlertRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, alert: AlertEvent) {
        if self.alerts.len() >= self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }
}

/// AlertLog instance
pub struct AlertLog {
    buffer: RwLock<AlertRingBuffer>,
    tx: broadcast::Sender<AlertEvent>,
}

impl AlertLog {
    /// Create new AlertLog
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            buffer: RwLock::new(AlertRingBuffer::new(capacity)),
            tx,
        }
    }

    /// Record an alert and notify subscribers
    pub async fn push(&self, alert: AlertEvent) {
        tracing::info!(
            camera_id = %alert.camera_id,
            level = ?alert.level,
            status = ?alert.status,
            message = %alert.message,
            "Alert"
        );
        {
            let mut buffer = self.buffer.write().await;
            buffer.push(alert.clone());
        }
        // Delivery is best-effort; no subscribers is fine
        let _ = self.tx.send(alert);
    }

    /// Subscribe to new alerts
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.tx.subscribe()
    }

    /// Latest alerts, newest first
    pub async fn get_latest(&self, count: usize) -> Vec<AlertEvent> {
        let buffer = self.buffer.read().await;
        buffer.alerts.iter().rev().take(count).cloned().collect()
    }

    /// Latest alerts for one camera, newest first
    pub async fn get_by_camera(&self, camera_id: &str, count: usize) -> Vec<AlertEvent> {
        let buffer = self.buffer.read().await;
        buffer
            .alerts
            .iter()
            .rev()
            .filter(|a| a.camera_id == camera_id)
            .take(count)
            .cloned()
            .collect()
    }

    /// Number of alerts currently held
    pub async fn count(&self) -> usize {
        self.buffer.read().await.alerts.len()
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(camera_id: &str, status: AlertStatus) -> AlertEvent {
        AlertEvent::new(
            camera_id,
            "test".to_string(),
            AlertLevel::Warning,
            status,
            vec![],
        )
    }

    #[tokio::test]
    async fn test_push_and_query() {
        let log = AlertLog::new(10);
        log.push(alert("cam1", AlertStatus::Detected)).await;
        log.push(alert("cam2", AlertStatus::Detected)).await;
        log.push(alert("cam1", AlertStatus::Finished)).await;

        assert_eq!(log.count().await, 3);
        let cam1 = log.get_by_camera("cam1", 10).await;
        assert_eq!(cam1.len(), 2);
        assert_eq!(cam1[0].status, AlertStatus::Finished);
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let log = AlertLog::new(3);
        for i in 0..5 {
            log.push(alert(&format!("cam{}", i), AlertStatus::Detected))
                .await;
        }
        assert_eq!(log.count().await, 3);
        let latest = log.get_latest(10).await;
        assert_eq!(latest[0].camera_id, "cam4");
        assert_eq!(latest[2].camera_id, "cam2");
    }

    #[tokio::test]
    async fn test_subscribers_receive_alerts() {
        let log = AlertLog::new(10);
        let mut rx = log.subscribe();
        log.push(alert("cam1", AlertStatus::Detected)).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.camera_id, "cam1");
    }
}
