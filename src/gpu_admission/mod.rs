//! GpuAdmission - Accelerator Slot Control
//!
//! ## Responsibilities
//!
//! - Fixed-capacity slot table shared across all workers
//! - Grant/deny per camera, first-request-wins under one lock
//! - Recommended execution mode query (accelerated vs CPU fallback)
//!
//! ## Design
//!
//! - No preemption, ever: a later higher-priority request never evicts a holder
//! - Denial is not an error; the caller falls back to slower execution
//! - All decisions are O(1) and non-blocking (deny, never wait)

use std::collections::HashMap;
use tokio::sync::Mutex;

/// Execution mode recommended for a camera's detection backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Holds an accelerator slot; full resolution, reduced precision, denser cadence
    Accelerated,
    /// CPU fallback; lower resolution, sparser cadence
    Fallback,
}

/// Static priority for a detector kind.
///
/// Priority only breaks ties between simultaneous new requests; it never
/// reorders or evicts existing holders.
pub fn priority_for_kind(detector_kind: &str) -> u8 {
    match detector_kind {
        "intrusion" => 100,
        "vehicle" => 80,
        "person" => 60,
        "motion" => 50,
        _ => 10,
    }
}

/// Slot table shared across workers, lifetime = supervisor lifetime
struct SlotTable {
    capacity: usize,
    assigned: HashMap<String, u8>,
}

/// GpuAdmission instance
pub struct GpuAdmission {
    table: Mutex<SlotTable>,
}

impl GpuAdmission {
    /// Create with a fixed slot capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(SlotTable {
                capacity,
                assigned: HashMap::new(),
            }),
        }
    }

    /// Request a slot for a camera. Returns true when granted.
    ///
    /// Idempotent: a camera that already holds a slot is granted again without
    /// consuming a second slot.
    pub async fn request_slot(&self, camera_id: &str, detector_kind: &str) -> bool {
        let mut table = self.table.lock().await;

        if table.assigned.contains_key(camera_id) {
            return true;
        }

        if table.assigned.len() < table.capacity {
            let priority = priority_for_kind(detector_kind);
            table.assigned.insert(camera_id.to_string(), priority);
            tracing::info!(
                camera_id = %camera_id,
                detector = %detector_kind,
                priority = priority,
                used = table.assigned.len(),
                capacity = table.capacity,
                "GPU slot granted"
            );
            true
        } else {
            tracing::info!(
                camera_id = %camera_id,
                detector = %detector_kind,
                capacity = table.capacity,
                "GPU slots exhausted, falling back to CPU"
            );
            false
        }
    }

    /// Release a camera's slot. Idempotent; releasing a slot never held is a no-op.
    pub async fn release_slot(&self, camera_id: &str) {
        let mut table = self.table.lock().await;
        if table.assigned.remove(camera_id).is_some() {
            tracing::info!(
                camera_id = %camera_id,
                used = table.assigned.len(),
                "GPU slot released"
            );
        }
    }

    /// Recommended execution mode for a camera
    pub async fn get_recommended_mode(&self, camera_id: &str) -> ExecMode {
        let table = self.table.lock().await;
        if table.assigned.contains_key(camera_id) {
            ExecMode::Accelerated
        } else {
            ExecMode::Fallback
        }
    }

    /// Number of slots currently assigned
    pub async fn used(&self) -> usize {
        self.table.lock().await.assigned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_grant_until_capacity() {
        let admission = GpuAdmission::new(2);
        assert!(admission.request_slot("cam1", "person").await);
        assert!(admission.request_slot("cam2", "vehicle").await);
        assert!(!admission.request_slot("cam3", "intrusion").await);
        assert_eq!(admission.used().await, 2);
    }

    #[tokio::test]
    async fn test_no_preemption_by_higher_priority() {
        // capacity=2, requests arrive [person, vehicle, intrusion]:
        // the first two hold slots, intrusion falls back, nobody is evicted
        let admission = GpuAdmission::new(2);
        assert!(admission.request_slot("cam-person", "person").await);
        assert!(admission.request_slot("cam-vehicle", "vehicle").await);
        assert!(!admission.request_slot("cam-intrusion", "intrusion").await);

        assert_eq!(
            admission.get_recommended_mode("cam-person").await,
            ExecMode::Accelerated
        );
        assert_eq!(
            admission.get_recommended_mode("cam-vehicle").await,
            ExecMode::Accelerated
        );
        assert_eq!(
            admission.get_recommended_mode("cam-intrusion").await,
            ExecMode::Fallback
        );
    }

    #[tokio::test]
    async fn test_request_is_idempotent_per_camera() {
        let admission = GpuAdmission::new(1);
        assert!(admission.request_slot("cam1", "person").await);
        assert!(admission.request_slot("cam1", "person").await);
        assert_eq!(admission.used().await, 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let admission = GpuAdmission::new(2);
        admission.request_slot("cam1", "person").await;
        admission.release_slot("cam1").await;
        admission.release_slot("cam1").await;
        admission.release_slot("never-held").await;
        assert_eq!(admission.used().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_invariant_over_sequences() {
        let admission = GpuAdmission::new(2);
        for i in 0..20 {
            let id = format!("cam{}", i % 5);
            if i % 3 == 0 {
                admission.release_slot(&id).await;
            } else {
                admission.request_slot(&id, "motion").await;
            }
            assert!(admission.used().await <= 2);
        }
    }

    #[tokio::test]
    async fn test_release_frees_slot_for_next_request() {
        let admission = GpuAdmission::new(1);
        assert!(admission.request_slot("cam1", "person").await);
        assert!(!admission.request_slot("cam2", "intrusion").await);
        admission.release_slot("cam1").await;
        assert!(admission.request_slot("cam2", "intrusion").await);
    }

    #[test]
    fn test_priority_table() {
        assert!(priority_for_kind("intrusion") > priority_for_kind("vehicle"));
        assert!(priority_for_kind("vehicle") > priority_for_kind("person"));
        assert!(priority_for_kind("person") > priority_for_kind("motion"));
    }
}
