//! Sentinel - Anomaly Event State Machine
//!
//! ## Responsibilities
//!
//! - Turn a stream of per-frame detection verdicts into bounded events
//! - Drive evidence recording and alert emission through transitions
//! - Periodic heartbeat while an event stays active
//!
//! ## Design
//!
//! - Two states, `Idle` and `EventActive`; owned exclusively by one worker's
//!   processing loop and never shared
//! - Exactly one `EventStarted` per event and one `EventFinished`, in order
//! - Events close only after a full cooldown with zero positive frames

use chrono::{DateTime, Duration, Utc};

/// Timing knobs for the state machine
#[derive(Debug, Clone, Copy)]
pub struct SentinelPolicy {
    /// Quiet period after the last positive frame before the event closes
    pub cooldown: Duration,
    /// Interval between heartbeat transitions while active
    pub heartbeat_interval: Duration,
}

impl SentinelPolicy {
    pub fn new(cooldown_sec: u64, heartbeat_sec: u64) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_sec as i64),
            heartbeat_interval: Duration::seconds(heartbeat_sec as i64),
        }
    }
}

impl Default for SentinelPolicy {
    fn default() -> Self {
        Self::new(5, 10)
    }
}

/// Transition emitted by one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentinelTransition {
    /// Idle -> EventActive; open a recording, emit one detected alert
    EventStarted,
    /// Still active past the heartbeat interval; alert without a new recording
    Heartbeat,
    /// EventActive -> Idle after cooldown; finalize the recording, emit finished
    EventFinished,
}

/// Sentinel state machine for one camera
#[derive(Debug)]
pub struct Sentinel {
    policy: SentinelPolicy,
    is_event_active: bool,
    last_detection_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    /// Positive frames observed during the current event
    current_count: u64,
}

impl Sentinel {
    pub fn new(policy: SentinelPolicy) -> Self {
        Self {
            policy,
            is_event_active: false,
            last_detection_at: None,
            last_heartbeat_at: None,
            current_count: 0,
        }
    }

    /// Whether an event is currently open
    pub fn is_event_active(&self) -> bool {
        self.is_event_active
    }

    /// Positive frames seen during the current event
    pub fn current_count(&self) -> u64 {
        self.current_count
    }

    /// Feed one frame's verdict. At most one transition per observation.
    pub fn observe(&mut self, positive: bool, now: DateTime<Utc>) -> Option<SentinelTransition> {
        if positive {
            self.last_detection_at = Some(now);
            self.current_count += 1;

            if !self.is_event_active {
                self.is_event_active = true;
                self.last_heartbeat_at = Some(now);
                self.current_count = 1;
                return Some(SentinelTransition::EventStarted);
            }

            if let Some(last_hb) = self.last_heartbeat_at {
                if now - last_hb >= self.policy.heartbeat_interval {
                    self.last_heartbeat_at = Some(now);
                    return Some(SentinelTransition::Heartbeat);
                }
            }
            return None;
        }

        if self.is_event_active {
            if let Some(last) = self.last_detection_at {
                if now - last >= self.policy.cooldown {
                    self.reset();
                    return Some(SentinelTransition::EventFinished);
                }
            }
        }
        None
    }

    /// Close an open event unconditionally (worker shutdown path).
    ///
    /// Returns true if an event was open; the caller must finalize the
    /// recording and emit the finished alert exactly as for a cooldown close.
    pub fn force_close(&mut self) -> bool {
        if self.is_event_active {
            self.reset();
            true
        } else {
            false
        }
    }

    fn reset(&mut self) {
        self.is_event_active = false;
        self.last_detection_at = None;
        self.last_heartbeat_at = None;
        self.current_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(seconds)
    }

    fn sentinel() -> Sentinel {
        Sentinel::new(SentinelPolicy::new(5, 10))
    }

    #[test]
    fn test_burst_yields_one_detected_then_one_finished() {
        let mut s = sentinel();
        let mut transitions = Vec::new();

        // 10 positive frames one second apart
        for i in 0..10 {
            if let Some(t) = s.observe(true, at(i)) {
                transitions.push(t);
            }
        }
        // negatives until well past cooldown
        for i in 10..20 {
            if let Some(t) = s.observe(false, at(i)) {
                transitions.push(t);
            }
        }

        assert_eq!(
            transitions,
            vec![
                SentinelTransition::EventStarted,
                SentinelTransition::EventFinished
            ]
        );
        assert!(!s.is_event_active());
    }

    #[test]
    fn test_single_positive_frame_still_pairs() {
        let mut s = sentinel();
        assert_eq!(s.observe(true, at(0)), Some(SentinelTransition::EventStarted));
        assert_eq!(s.observe(false, at(1)), None);
        assert_eq!(s.observe(false, at(4)), None);
        assert_eq!(
            s.observe(false, at(5)),
            Some(SentinelTransition::EventFinished)
        );
    }

    #[test]
    fn test_positive_frame_refreshes_cooldown() {
        let mut s = sentinel();
        s.observe(true, at(0));
        s.observe(false, at(3));
        // new positive before cooldown expiry keeps the same event open
        assert_eq!(s.observe(true, at(4)), None);
        assert_eq!(s.observe(false, at(8)), None);
        assert_eq!(
            s.observe(false, at(9)),
            Some(SentinelTransition::EventFinished)
        );
    }

    #[test]
    fn test_no_duplicate_detected_while_active() {
        let mut s = sentinel();
        let mut started = 0;
        for i in 0..8 {
            if s.observe(true, at(i)) == Some(SentinelTransition::EventStarted) {
                started += 1;
            }
        }
        assert_eq!(started, 1);
    }

    #[test]
    fn test_heartbeat_fires_without_new_event() {
        let mut s = sentinel();
        assert_eq!(s.observe(true, at(0)), Some(SentinelTransition::EventStarted));
        assert_eq!(s.observe(true, at(5)), None);
        assert_eq!(s.observe(true, at(10)), Some(SentinelTransition::Heartbeat));
        assert_eq!(s.observe(true, at(15)), None);
        assert_eq!(s.observe(true, at(20)), Some(SentinelTransition::Heartbeat));
        assert!(s.is_event_active());
    }

    #[test]
    fn test_two_separate_events() {
        let mut s = sentinel();
        assert_eq!(s.observe(true, at(0)), Some(SentinelTransition::EventStarted));
        assert_eq!(
            s.observe(false, at(5)),
            Some(SentinelTransition::EventFinished)
        );
        assert_eq!(
            s.observe(true, at(6)),
            Some(SentinelTransition::EventStarted)
        );
        assert_eq!(
            s.observe(false, at(11)),
            Some(SentinelTransition::EventFinished)
        );
    }

    #[test]
    fn test_force_close_only_when_active() {
        let mut s = sentinel();
        assert!(!s.force_close());
        s.observe(true, at(0));
        assert!(s.force_close());
        assert!(!s.is_event_active());
        assert!(!s.force_close());
    }

    #[test]
    fn test_count_tracks_positive_frames() {
        let mut s = sentinel();
        for i in 0..4 {
            s.observe(true, at(i));
        }
        assert_eq!(s.current_count(), 4);
        s.observe(false, at(10));
        assert_eq!(s.current_count(), 0);
    }
}
