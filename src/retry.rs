//! Shared retry helper
//!
//! Every network/subprocess boundary retries with the same fixed-backoff shape.
//! The first failure of an episode is WARNING-level (the offline transition);
//! later attempts of the same episode repeat at debug.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Retry `op` until it succeeds or `stop` is raised.
///
/// Returns `None` only when cancelled. The first failure is logged WARNING,
/// repeats of the same episode at debug; each attempt is followed by a fixed
/// backoff whose sleep is interruptible so a stop request takes effect
/// within ~250ms.
pub async fn retry_until_stopped<T, E, F, Fut>(
    what: &str,
    camera_id: &str,
    backoff: Duration,
    stop: &AtomicBool,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failures: u64 = 0;
    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }

        match op().await {
            Ok(value) => return Some(value),
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    tracing::warn!(
                        camera_id = %camera_id,
                        error = %e,
                        backoff_sec = backoff.as_secs_f64(),
                        "{} failed, retrying after backoff",
                        what
                    );
                } else {
                    tracing::debug!(
                        camera_id = %camera_id,
                        error = %e,
                        failures = failures,
                        "{} still failing, retrying",
                        what
                    );
                }
            }
        }

        if !sleep_interruptible(backoff, stop).await {
            return None;
        }
    }
}

/// Sleep for `duration`, polling `stop` every 250ms.
///
/// Returns false if the stop flag was raised before the full duration elapsed.
pub async fn sleep_interruptible(duration: Duration, stop: &AtomicBool) -> bool {
    let slice = Duration::from_millis(250);
    let mut remaining = duration;
    while !remaining.is_zero() {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
    !stop.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_returns_first_success() {
        let stop = AtomicBool::new(false);
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_until_stopped(
            "test op",
            "cam1",
            Duration::from_millis(1),
            &stop,
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("not yet")
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Some(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stop_flag_cancels() {
        let stop = AtomicBool::new(true);
        let result: Option<u32> = retry_until_stopped(
            "test op",
            "cam1",
            Duration::from_millis(1),
            &stop,
            || async { Err::<u32, _>("never") },
        )
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_sleep_interruptible_honors_stop() {
        let stop = AtomicBool::new(true);
        let completed = sleep_interruptible(Duration::from_secs(10), &stop).await;
        assert!(!completed);
    }
}
