//! Session liveness pings.

use crate::errors::GatewayError;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Counts consecutive failures so only the first of a run gets reported.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: u32,
}

impl FailureTracker {
    /// Returns true when this failure starts a new run.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        self.consecutive == 1
    }

    /// Returns the length of the run that just ended, if any.
    pub fn record_success(&mut self) -> Option<u32> {
        let ended = self.consecutive;
        self.consecutive = 0;
        (ended > 0).then_some(ended)
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Ping every `interval` until `cancel` fires. The first tick is one interval out.
pub async fn run<F, Fut>(interval: Duration, cancel: CancellationToken, mut ping: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), GatewayError>>,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = FailureTracker::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = ping() => outcome,
        };

        match outcome {
            Ok(()) => {
                if let Some(run) = failures.record_success() {
                    log::info!("Gateway keepalive recovered after {} failure(s)", run);
                }
            }
            Err(e) => {
                if failures.record_failure() {
                    log::warn!("Gateway keepalive failed: {}", e);
                } else {
                    log::debug!(
                        "Gateway keepalive still failing ({} in a row): {}",
                        failures.consecutive(),
                        e
                    );
                }
            }
        }
    }

    log::debug!("Keepalive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_only_first_failure_in_run_is_reported() {
        let mut tracker = FailureTracker::default();
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert_eq!(tracker.record_success(), Some(3));
        assert_eq!(tracker.record_success(), None);
        assert!(tracker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_pings_until_cancelled() {
        let cancel = CancellationToken::new();
        let pings = Arc::new(AtomicU32::new(0));

        let task = {
            let cancel = cancel.clone();
            let pings = Arc::clone(&pings);
            tokio::spawn(run(Duration::from_secs(25), cancel, move || {
                let pings = Arc::clone(&pings);
                async move {
                    let n = pings.fetch_add(1, Ordering::SeqCst);
                    if n % 2 == 0 {
                        Err(GatewayError::TimeoutError {
                            transaction: n.to_string(),
                            timeout_ms: 5000,
                        })
                    } else {
                        Ok(())
                    }
                }
            }))
        };

        tokio::time::sleep(Duration::from_secs(80)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(pings.load(Ordering::SeqCst), 3);
    }
}
