//! Distributed failed-login tracking with progressive delay and lockout.

use std::sync::Arc;
use std::time::Duration;

use crate::services::kv::KvStore;
use crate::services::rate_limit::key_component;

/// Failure window.
pub const WINDOW_SECS: u64 = 900;
/// Failures within the window before a block.
pub const MAX_FAILURES: u64 = 5;
/// Block duration once the threshold is hit.
pub const BLOCK_SECS: u64 = 1800;
/// Per-attempt delay schedule, indexed by prior failure count.
pub const PROGRESSIVE_DELAYS_MS: [u64; 5] = [0, 1000, 2000, 5000, 10_000];

/// Result of recording a failure.
#[derive(Debug, Clone, Copy)]
pub struct FailureOutcome {
    pub count: u64,
    pub blocked: bool,
}

#[derive(Clone)]
pub struct FailedLoginTracker {
    store: Arc<dyn KvStore>,
}

impl FailedLoginTracker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Tracker key: `ip` alone, or `ip` plus a hash of the lowercased email
    /// so one address cannot burn the budget of a whole NAT.
    pub fn key_for(ip: &str, email: Option<&str>) -> String {
        match email {
            Some(email) => format!("fl:{}:{}", ip, key_component(&email.to_lowercase())),
            None => format!("fl:{}", ip),
        }
    }

    fn block_key(key: &str) -> String {
        format!("{}:block", key)
    }

    /// Remaining block seconds, if the key is currently blocked.
    pub async fn check_blocked(&self, key: &str) -> Option<u64> {
        match self.store.flag_ttl(&Self::block_key(key)).await {
            Ok(ttl) => ttl,
            Err(err) => {
                tracing::warn!(error = %err, "failed-login block check failed; failing open");
                None
            }
        }
    }

    /// Record one failure. Counter updates are atomic per key, so a burst
    /// of concurrent attempts cannot slip under the threshold. At
    /// `MAX_FAILURES` the key is blocked for `BLOCK_SECS`.
    pub async fn record_failure(&self, key: &str) -> FailureOutcome {
        let count = match self.store.incr_window(key, WINDOW_SECS).await {
            Ok((count, _)) => count,
            Err(err) => {
                tracing::warn!(error = %err, "failed-login counter update failed");
                return FailureOutcome {
                    count: 0,
                    blocked: false,
                };
            }
        };

        let blocked = count >= MAX_FAILURES;
        if blocked {
            if let Err(err) = self.store.set_flag(&Self::block_key(key), BLOCK_SECS).await {
                tracing::warn!(error = %err, "failed to set login block");
            }
        }

        FailureOutcome { count, blocked }
    }

    /// A successful login clears the record.
    pub async fn record_success(&self, key: &str) {
        for k in [key.to_string(), Self::block_key(key)] {
            if let Err(err) = self.store.delete(&k).await {
                tracing::warn!(error = %err, "failed to clear login failure record");
            }
        }
    }

    /// Delay owed before the next attempt, from the schedule indexed by the
    /// current failure count.
    pub async fn progressive_delay(&self, key: &str) -> Duration {
        let count = self.store.get_counter(key).await.unwrap_or(0) as usize;
        let idx = count.min(PROGRESSIVE_DELAYS_MS.len() - 1);
        Duration::from_millis(PROGRESSIVE_DELAYS_MS[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::MemoryKvStore;

    fn tracker() -> FailedLoginTracker {
        FailedLoginTracker::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn fifth_failure_blocks_for_thirty_minutes() {
        let tracker = tracker();
        let key = FailedLoginTracker::key_for("203.0.113.10", Some("bob@example.com"));

        for i in 1..=4u64 {
            let outcome = tracker.record_failure(&key).await;
            assert_eq!(outcome.count, i);
            assert!(!outcome.blocked);
            assert_eq!(tracker.check_blocked(&key).await, None);
        }

        let outcome = tracker.record_failure(&key).await;
        assert!(outcome.blocked);

        let remaining = tracker.check_blocked(&key).await.unwrap();
        assert!(remaining > BLOCK_SECS - 60 && remaining <= BLOCK_SECS);
    }

    #[tokio::test]
    async fn success_clears_the_record() {
        let tracker = tracker();
        let key = FailedLoginTracker::key_for("203.0.113.10", None);

        for _ in 0..5 {
            tracker.record_failure(&key).await;
        }
        assert!(tracker.check_blocked(&key).await.is_some());

        tracker.record_success(&key).await;
        assert_eq!(tracker.check_blocked(&key).await, None);
        let outcome = tracker.record_failure(&key).await;
        assert_eq!(outcome.count, 1);
    }

    #[tokio::test]
    async fn progressive_delay_follows_schedule() {
        let tracker = tracker();
        let key = FailedLoginTracker::key_for("198.51.100.7", None);

        assert_eq!(tracker.progressive_delay(&key).await.as_millis(), 0);

        let expected = [1000u128, 2000, 5000, 10_000, 10_000, 10_000];
        for want in expected {
            tracker.record_failure(&key).await;
            assert_eq!(tracker.progressive_delay(&key).await.as_millis(), want);
        }
    }

    #[test]
    fn keys_differ_by_email() {
        let a = FailedLoginTracker::key_for("1.2.3.4", Some("a@b.c"));
        let b = FailedLoginTracker::key_for("1.2.3.4", Some("x@y.z"));
        let c = FailedLoginTracker::key_for("1.2.3.4", None);
        assert_ne!(a, b);
        assert_ne!(a, c);
        // Case-insensitive on email
        assert_eq!(a, FailedLoginTracker::key_for("1.2.3.4", Some("A@B.C")));
    }
}
