use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::services::kv::KvStore;

/// Outcome of a rate-limit check, carrying everything the middleware needs
/// for the `X-RateLimit-*` and `Retry-After` headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

/// Fixed-window counters over the shared KV store.
///
/// Store failures fail open: the limiter is a defense layer, not a
/// correctness dependency, and the store itself already degrades to memory
/// before an error reaches here.
#[derive(Clone)]
pub struct RateLimitService {
    store: Arc<dyn KvStore>,
}

impl RateLimitService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn check(
        &self,
        scope: &str,
        key: &str,
        limit: u64,
        window_secs: u64,
    ) -> RateLimitDecision {
        let store_key = format!("rl:{}:{}", scope, key);

        match self.store.incr_window(&store_key, window_secs).await {
            Ok((count, reset_secs)) => RateLimitDecision {
                allowed: count <= limit,
                limit,
                remaining: limit.saturating_sub(count),
                reset_secs,
            },
            Err(err) => {
                tracing::warn!(error = %err, scope, "rate limit store error; failing open");
                RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_secs: window_secs,
                }
            }
        }
    }
}

/// Short stable hash for building composite limiter keys from PII-adjacent
/// values (email, user-agent) without storing them.
pub fn key_component(value: &str) -> String {
    hex::encode(&Sha256::digest(value.as_bytes())[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kv::MemoryKvStore;

    fn service() -> RateLimitService {
        RateLimitService::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let service = service();
        for i in 1..=5u64 {
            let decision = service.check("auth", "1.2.3.4", 5, 60).await;
            assert!(decision.allowed, "request {} should pass", i);
            assert_eq!(decision.remaining, 5 - i);
        }
        let decision = service.check("auth", "1.2.3.4", 5, 60).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.reset_secs > 0);
    }

    #[tokio::test]
    async fn scopes_and_keys_are_isolated() {
        let service = service();
        for _ in 0..5 {
            service.check("auth", "1.2.3.4", 5, 60).await;
        }
        assert!(!service.check("auth", "1.2.3.4", 5, 60).await.allowed);
        assert!(service.check("auth", "5.6.7.8", 5, 60).await.allowed);
        assert!(service.check("strict", "1.2.3.4", 3, 60).await.allowed);
    }

    #[test]
    fn key_component_is_stable_and_short() {
        assert_eq!(key_component("a@b.c"), key_component("a@b.c"));
        assert_ne!(key_component("a@b.c"), key_component("x@y.z"));
        assert_eq!(key_component("a@b.c").len(), 16);
    }
}
