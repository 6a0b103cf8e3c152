//! At-most-once gate for mutating requests.
//!
//! The first execution under a given `Idempotency-Key` runs to completion
//! and commits its response body; any later request with the same key
//! within the TTL gets that body back, byte for byte. Error outcomes never
//! commit, so a corrected retry can still succeed. Two racing first
//! executions may both observe a fresh start — the charge state machine is
//! the ultimate guard.

use std::sync::Arc;
use std::time::Duration;

use crate::ttl_cache::TtlCache;

pub struct IdempotencyStore {
    cache: Arc<TtlCache>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(cache: Arc<TtlCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Returns the cached response body when the key has already been
    /// consumed; `None` means this execution is fresh.
    pub fn begin(&self, key: &str) -> Option<String> {
        self.cache.get(&Self::cache_key(key))
    }

    /// Consume the key, caching the response body for replays.
    pub fn commit(&self, key: &str, response_body: &str) {
        self.cache.set_ex(&Self::cache_key(key), response_body, self.ttl);
    }

    fn cache_key(key: &str) -> String {
        format!("idempotency:{key}")
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl: Duration) -> IdempotencyStore {
        IdempotencyStore::new(Arc::new(TtlCache::new()), ttl)
    }

    #[test]
    fn test_fresh_key_then_replay() {
        let store = store(Duration::from_secs(300));
        assert_eq!(store.begin("key-1"), None);

        store.commit("key-1", r#"{"message":"Payment confirmed"}"#);
        assert_eq!(store.begin("key-1"), Some(r#"{"message":"Payment confirmed"}"#.into()));
    }

    #[test]
    fn test_uncommitted_key_stays_fresh() {
        let store = store(Duration::from_secs(300));
        assert_eq!(store.begin("key-1"), None);
        // No commit — e.g. the handler answered 400 or 503.
        assert_eq!(store.begin("key-1"), None);
    }

    #[test]
    fn test_key_expires() {
        let store = store(Duration::from_millis(10));
        store.commit("key-1", "cached");
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(store.begin("key-1"), None);
    }

    #[test]
    fn test_keys_are_namespaced() {
        let cache = Arc::new(TtlCache::new());
        let store = IdempotencyStore::new(Arc::clone(&cache), Duration::from_secs(300));
        store.commit("abc", "cached");
        assert_eq!(cache.get("idempotency:abc"), Some("cached".into()));
        assert_eq!(cache.get("abc"), None);
    }
}
