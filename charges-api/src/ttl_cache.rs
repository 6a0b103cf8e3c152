//! In-process key store with per-key TTL.
//!
//! Backs the expiration oracle, the idempotency store and the charge read
//! cache. Expiry is lazy: an entry is dropped when a lookup finds it past
//! its deadline — there is no background sweeper.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct TtlCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl TtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, expiring after `ttl`. Overwrites any previous
    /// entry and its deadline.
    pub fn set_ex(&self, key: &str, value: &str, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: Instant::now() + ttl },
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache = TtlCache::new();
        cache.set_ex("k", "v", Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some("v".into()));
        assert!(cache.exists("k"));
    }

    #[test]
    fn test_entry_expires() {
        let cache = TtlCache::new();
        cache.set_ex("k", "v", Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.exists("k"));
    }

    #[test]
    fn test_overwrite_resets_deadline() {
        let cache = TtlCache::new();
        cache.set_ex("k", "old", Duration::from_millis(10));
        cache.set_ex("k", "new", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get("k"), Some("new".into()));
    }

    #[test]
    fn test_delete() {
        let cache = TtlCache::new();
        cache.set_ex("k", "v", Duration::from_secs(60));
        cache.delete("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_missing_key() {
        let cache = TtlCache::new();
        assert_eq!(cache.get("absent"), None);
        assert!(!cache.exists("absent"));
    }
}
