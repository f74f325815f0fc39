//! Per-parrot result cache.
//!
//! Keyed by a fingerprint of (parrot, user, normalised input) with a TTL
//! and an LRU capacity bound. Hits short-circuit the executor entirely.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    content: String,
    stored_at: Instant,
    last_used: Instant,
}

#[derive(Debug)]
pub struct ResultCache {
    parrot: String,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl ResultCache {
    pub fn new(parrot: impl Into<String>, ttl: Duration, capacity: usize) -> Self {
        Self {
            parrot: parrot.into(),
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lowercase, trim, collapse runs of whitespace.
    fn normalize(input: &str) -> String {
        input.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    pub fn fingerprint(&self, user_id: i64, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.parrot.as_bytes());
        hasher.update([0]);
        hasher.update(user_id.to_le_bytes());
        hasher.update([0]);
        hasher.update(Self::normalize(input).as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    pub fn get(&self, user_id: i64, input: &str) -> Option<String> {
        let key = self.fingerprint(user_id, input);
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&key)?;
        if entry.stored_at.elapsed() >= self.ttl {
            entries.remove(&key);
            return None;
        }
        entry.last_used = Instant::now();
        Some(entry.content.clone())
    }

    pub fn put(&self, user_id: i64, input: &str, content: &str) {
        let key = self.fingerprint(user_id, input);
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // Expired first, least-recently-used second.
            entries.retain(|_, e| e.stored_at.elapsed() < self.ttl);
            if entries.len() >= self.capacity {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            Entry {
                content: content.to_owned(),
                stored_at: now,
                last_used: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ResultCache {
        ResultCache::new("memo", Duration::from_secs(300), 4)
    }

    #[test]
    fn hit_after_put() {
        let c = cache();
        assert!(c.get(1, "搜索 Go 笔记").is_none());
        c.put(1, "搜索 Go 笔记", "三条结果");
        assert_eq!(c.get(1, "搜索 Go 笔记").unwrap(), "三条结果");
    }

    #[test]
    fn normalisation_merges_equivalent_inputs() {
        let c = cache();
        c.put(1, "  搜索   Go 笔记 ", "result");
        assert_eq!(c.get(1, "搜索 go 笔记").unwrap(), "result");
    }

    #[test]
    fn scoped_per_user() {
        let c = cache();
        c.put(1, "query", "user1 result");
        assert!(c.get(2, "query").is_none());
    }

    #[test]
    fn ttl_expiry() {
        let c = ResultCache::new("memo", Duration::ZERO, 4);
        c.put(1, "query", "result");
        assert!(c.get(1, "query").is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let c = ResultCache::new("memo", Duration::from_secs(300), 2);
        c.put(1, "a", "ra");
        c.put(1, "b", "rb");
        // Touch "a" so "b" is the least recently used.
        assert!(c.get(1, "a").is_some());
        c.put(1, "c", "rc");
        assert_eq!(c.len(), 2);
        assert!(c.get(1, "a").is_some());
        assert!(c.get(1, "b").is_none());
        assert!(c.get(1, "c").is_some());
    }

    #[test]
    fn fingerprints_differ_by_parrot() {
        let a = ResultCache::new("memo", Duration::from_secs(1), 2);
        let b = ResultCache::new("schedule", Duration::from_secs(1), 2);
        assert_ne!(a.fingerprint(1, "query"), b.fingerprint(1, "query"));
    }
}
