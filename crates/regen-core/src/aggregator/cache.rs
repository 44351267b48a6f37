use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

struct Entry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

/// Per-kind TTL cache. An unexpired entry is always served, even if the
/// upstream has newer data.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if now - entry.stored_at < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, value: V, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: now,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_expires_after_ttl() {
        let cache = TtlCache::new(Duration::minutes(10));
        let t0 = Utc::now();
        cache.insert("agent", 1, t0);
        assert_eq!(cache.get("agent", t0 + Duration::minutes(9)), Some(1));
        assert_eq!(cache.get("agent", t0 + Duration::minutes(10)), None);
        assert!(!cache.invalidate("agent"), "expired entry should be evicted on read");
    }

    #[test]
    fn invalidate_drops_single_key() {
        let cache = TtlCache::new(Duration::minutes(10));
        let t0 = Utc::now();
        cache.insert("a", "x".to_string(), t0);
        cache.insert("b", "y".to_string(), t0);
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.get("a", t0), None);
        assert_eq!(cache.get("b", t0), Some("y".to_string()));
    }
}
