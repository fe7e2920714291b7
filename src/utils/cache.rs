use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct CacheEntry<T> {
    stored_at: Instant,
    value: T,
}

/// In-memory cache keyed by ticker symbol. Entries expire after a fixed TTL;
/// expired entries are dropped lazily on lookup.
pub struct TtlCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                debug!(key, age_secs = entry.stored_at.elapsed().as_secs(), "Cache hit");
                Some(entry.value.clone())
            }
            Some(_) => {
                debug!(key, ttl_secs = self.ttl.as_secs(), "Cache expired");
                entries.remove(key);
                None
            }
            None => {
                debug!(key, "Cache miss");
                None
            }
        }
    }

    pub async fn insert(&self, key: &str, value: T) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                stored_at: Instant::now(),
                value,
            },
        );
    }
}
