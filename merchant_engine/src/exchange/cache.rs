use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;

/// A per-exchange cache whose entries expire after a fixed time.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    /// Returns the cached value if it has not expired yet.
    pub async fn get(&self, key: &str) -> Option<T> {
        let guard = self.entries.read().await;
        let (expires_at, value) = guard.get(key)?;
        (Instant::now() < *expires_at).then(|| value.clone())
    }

    pub async fn insert(&self, key: &str, value: T) {
        let mut guard = self.entries.write().await;
        guard.insert(key.to_string(), (Instant::now() + self.ttl, value));
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn entries_expire() {
        let cache = TtlCache::new(Duration::from_millis(30));
        cache.insert("https://ex.test/", 5u32).await;
        assert_eq!(cache.get("https://ex.test/").await, Some(5));
        assert_eq!(cache.get("https://other.test/").await, None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("https://ex.test/").await, None);
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.insert("a", 1u8).await;
        assert_eq!(cache.get("a").await, None);
    }
}
