use crate::core::cache::KeyValueCollection;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct CacheValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// In-memory collection backed by an ordered map behind an async mutex
#[derive(Default)]
pub struct MemoryCollection {
    inner: Mutex<BTreeMap<Vec<u8>, CacheValue>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut entries = self.inner.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => true,
            Some(entry) => {
                debug!("Cache HIT for key: {}", String::from_utf8_lossy(key));
                return Ok(Some(entry.value.clone()));
            }
            None => false,
        };
        if expired {
            debug!(
                "Cache entry expired for key: {}",
                String::from_utf8_lossy(key)
            );
            entries.remove(key);
        } else {
            debug!("Cache MISS for key: {}", String::from_utf8_lossy(key));
        }
        Ok(None)
    }

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|duration| Instant::now() + duration);
        let mut entries = self.inner.lock().await;
        debug!("Cache PUT for key: {}", String::from_utf8_lossy(key));
        entries.insert(
            key.to_vec(),
            CacheValue {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> Result<()> {
        let mut entries = self.inner.lock().await;
        entries.remove(key);
        debug!("Cache REMOVE for key: {}", String::from_utf8_lossy(key));
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let now = Instant::now();
        let entries = self.inner.lock().await;
        Ok(entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lock().await.clear();
        debug!("Cache CLEAR");
        Ok(())
    }
}
