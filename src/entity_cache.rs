//! Read-through snapshots of users, reports and owner-scoped listings.
//!
//! Every key with a load in flight carries an in-process generation that
//! [`EntityCache::invalidate`] bumps. A loaded value is only written back if its key's
//! generation did not move while the loader ran, so a slow read can never reinstate a
//! snapshot older than a committed write. The entry is dropped when the key's last load
//! finishes, so the table only grows with concurrent loads. A load whose future is
//! dropped mid-flight leaves its entry behind. Other processes sharing a persistent
//! cache may see stale entries until TTL.

use crate::core::cache::KeyValueCollection;
use crate::core::error::{ServiceError, ServiceResult};
use crate::core::model::{ReportId, UserId};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub mod keys {
    use super::{ReportId, UserId};

    pub fn user(id: UserId) -> String {
        format!("user:{id}")
    }

    pub fn report(id: ReportId) -> String {
        format!("report:{id}")
    }

    pub fn reports_by_owner(owner: UserId) -> String {
        format!("reports:user:{owner}")
    }

    pub fn expenses_by_owner(owner: UserId) -> String {
        format!("expenses:user:{owner}")
    }
}

#[derive(Debug, Default)]
struct Generation {
    value: u64,
    loads: usize,
}

pub struct EntityCache {
    cache: Arc<dyn KeyValueCollection>,
    generations: Mutex<HashMap<String, Generation>>,
}

impl EntityCache {
    pub fn new(cache: Arc<dyn KeyValueCollection>) -> Self {
        Self {
            cache,
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a load of `key` and returns the generation it started at.
    async fn begin_load(&self, key: &str) -> u64 {
        let mut generations = self.generations.lock().await;
        let generation = generations.entry(key.to_string()).or_default();
        generation.loads += 1;
        generation.value
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key.as_bytes()).await {
            Ok(Some(raw)) => match serde_json::from_slice(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!("Ignoring undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed for {}: {:#}", key, e);
                None
            }
        }
    }

    /// Ends a load started at `generation`, writing `raw` under `key` unless the key was
    /// invalidated since. Failures are logged; the caller already holds the value.
    async fn finish_load(&self, key: &str, generation: u64, raw: Option<&[u8]>, ttl: Duration) {
        let mut generations = self.generations.lock().await;
        let (current, idle) = match generations.get_mut(key) {
            Some(entry) => {
                entry.loads = entry.loads.saturating_sub(1);
                (entry.value, entry.loads == 0)
            }
            None => (generation, false),
        };
        if idle {
            generations.remove(key);
        }

        let Some(raw) = raw else {
            return;
        };
        if current != generation {
            debug!("Skipping stale write-back for {}", key);
            return;
        }
        if let Err(e) = self.cache.put(key.as_bytes(), raw, Some(ttl)).await {
            warn!("Failed to populate cache for {}: {:#}", key, e);
        }
    }

    /// Returns the cached value under `key`, or runs `loader` and caches its result.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> ServiceResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        if let Some(value) = self.lookup::<T>(key).await {
            return Ok(value);
        }

        let generation = self.begin_load(key).await;
        let value = match loader().await {
            Ok(value) => value,
            Err(e) => {
                self.finish_load(key, generation, None, ttl).await;
                return Err(e);
            }
        };
        let raw = serde_json::to_vec(&value)
            .inspect_err(|e| warn!("Failed to encode cache entry {}: {}", key, e))
            .ok();
        self.finish_load(key, generation, raw.as_deref(), ttl).await;
        Ok(value)
    }

    /// Like [`get_or_load`](Self::get_or_load), for keys that hold several results, e.g.
    /// one page per filter of an owner's listing. Adding an entry restarts the key's TTL.
    pub async fn get_or_load_entry<T, F, Fut>(
        &self,
        key: &str,
        entry: &str,
        ttl: Duration,
        loader: F,
    ) -> ServiceResult<T>
    where
        T: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let cached = self.lookup::<BTreeMap<String, T>>(key).await;
        if let Some(value) = cached.as_ref().and_then(|entries| entries.get(entry)) {
            return Ok(value.clone());
        }

        let generation = self.begin_load(key).await;
        let value = match loader().await {
            Ok(value) => value,
            Err(e) => {
                self.finish_load(key, generation, None, ttl).await;
                return Err(e);
            }
        };

        // Re-read so entries added by concurrent readers are kept
        let mut entries = self
            .lookup::<BTreeMap<String, T>>(key)
            .await
            .unwrap_or_default();
        entries.insert(entry.to_string(), value.clone());
        let raw = serde_json::to_vec(&entries)
            .inspect_err(|e| warn!("Failed to encode cache entry {}: {}", key, e))
            .ok();
        self.finish_load(key, generation, raw.as_deref(), ttl).await;
        Ok(value)
    }

    /// Drops every key before returning. A failed delete is an error since the
    /// mutation that called this would otherwise be shadowed by a stale snapshot.
    pub async fn invalidate(&self, keys: &[String]) -> ServiceResult<()> {
        let mut generations = self.generations.lock().await;
        for key in keys {
            if let Some(generation) = generations.get_mut(key) {
                generation.value += 1;
            }
            self.cache.remove(key.as_bytes()).await.map_err(|e| {
                ServiceError::Internal(e.context(format!("Failed to invalidate cache key {key}")))
            })?;
            debug!("Invalidated {}", key);
        }
        Ok(())
    }
}
