//! Key-value storage abstractions shared by the cache layers and the repositories

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// A named collection of byte keys to byte values with an optional expiry per entry.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    /// Returns the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> Result<()>;

    async fn remove(&self, key: &[u8]) -> Result<()>;

    /// Returns every unexpired entry, ordered by key.
    async fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    async fn clear(&self) -> Result<()>;
}

/// Hands out named collections, either persisted to disk or held in memory.
pub trait Store: Send + Sync {
    fn get_collection(&self, name: &str, persist: bool) -> Result<Arc<dyn KeyValueCollection>>;

    fn remove_collection(&self, name: &str) -> bool;
}
