pub mod disk;
pub mod memory;
pub mod repository;

use crate::core::cache::{KeyValueCollection, Store};
use anyhow::{Context, Result};
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::debug;

/// A thread-safe key-value store that can hold multiple collections.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Keyspace>,
}

impl KeyValueStore {
    /// Opens (or creates) a persistent store rooted at `data_path`.
    pub fn open(data_path: &Path) -> Result<Self> {
        let db_path = data_path.join("db");
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("Failed to create data directory: {}", db_path.display()))?;
        let keyspace = fjall::Config::new(&db_path)
            .open()
            .with_context(|| format!("Failed to open keyspace at {}", db_path.display()))?;
        debug!("Opened keyspace at {}", db_path.display());

        Ok(Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: Some(keyspace),
        })
    }

    /// A store that keeps every collection in memory, persistent or not.
    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
        }
    }

    fn create_collection(&self, name: &str, persist: bool) -> Result<Arc<dyn KeyValueCollection>> {
        match (&self.keyspace, persist) {
            (Some(keyspace), true) => {
                let partition = keyspace
                    .open_partition(name, PartitionCreateOptions::default())
                    .with_context(|| format!("Failed to open partition: {name}"))?;
                Ok(Arc::new(DiskCollection::new(keyspace.clone(), partition)))
            }
            _ => Ok(Arc::new(MemoryCollection::new())),
        }
    }
}

impl Store for KeyValueStore {
    fn get_collection(&self, name: &str, persist: bool) -> Result<Arc<dyn KeyValueCollection>> {
        if let Some(collection) = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(collection));
        }

        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(collection) = collections.get(name) {
            return Ok(Arc::clone(collection));
        }
        let collection = self.create_collection(name, persist)?;
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    fn remove_collection(&self, name: &str) -> bool {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }
}
