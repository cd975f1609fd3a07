pub mod disk;
pub mod memory;
pub mod records;

use anyhow::{Context, Result};
use async_trait::async_trait;
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions, PersistMode};
use memory::MemoryCollection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub use records::{FlowRow, RecordStore};

/// Ordered byte-keyed collection.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;
    async fn remove(&self, key: &[u8]) -> Result<()>;
    /// Entries whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Named collections, backed by a fjall keyspace or held in memory.
pub struct KeyValueStore {
    collections: Mutex<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Keyspace>,
}

impl KeyValueStore {
    pub fn in_memory() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            keyspace: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        debug!("Opened store at {}", path.display());
        Ok(Self {
            collections: Mutex::new(HashMap::new()),
            keyspace: Some(keyspace),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.keyspace.is_some()
    }

    /// Returns the named collection, creating it on first use.
    pub async fn collection(&self, name: &str) -> Result<Arc<dyn KeyValueCollection>> {
        let mut collections = self.collections.lock().await;
        if let Some(collection) = collections.get(name) {
            return Ok(Arc::clone(collection));
        }
        let collection: Arc<dyn KeyValueCollection> = match &self.keyspace {
            Some(keyspace) => {
                let partition = keyspace
                    .open_partition(name, PartitionCreateOptions::default())
                    .with_context(|| format!("Failed to open partition {name}"))?;
                Arc::new(DiskCollection::new(partition))
            }
            None => Arc::new(MemoryCollection::new()),
        };
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }

    /// Flushes the journal to disk. A no-op in memory.
    pub fn persist(&self) -> Result<()> {
        if let Some(keyspace) = &self.keyspace {
            keyspace
                .persist(PersistMode::SyncAll)
                .context("Failed to persist store")?;
        }
        Ok(())
    }
}
