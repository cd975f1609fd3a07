use crate::store::KeyValueCollection;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory collection over an ordered map.
#[derive(Default)]
pub struct MemoryCollection {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write().await.insert(key.to_vec(), value.to_vec());
        debug!("PUT {}", String::from_utf8_lossy(key));
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner = self.inner.read().await;
        Ok(inner
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_put_remove() {
        let collection = MemoryCollection::new();
        assert!(collection.get(b"key1").await.unwrap().is_none());

        collection.put(b"key1", b"123").await.unwrap();
        assert_eq!(collection.get(b"key1").await.unwrap(), Some(b"123".to_vec()));

        collection.remove(b"key1").await.unwrap();
        assert!(collection.get(b"key1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_prefix_in_key_order() {
        let collection = MemoryCollection::new();
        collection.put(b"IBIT|2024-01-12", b"2").await.unwrap();
        collection.put(b"IBIT|2024-01-11", b"1").await.unwrap();
        collection.put(b"IBITX|2024-01-11", b"x").await.unwrap();
        collection.put(b"FBTC|2024-01-11", b"f").await.unwrap();

        let values: Vec<_> = collection
            .scan_prefix(b"IBIT|")
            .await
            .unwrap()
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
    }
}
