//! File-based storage backend: one JSON document per node

use crate::{NodeAddress, NodeRecord, NodeStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File-based node store
///
/// Records live in `<data_dir>/nodes/<address>.json` and are cached in
/// memory. Writes go to a temporary file that is renamed into place.
pub struct FileNodeStore {
    nodes_dir: PathBuf,
    /// Per-node record cache
    cache: Arc<DashMap<NodeAddress, NodeRecord>>,
}

impl FileNodeStore {
    /// Open a store rooted at `data_dir`, loading existing records
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let nodes_dir = data_dir.into().join("nodes");
        std::fs::create_dir_all(&nodes_dir)?;

        let store = Self {
            nodes_dir,
            cache: Arc::new(DashMap::new()),
        };
        store.load_all().await?;
        Ok(store)
    }

    async fn load_all(&self) -> Result<(), StorageError> {
        for entry in std::fs::read_dir(&self.nodes_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(record) => {
                    debug!("Loaded node {} from {}", record.unicast_address, path.display());
                    self.cache.insert(record.unicast_address, record);
                }
                Err(e) => {
                    warn!("Skipping unreadable node file {}: {}", path.display(), e);
                }
            }
        }
        info!("Loaded {} node records from {}", self.cache.len(), self.nodes_dir.display());
        Ok(())
    }

    fn read_record(path: &Path) -> Result<NodeRecord, StorageError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            StorageError::Corruption(format!("Invalid node file {}: {}", path.display(), e))
        })
    }

    fn record_path(&self, address: NodeAddress) -> PathBuf {
        self.nodes_dir.join(format!("{:04x}.json", address.0))
    }

    fn write_record(&self, record: &NodeRecord) -> Result<(), StorageError> {
        let path = self.record_path(record.unicast_address);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[async_trait]
impl NodeStore for FileNodeStore {
    async fn save(&self, record: &NodeRecord) -> Result<(), StorageError> {
        self.write_record(record)?;
        self.cache.insert(record.unicast_address, record.clone());
        debug!("Node {} saved", record.unicast_address);
        Ok(())
    }

    async fn load(&self, address: NodeAddress) -> Result<Option<NodeRecord>, StorageError> {
        Ok(self.cache.get(&address).map(|r| r.clone()))
    }

    async fn list(&self) -> Result<Vec<NodeRecord>, StorageError> {
        let mut records: Vec<NodeRecord> = self.cache.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.unicast_address);
        Ok(records)
    }

    async fn remove(&self, address: NodeAddress) -> Result<(), StorageError> {
        if self.cache.remove(&address).is_none() {
            return Err(StorageError::NotFound(address));
        }
        let path = self.record_path(address);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    async fn store_sequence(&self, address: NodeAddress, next: u32) -> Result<(), StorageError> {
        let record = {
            let mut entry = self
                .cache
                .get_mut(&address)
                .ok_or(StorageError::NotFound(address))?;
            if next <= entry.sequence_number {
                return Ok(());
            }
            entry.sequence_number = next;
            entry.clone()
        };
        self.write_record(&record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(address: u16) -> NodeRecord {
        NodeRecord {
            unicast_address: NodeAddress(address),
            device_key: [0x5A; 16],
            net_key_index: 0,
            app_key_indices: vec![1],
            sequence_number: 0,
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = FileNodeStore::new(temp_dir.path()).await.unwrap();
            store.save(&record(0x0002)).await.unwrap();
            store.store_sequence(NodeAddress(0x0002), 42).await.unwrap();
        }

        let store = FileNodeStore::new(temp_dir.path()).await.unwrap();
        let loaded = store.load(NodeAddress(0x0002)).await.unwrap().unwrap();
        assert_eq!(loaded.sequence_number, 42);
        assert_eq!(loaded.device_key, [0x5A; 16]);
        assert!(temp_dir.path().join("nodes/0002.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_skips_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("nodes")).unwrap();
        std::fs::write(temp_dir.path().join("nodes/0009.json"), "{not json").unwrap();

        let store = FileNodeStore::new(temp_dir.path()).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileNodeStore::new(temp_dir.path()).await.unwrap();
        store.save(&record(0x0004)).await.unwrap();
        store.remove(NodeAddress(0x0004)).await.unwrap();
        assert!(!temp_dir.path().join("nodes/0004.json").exists());
        assert!(store.load(NodeAddress(0x0004)).await.unwrap().is_none());
    }
}
