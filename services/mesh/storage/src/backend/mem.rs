//! In-memory storage backend for development and testing

use crate::{NodeAddress, NodeRecord, NodeStore, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory node store
pub struct MemoryNodeStore {
    /// Node records: address -> record
    nodes: Arc<DashMap<NodeAddress, NodeRecord>>,
}

impl MemoryNodeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn save(&self, record: &NodeRecord) -> Result<(), StorageError> {
        debug!(
            "Node save address={} seq={}",
            record.unicast_address, record.sequence_number
        );
        self.nodes.insert(record.unicast_address, record.clone());
        Ok(())
    }

    async fn load(&self, address: NodeAddress) -> Result<Option<NodeRecord>, StorageError> {
        Ok(self.nodes.get(&address).map(|r| r.clone()))
    }

    async fn list(&self) -> Result<Vec<NodeRecord>, StorageError> {
        let mut records: Vec<NodeRecord> = self.nodes.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.unicast_address);
        Ok(records)
    }

    async fn remove(&self, address: NodeAddress) -> Result<(), StorageError> {
        self.nodes
            .remove(&address)
            .map(|_| ())
            .ok_or(StorageError::NotFound(address))
    }

    async fn store_sequence(&self, address: NodeAddress, next: u32) -> Result<(), StorageError> {
        let mut record = self
            .nodes
            .get_mut(&address)
            .ok_or(StorageError::NotFound(address))?;
        record.sequence_number = record.sequence_number.max(next);
        debug!("Node {} sequence persisted at {}", address, record.sequence_number);
        Ok(())
    }
}
