//! Provisioning, network and transport layers for the mesh provisioner.
//!
//! This crate turns access messages into network PDUs for a bearer and back
//! again, and runs the provisioning public key exchange.
//!
//! ## Features
//!
//! - **Provisioning**: P-256 public key exchange state machine
//! - **Network layer**: NetMIC encryption and header obfuscation
//! - **Transport**: upper transport encryption, segmentation, reassembly and
//!   segment acknowledgements
//! - **Manager**: per-node sessions, one sequence space for every
//!   destination, key rules, ack timeouts and a typed event channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_access::{AccessMessage, KeySelector, SensorGet};
//! use mesh_crypto::{ApplicationKey, NetworkKey};
//! use mesh_session::{ChannelBearer, ManagerConfig, MeshEvent, MeshManager};
//! use mesh_storage::{MemoryNodeStore, NodeAddress, NodeRecord};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (bearer, mut outbound) = ChannelBearer::new();
//! let (manager, mut events) = MeshManager::new(
//!     ManagerConfig::default(),
//!     &NetworkKey::generate(),
//!     Arc::new(bearer),
//!     Arc::new(MemoryNodeStore::new()),
//! );
//!
//! manager.add_app_key(0, ApplicationKey::generate()).await;
//! manager
//!     .add_node(NodeRecord {
//!         unicast_address: NodeAddress(0x0100),
//!         device_key: [0u8; 16],
//!         net_key_index: 0,
//!         app_key_indices: vec![0],
//!         sequence_number: 0,
//!     })
//!     .await?;
//!
//! let get = AccessMessage::SensorGet(SensorGet { property_id: None });
//! manager.send(0x0100, KeySelector::Application(0), get).await?;
//!
//! // PDUs for the radio
//! while let Ok((dst, pdu)) = outbound.try_recv() {
//!     println!("-> {:#06x}: {} bytes", dst, pdu.len());
//! }
//! while let Ok(event) = events.try_recv() {
//!     if let MeshEvent::SensorGetSent { address } = event {
//!         println!("Sensor Get sent to {:#06x}", address);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ack_tracker;
pub mod bearer;
pub mod error;
pub mod manager;
pub mod network;
pub mod node;
pub mod provisioning;
pub mod sequence;
pub mod transport;

// Re-export main types
pub use ack_tracker::{AckOutcome, AckTracker};
pub use bearer::{Bearer, ChannelBearer};
pub use error::{ProvisioningError, TransportError};
pub use manager::{ManagerConfig, MeshEvent, MeshManager, SendReceipt};
pub use network::{NetworkLayer, NetworkPdu};
pub use node::NodeSession;
pub use provisioning::{ProvisioningSession, ProvisioningState};
pub use sequence::SequenceCounter;
pub use transport::{
    build_access, build_segment_ack, open_upper, AckReply, Addressing, Outbound, Received,
    UpperKey, UpperPdu,
};
