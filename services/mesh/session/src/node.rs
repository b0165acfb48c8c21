//! Per-node transport state.
//!
//! A [`NodeSession`] is the single owner of everything that mutates while
//! talking to one node: the inbound reassembly buffer, replay protection,
//! the status opcode we wait for and the record of sequence numbers used
//! towards it.

use std::time::{Duration, Instant};

use mesh_crypto::DeviceKey;
use mesh_storage::{NodeAddress, NodeRecord};
use mesh_wire::{BlockAck, Opcode, Reassembly};
use tracing::warn;

use crate::error::TransportError;

/// What an inbound segmented transfer carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Upper transport access PDU
    Access {
        /// Application key flag
        akf: bool,
        /// Application key identifier
        aid: u8,
    },
    /// Transport control message
    Control {
        /// Control opcode
        opcode: u8,
    },
}

/// Inbound reassembly in progress
#[derive(Debug)]
pub struct InboundTransfer {
    /// Segment buffer
    pub reassembly: Reassembly,
    /// Access or control
    pub kind: TransferKind,
    /// Sequence number of the first segment
    pub seq_auth: u32,
    /// When the first segment arrived
    pub started: Instant,
}

/// Last inbound segmented transfer that completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedTransfer {
    /// SeqZero of the transfer
    pub seq_zero: u16,
    /// SeqAuth of the transfer
    pub seq_auth: u32,
    /// Final block acknowledgement
    pub block_ack: BlockAck,
}

/// Transport state of one provisioned node
pub struct NodeSession {
    address: u16,
    device_key: DeviceKey,
    net_key_index: u16,
    app_key_indices: Vec<u16>,
    next_seq: u32,
    last_seq_auth: Option<u32>,
    inbound: Option<InboundTransfer>,
    completed: Option<CompletedTransfer>,
    pending: Option<Opcode>,
}

impl NodeSession {
    /// Build a session from a stored record
    pub fn from_record(record: &NodeRecord) -> Self {
        Self {
            address: record.unicast_address.0,
            device_key: DeviceKey::from_bytes(record.device_key),
            net_key_index: record.net_key_index,
            app_key_indices: record.app_key_indices.clone(),
            next_seq: record.sequence_number,
            last_seq_auth: None,
            inbound: None,
            completed: None,
            pending: None,
        }
    }

    /// Snapshot for persistence
    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            unicast_address: NodeAddress(self.address),
            device_key: *self.device_key.as_bytes(),
            net_key_index: self.net_key_index,
            app_key_indices: self.app_key_indices.clone(),
            sequence_number: self.next_seq,
        }
    }

    /// Unicast address
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Device key
    pub fn device_key(&self) -> &DeviceKey {
        &self.device_key
    }

    /// Bound NetKey index
    pub fn net_key_index(&self) -> u16 {
        self.net_key_index
    }

    /// Bound AppKey indices
    pub fn app_key_indices(&self) -> &[u16] {
        &self.app_key_indices
    }

    /// Whether `index` is one of the node's AppKey indices
    pub fn has_app_key(&self, index: u16) -> bool {
        self.app_key_indices.contains(&index)
    }

    /// One past the highest sequence number used towards this node
    pub fn next_sequence(&self) -> u32 {
        self.next_seq
    }

    /// Note that sequence numbers below `next` were used towards this node
    ///
    /// Numbers come from the provisioner-wide [`SequenceCounter`]; this
    /// record only moves forward.
    ///
    /// [`SequenceCounter`]: crate::sequence::SequenceCounter
    pub fn record_sent(&mut self, next: u32) {
        if next > self.next_seq {
            self.next_seq = next;
        }
    }

    /// Status opcode the node is expected to answer with
    pub fn pending(&self) -> Option<Opcode> {
        self.pending
    }

    /// Set or clear the expected status opcode
    pub fn set_pending(&mut self, opcode: Option<Opcode>) {
        self.pending = opcode;
    }

    /// Highest SeqAuth accepted from this node
    pub fn last_seq_auth(&self) -> Option<u32> {
        self.last_seq_auth
    }

    /// Accept `seq_auth` if it is newer than anything seen before
    pub fn check_replay(&self, seq_auth: u32) -> Result<(), TransportError> {
        match self.last_seq_auth {
            Some(last) if seq_auth <= last => Err(TransportError::Replay(seq_auth)),
            _ => Ok(()),
        }
    }

    /// Record an accepted SeqAuth
    pub fn accept_seq_auth(&mut self, seq_auth: u32) {
        self.last_seq_auth = Some(self.last_seq_auth.map_or(seq_auth, |last| last.max(seq_auth)));
    }

    /// Inbound transfer in progress
    pub fn inbound(&self) -> Option<&InboundTransfer> {
        self.inbound.as_ref()
    }

    /// Mutable inbound transfer in progress
    pub fn inbound_mut(&mut self) -> Option<&mut InboundTransfer> {
        self.inbound.as_mut()
    }

    /// Start a new inbound transfer, discarding any unfinished one
    pub fn begin_inbound(&mut self, transfer: InboundTransfer) -> &mut InboundTransfer {
        if let Some(old) = self.inbound.take() {
            warn!(
                "Node {:#06x} discarding incomplete transfer seq_zero={:#06x} ({} of {} segments)",
                self.address,
                old.reassembly.seq_zero(),
                old.reassembly.block_ack().count(),
                old.reassembly.seg_n() as u32 + 1
            );
        }
        self.inbound.insert(transfer)
    }

    /// Close the inbound transfer as complete
    pub fn finish_inbound(&mut self) -> Option<InboundTransfer> {
        let transfer = self.inbound.take()?;
        self.completed = Some(CompletedTransfer {
            seq_zero: transfer.reassembly.seq_zero(),
            seq_auth: transfer.seq_auth,
            block_ack: transfer.reassembly.block_ack(),
        });
        self.accept_seq_auth(transfer.seq_auth);
        Some(transfer)
    }

    /// Last completed inbound transfer
    pub fn completed(&self) -> Option<&CompletedTransfer> {
        self.completed.as_ref()
    }

    /// Drop an inbound transfer older than `timeout`, returning its SeqZero
    pub fn expire_inbound(&mut self, now: Instant, timeout: Duration) -> Option<u16> {
        let expired = self
            .inbound
            .as_ref()
            .is_some_and(|t| now.saturating_duration_since(t.started) >= timeout);
        if !expired {
            return None;
        }
        self.inbound.take().map(|t| t.reassembly.seq_zero())
    }

    /// Forget in-flight state; the sequence record is kept
    pub fn abandon(&mut self) {
        self.inbound = None;
        self.pending = None;
    }
}

impl std::fmt::Debug for NodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSession")
            .field("address", &format_args!("{:#06x}", self.address))
            .field("net_key_index", &self.net_key_index)
            .field("app_key_indices", &self.app_key_indices)
            .field("next_seq", &self.next_seq)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}
