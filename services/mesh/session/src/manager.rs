//! Mesh manager coordinating provisioning, node sessions and the bearer.
//!
//! The manager owns every [`NodeSession`] behind its own lock, so traffic
//! for one node never waits on another. Outbound messages are sealed under
//! the node lock and draw their sequence numbers from one
//! [`SequenceCounter`] shared by every destination, locked after the node.
//! Inbound PDUs are decrypted, reassembled and dispatched to the access
//! layer. Status
//! notifications go out as [`MeshEvent`]s and never feed back into
//! protocol state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use mesh_access::{AccessMessage, KeySelector, SensorStatus};
use mesh_crypto::{ApplicationKey, MicSize, NetworkKey, SharedSecret};
use mesh_storage::{NodeAddress, NodeRecord, NodeStore};
use mesh_wire::{
    provisioning_pdu_type, split_access_payload, unwrap_proxy, BlockAck, Opcode,
    ProvisioningPduType, ProxyPduType, Sar, WireError,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::ack_tracker::{AckOutcome, AckTracker};
use crate::bearer::Bearer;
use crate::error::TransportError;
use crate::network::NetworkLayer;
use crate::node::NodeSession;
use crate::provisioning::ProvisioningSession;
use crate::sequence::SequenceCounter;
use crate::transport::{
    self, build_access, build_segment_ack, open_upper, AckReply, Addressing, Received, UpperKey,
    UpperPdu,
};

/// Manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Provisioner unicast address, used as SRC
    pub unicast_address: u16,
    /// Index of the network key
    pub net_key_index: u16,
    /// Current IV index
    pub iv_index: u32,
    /// TTL for outbound PDUs
    pub default_ttl: u8,
    /// How long a segmented transfer may wait for its acknowledgement
    pub ack_timeout: Duration,
    /// How long an incomplete inbound reassembly is kept
    pub reassembly_timeout: Duration,
    /// Send a Segment Acknowledgment for every inbound segment instead of
    /// only for complete transfers
    pub ack_partial: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            unicast_address: 0x0001,
            net_key_index: 0,
            iv_index: 0,
            default_ttl: 5,
            ack_timeout: Duration::from_secs(10),
            reassembly_timeout: Duration::from_secs(20),
            ack_partial: false,
        }
    }
}

/// Observation points for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// Our provisioning public key went out
    PublicKeySent {
        /// Provisioning peer
        peer: u16,
    },
    /// Peer public key accepted and shared secret derived
    PublicKeyReceived {
        /// Provisioning peer
        peer: u16,
    },
    /// Provisioning attempt aborted
    ProvisioningFailed {
        /// Provisioning peer
        peer: u16,
        /// Cause
        reason: String,
    },
    /// Config AppKey Add sent
    AppKeyAddSent {
        /// Target node
        address: u16,
        /// AppKey index added
        app_key_index: u16,
    },
    /// Config Model App Bind sent
    ModelAppBindSent {
        /// Target node
        address: u16,
        /// Model bound
        model_id: u32,
    },
    /// Config Model Subscription Add sent
    SubscriptionAddSent {
        /// Target node
        address: u16,
        /// Subscription address added
        subscription_address: u16,
    },
    /// Sensor Get sent
    SensorGetSent {
        /// Target node
        address: u16,
    },
    /// Any access message sent
    MessageSent {
        /// Target node
        address: u16,
        /// Opcode sent
        opcode: Opcode,
        /// SeqAuth of the message
        seq: u32,
        /// Network PDUs used
        segments: usize,
    },
    /// Segments of an incomplete inbound transfer arrived
    SegmentsReceived {
        /// Sending node
        address: u16,
        /// SeqZero of its transfer
        seq_zero: u16,
        /// Segments received so far
        block_ack: BlockAck,
    },
    /// Segment Acknowledgment sent to a node
    BlockAcknowledgementSent {
        /// Node acknowledged
        address: u16,
        /// SeqZero of its transfer
        seq_zero: u16,
        /// Segments acknowledged
        block_ack: BlockAck,
    },
    /// Access message received and decoded
    AccessReceived {
        /// Sender
        address: u16,
        /// Decoded message
        message: AccessMessage,
    },
    /// Sensor Status received
    SensorStatusReceived {
        /// Sender
        address: u16,
        /// Decoded readings
        status: SensorStatus,
    },
    /// Access message with an unknown or unexpected opcode
    UnknownPduReceived {
        /// Sender
        address: u16,
        /// Opcode received
        opcode: Opcode,
        /// Why it was rejected
        reason: String,
    },
    /// Inbound PDU discarded
    PduDropped {
        /// Bearer source
        source: u16,
        /// Why it was dropped
        reason: String,
    },
    /// A segmented transfer was fully acknowledged
    TransferAcknowledged {
        /// Node that acknowledged
        address: u16,
        /// SeqZero of our transfer
        seq_zero: u16,
    },
    /// A segmented transfer was not acknowledged in time
    AckTimeout {
        /// Target node
        address: u16,
        /// SeqZero of our transfer
        seq_zero: u16,
    },
    /// An inbound reassembly was abandoned after a timeout
    ReassemblyTimeout {
        /// Sending node
        address: u16,
        /// SeqZero of its transfer
        seq_zero: u16,
    },
}

/// What a successful send used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// SeqAuth of the message
    pub seq: u32,
    /// Network PDUs handed to the bearer
    pub segments: usize,
}

/// Coordinates provisioning sessions and provisioned nodes
pub struct MeshManager {
    config: ManagerConfig,
    network: NetworkLayer,
    app_keys: RwLock<HashMap<u16, ApplicationKey>>,
    nodes: Arc<RwLock<HashMap<u16, Arc<Mutex<NodeSession>>>>>,
    sequence: Mutex<SequenceCounter>,
    provisioning: Mutex<HashMap<u16, ProvisioningSession>>,
    ack_tracker: AckTracker,
    bearer: Arc<dyn Bearer>,
    store: Arc<dyn NodeStore>,
    event_tx: mpsc::UnboundedSender<MeshEvent>,
}

impl std::fmt::Debug for MeshManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshManager")
            .field("config", &self.config)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl MeshManager {
    /// Create a manager and the receiver for its events
    pub fn new(
        config: ManagerConfig,
        network_key: &NetworkKey,
        bearer: Arc<dyn Bearer>,
        store: Arc<dyn NodeStore>,
    ) -> (Self, mpsc::UnboundedReceiver<MeshEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let network = NetworkLayer::new(network_key, config.iv_index);
        info!(
            "Mesh manager at {:#06x}, iv_index={:#010x}, nid={:#04x}",
            config.unicast_address,
            config.iv_index,
            network.nid()
        );
        let sequence = SequenceCounter::new(config.unicast_address, 0);
        let manager = Self {
            config,
            network,
            app_keys: RwLock::new(HashMap::new()),
            nodes: Arc::new(RwLock::new(HashMap::new())),
            sequence: Mutex::new(sequence),
            provisioning: Mutex::new(HashMap::new()),
            ack_tracker: AckTracker::new(),
            bearer,
            store,
            event_tx,
        };
        (manager, event_rx)
    }

    /// Manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Register an application key under `index`
    pub async fn add_app_key(&self, index: u16, key: ApplicationKey) {
        debug!("Application key {} registered (aid={:#04x})", index, key.aid());
        self.app_keys.write().await.insert(index, key);
    }

    fn emit(&self, event: MeshEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn addressing(&self) -> Addressing {
        Addressing {
            src: self.config.unicast_address,
            ttl: self.config.default_ttl,
        }
    }

    fn drop_pdu(&self, source: u16, reason: &TransportError) {
        warn!("Dropped PDU from {:#06x}: {}", source, reason);
        self.emit(MeshEvent::PduDropped {
            source,
            reason: reason.to_string(),
        });
    }

    async fn node(&self, address: u16) -> Result<Arc<Mutex<NodeSession>>, TransportError> {
        self.nodes
            .read()
            .await
            .get(&address)
            .cloned()
            .ok_or(TransportError::UnknownNode(address))
    }

    // Provisioning

    /// Start the public key exchange with `peer` and send our public key
    pub async fn start_provisioning(&self, peer: u16) -> Result<(), TransportError> {
        let mut session = ProvisioningSession::new();
        let generated = session.generate_key_pair().map(|_| ());
        let pdu = match generated.and_then(|()| session.send()) {
            Ok(pdu) => pdu,
            Err(e) => {
                error!("Provisioning of {:#06x} failed: {}", peer, e);
                self.emit(MeshEvent::ProvisioningFailed {
                    peer,
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };

        if self.provisioning.lock().await.insert(peer, session).is_some() {
            warn!("Replaced unfinished provisioning session for {:#06x}", peer);
        }
        // The public key PDU already starts with its proxy header
        if let Err(e) = self.bearer.send_pdu(peer, pdu).await {
            self.provisioning.lock().await.remove(&peer);
            return Err(e);
        }
        self.emit(MeshEvent::PublicKeySent { peer });
        Ok(())
    }

    /// Remove a completed provisioning session and return its shared secret
    pub async fn take_shared_secret(&self, peer: u16) -> Option<SharedSecret> {
        let mut sessions = self.provisioning.lock().await;
        let completed = sessions
            .get(&peer)
            .is_some_and(|s| s.shared_secret().is_some());
        if !completed {
            return None;
        }
        sessions.remove(&peer)?.into_shared_secret()
    }

    async fn handle_provisioning(&self, source: u16, pdu: Bytes) {
        let mut sessions = self.provisioning.lock().await;
        let Some(session) = sessions.get_mut(&source) else {
            self.drop_pdu(source, &TransportError::UnknownNode(source));
            return;
        };

        match provisioning_pdu_type(&pdu) {
            Ok(ProvisioningPduType::PublicKey) => {}
            Ok(other) => {
                debug!("Ignoring provisioning PDU {:?} from {:#06x}", other, source);
                return;
            }
            Err(e) => {
                self.drop_pdu(source, &e.into());
                return;
            }
        }

        let result = session.receive(&pdu).map(|_| ());
        match result {
            Ok(()) => {
                info!("Public key exchange with {:#06x} complete", source);
                self.emit(MeshEvent::PublicKeyReceived { peer: source });
            }
            Err(e) => {
                sessions.remove(&source);
                self.emit(MeshEvent::ProvisioningFailed {
                    peer: source,
                    reason: e.to_string(),
                });
            }
        }
    }

    // Nodes

    /// Register a provisioned node and persist it
    pub async fn add_node(&self, record: NodeRecord) -> Result<(), TransportError> {
        let address = record.unicast_address.0;
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(&address) {
            return Err(TransportError::NodeExists(address));
        }
        self.store.save(&record).await?;
        self.sequence.lock().await.advance_to(record.sequence_number);
        nodes.insert(address, Arc::new(Mutex::new(NodeSession::from_record(&record))));
        info!(
            "Node {:#06x} added (net_key_index={}, app_keys={:?})",
            address, record.net_key_index, record.app_key_indices
        );
        Ok(())
    }

    /// Restore every node held by the store
    pub async fn load_nodes(&self) -> Result<usize, TransportError> {
        let records = self.store.list().await?;
        let mut nodes = self.nodes.write().await;
        let mut sequence = self.sequence.lock().await;
        for record in &records {
            sequence.advance_to(record.sequence_number);
            nodes.insert(
                record.unicast_address.0,
                Arc::new(Mutex::new(NodeSession::from_record(record))),
            );
        }
        info!(
            "Restored {} nodes from storage, next seq {:#08x}",
            records.len(),
            sequence.next()
        );
        Ok(records.len())
    }

    /// Next sequence number the provisioner will use
    pub async fn next_sequence(&self) -> u32 {
        self.sequence.lock().await.next()
    }

    /// Current record of a node
    pub async fn node_record(&self, address: u16) -> Option<NodeRecord> {
        let node = self.node(address).await.ok()?;
        let guard = node.lock().await;
        Some(guard.to_record())
    }

    // Outbound

    /// Send an access message with a 32-bit TransMIC
    pub async fn send(
        &self,
        address: u16,
        key: KeySelector,
        message: AccessMessage,
    ) -> Result<SendReceipt, TransportError> {
        self.send_with_mic(address, key, message, MicSize::Short).await
    }

    /// Send an access message; `MicSize::Long` sends it segmented with SZMIC set
    pub async fn send_with_mic(
        &self,
        address: u16,
        key: KeySelector,
        message: AccessMessage,
        mic: MicSize,
    ) -> Result<SendReceipt, TransportError> {
        match (message.is_config(), key) {
            (true, KeySelector::Application(_)) => return Err(TransportError::DeviceKeyRequired),
            (false, KeySelector::Device) => return Err(TransportError::ApplicationKeyRequired),
            _ => {}
        }
        let node = self.node(address).await?;
        let payload = message.encode()?;

        // Busy check and tracking share the node lock
        let (outbound, next) = {
            let app_keys = self.app_keys.read().await;
            let mut guard = node.lock().await;
            if self.ack_tracker.has_pending(address).await {
                return Err(TransportError::Busy(address));
            }
            if let Some(index) = message.net_key_index() {
                if index != guard.net_key_index() {
                    return Err(TransportError::NetKeyNotBound(index));
                }
            }
            if let Some(index) = message.app_key_index() {
                if !guard.has_app_key(index) {
                    return Err(TransportError::AppKeyNotBound(index));
                }
            }
            if let AccessMessage::AppKeyAdd(add) = &message {
                match app_keys.get(&add.app_key_index) {
                    Some(local) if local.as_bytes() == add.app_key.as_bytes() => {}
                    Some(_) => return Err(TransportError::AppKeyMismatch(add.app_key_index)),
                    None => return Err(TransportError::AppKeyNotBound(add.app_key_index)),
                }
            }

            let device_key = guard.device_key().clone();
            let upper_key = match key {
                KeySelector::Device => UpperKey::Device(&device_key),
                KeySelector::Application(index) => {
                    let app_key = app_keys
                        .get(&index)
                        .filter(|_| guard.has_app_key(index))
                        .ok_or(TransportError::AppKeyNotBound(index))?;
                    UpperKey::Application(app_key)
                }
            };
            let outbound = {
                let mut sequence = self.sequence.lock().await;
                build_access(
                    &self.network,
                    &mut sequence,
                    &mut guard,
                    self.addressing(),
                    upper_key,
                    &payload,
                    mic,
                )?
            };
            if let Some((seq_zero, seg_n)) = outbound.segmentation {
                self.ack_tracker.track(address, seq_zero, seg_n).await;
            }
            guard.set_pending(message.expected_status());
            (outbound, guard.next_sequence())
        };

        self.store.store_sequence(NodeAddress(address), next).await?;
        for pdu in &outbound.pdus {
            self.bearer.send_pdu(address, pdu.clone()).await?;
        }

        info!(
            "{} sent to {:#06x} (seq={:#08x}, {} PDUs)",
            message.name(),
            address,
            outbound.seq,
            outbound.pdus.len()
        );
        match &message {
            AccessMessage::AppKeyAdd(m) => self.emit(MeshEvent::AppKeyAddSent {
                address,
                app_key_index: m.app_key_index,
            }),
            AccessMessage::ModelAppBind(m) => self.emit(MeshEvent::ModelAppBindSent {
                address,
                model_id: m.model_id,
            }),
            AccessMessage::ModelSubscriptionAdd(m) => self.emit(MeshEvent::SubscriptionAddSent {
                address,
                subscription_address: m.subscription_address,
            }),
            AccessMessage::SensorGet(_) => self.emit(MeshEvent::SensorGetSent { address }),
            _ => {}
        }
        self.emit(MeshEvent::MessageSent {
            address,
            opcode: message.opcode(),
            seq: outbound.seq,
            segments: outbound.pdus.len(),
        });
        Ok(SendReceipt {
            seq: outbound.seq,
            segments: outbound.pdus.len(),
        })
    }

    async fn send_ack(
        &self,
        address: u16,
        node: &Mutex<NodeSession>,
        ack: AckReply,
    ) -> Result<(), TransportError> {
        let (pdu, next) = {
            let mut guard = node.lock().await;
            let mut sequence = self.sequence.lock().await;
            let pdu = build_segment_ack(
                &self.network,
                &mut sequence,
                &mut guard,
                self.addressing(),
                ack.seq_zero,
                ack.block_ack,
            )?;
            (pdu, guard.next_sequence())
        };
        self.store.store_sequence(NodeAddress(address), next).await?;
        self.bearer.send_pdu(address, pdu).await?;
        debug!(
            "Block ack {:#010x} sent to {:#06x} for seq_zero={:#06x}",
            ack.block_ack.bits(),
            address,
            ack.seq_zero
        );
        self.emit(MeshEvent::BlockAcknowledgementSent {
            address,
            seq_zero: ack.seq_zero,
            block_ack: ack.block_ack,
        });
        Ok(())
    }

    // Inbound

    /// Feed one PDU received from the bearer
    ///
    /// Malformed, unauthenticated or unexpected PDUs are dropped with an
    /// event and yield `Ok(None)`, as does a segment of an incomplete
    /// transfer. Errors are reserved for failures of our own replies.
    pub async fn deliver_pdu(
        &self,
        source: u16,
        raw: Bytes,
    ) -> Result<Option<AccessMessage>, TransportError> {
        let (header, body) = match unwrap_proxy(raw.clone()) {
            Ok(parts) => parts,
            Err(e) => {
                self.drop_pdu(source, &e.into());
                return Ok(None);
            }
        };
        if header.sar != Sar::Complete {
            self.drop_pdu(source, &WireError::Malformed.into());
            return Ok(None);
        }
        match header.typ {
            ProxyPduType::Provisioning => {
                self.handle_provisioning(source, raw).await;
                Ok(None)
            }
            ProxyPduType::Network => self.handle_network(source, body).await,
            other => {
                debug!("Ignoring proxy PDU {:?} from {:#06x}", other, source);
                Ok(None)
            }
        }
    }

    async fn receive_network(
        &self,
        raw: &[u8],
    ) -> Result<(u16, Arc<Mutex<NodeSession>>, Received), TransportError> {
        let pdu = self.network.decode(raw)?;
        if pdu.header.dst != self.config.unicast_address {
            return Err(TransportError::NotForUs(pdu.header.dst));
        }
        let address = pdu.header.src;
        let node = self.node(address).await?;
        let received = {
            let mut guard = node.lock().await;
            transport::receive(
                &mut guard,
                &pdu.header,
                pdu.iv_index,
                pdu.transport,
                Instant::now(),
            )?
        };
        Ok((address, node, received))
    }

    async fn handle_network(
        &self,
        source: u16,
        body: Bytes,
    ) -> Result<Option<AccessMessage>, TransportError> {
        let (address, node, received) = match self.receive_network(&body).await {
            Ok(parts) => parts,
            Err(e) => {
                self.drop_pdu(source, &e);
                return Ok(None);
            }
        };

        match received {
            Received::Upper { pdu, ack } => {
                if let Some(ack) = ack {
                    self.send_ack(address, &node, ack).await?;
                }
                Ok(self.dispatch_upper(address, &node, pdu).await)
            }
            Received::Pending {
                seq_zero,
                block_ack,
            } => {
                debug!(
                    "Transfer {:#06x} from {:#06x}: {} segments so far",
                    seq_zero,
                    address,
                    block_ack.count()
                );
                self.emit(MeshEvent::SegmentsReceived {
                    address,
                    seq_zero,
                    block_ack,
                });
                if self.config.ack_partial {
                    self.send_ack(
                        address,
                        &node,
                        AckReply {
                            seq_zero,
                            block_ack,
                        },
                    )
                    .await?;
                }
                Ok(None)
            }
            Received::Duplicate(ack) => {
                self.send_ack(address, &node, ack).await?;
                Ok(None)
            }
            Received::SegmentAck {
                seq_zero,
                block_ack,
                ..
            } => {
                match self.ack_tracker.acknowledge(address, seq_zero, block_ack).await {
                    AckOutcome::Complete => {
                        self.emit(MeshEvent::TransferAcknowledged { address, seq_zero })
                    }
                    AckOutcome::Partial { missing } => debug!(
                        "Transfer {:#06x} to {:#06x} missing segments {:?}",
                        seq_zero, address, missing
                    ),
                    AckOutcome::Unknown => debug!(
                        "Ack from {:#06x} for unknown transfer {:#06x}",
                        address, seq_zero
                    ),
                }
                Ok(None)
            }
            Received::Control {
                opcode,
                parameters,
                ack,
            } => {
                if let Some(ack) = ack {
                    self.send_ack(address, &node, ack).await?;
                }
                debug!(
                    "Control opcode {:#04x} from {:#06x} ignored ({} bytes)",
                    opcode,
                    address,
                    parameters.len()
                );
                Ok(None)
            }
        }
    }

    async fn dispatch_upper(
        &self,
        address: u16,
        node: &Mutex<NodeSession>,
        pdu: UpperPdu,
    ) -> Option<AccessMessage> {
        let app_keys = self.app_keys.read().await;
        let mut guard = node.lock().await;
        let candidates: Vec<(u16, &ApplicationKey)> = guard
            .app_key_indices()
            .iter()
            .filter_map(|index| app_keys.get(index).map(|key| (*index, key)))
            .collect();

        let (payload, key) = match open_upper(&pdu, guard.device_key(), &candidates) {
            Ok(opened) => opened,
            Err(e) => {
                self.drop_pdu(address, &e);
                return None;
            }
        };
        let (opcode, params) = match split_access_payload(payload) {
            Ok(parts) => parts,
            Err(e) => {
                self.drop_pdu(address, &e.into());
                return None;
            }
        };

        let parsed = match guard.pending() {
            Some(expected) => AccessMessage::parse_expected(expected, opcode, params),
            None => AccessMessage::parse(opcode, params),
        };
        let message = match parsed {
            Ok(message) if message.is_config() && key != KeySelector::Device => {
                self.unknown_pdu(address, opcode, "configuration message under an application key");
                return None;
            }
            Ok(message) => message,
            Err(e) => {
                self.unknown_pdu(address, opcode, &e.to_string());
                return None;
            }
        };

        if guard.pending() == Some(opcode) {
            guard.set_pending(None);
        }
        info!("{} received from {:#06x}", message.name(), address);
        if let AccessMessage::SensorStatus(status) = &message {
            self.emit(MeshEvent::SensorStatusReceived {
                address,
                status: status.clone(),
            });
        }
        self.emit(MeshEvent::AccessReceived {
            address,
            message: message.clone(),
        });
        Some(message)
    }

    fn unknown_pdu(&self, address: u16, opcode: Opcode, reason: &str) {
        warn!("Unknown PDU {} from {:#06x}: {}", opcode, address, reason);
        self.emit(MeshEvent::UnknownPduReceived {
            address,
            opcode,
            reason: reason.to_string(),
        });
    }

    // Timeouts and cancellation

    /// Expire unacknowledged outbound transfers and stale reassemblies
    ///
    /// Returns the number of transfers dropped.
    pub async fn poll_ack_timeouts(&self) -> usize {
        let now = Instant::now();
        let expired = self.ack_tracker.expire(now, self.config.ack_timeout).await;
        for (address, seq_zero) in &expired {
            self.emit(MeshEvent::AckTimeout {
                address: *address,
                seq_zero: *seq_zero,
            });
        }

        let nodes: Vec<Arc<Mutex<NodeSession>>> =
            self.nodes.read().await.values().cloned().collect();
        let mut reassemblies = 0;
        for node in nodes {
            let mut guard = node.lock().await;
            if let Some(seq_zero) = guard.expire_inbound(now, self.config.reassembly_timeout) {
                warn!(
                    "Reassembly of {:#06x} from {:#06x} timed out",
                    seq_zero,
                    guard.address()
                );
                reassemblies += 1;
                self.emit(MeshEvent::ReassemblyTimeout {
                    address: guard.address(),
                    seq_zero,
                });
            }
        }
        expired.len() + reassemblies
    }

    /// Discard in-flight state for `address`
    ///
    /// Drops its provisioning session, outbound transfers awaiting
    /// acknowledgement, inbound reassembly and expected status. Sequence
    /// numbers already used stay used.
    pub async fn abandon(&self, address: u16) {
        let provisioning = self.provisioning.lock().await.remove(&address).is_some();
        let transfers = self.ack_tracker.abandon(address).await;
        if let Ok(node) = self.node(address).await {
            node.lock().await.abandon();
        }
        info!(
            "Abandoned {:#06x} (provisioning={}, transfers={})",
            address, provisioning, transfers
        );
    }

    /// Process bearer input until the channel closes, polling timeouts on `tick`
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<(u16, Bytes)>,
        tick: Duration,
    ) {
        info!("Mesh manager running");
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                received = inbound.recv() => {
                    let Some((source, pdu)) = received else {
                        info!("Bearer closed, mesh manager shutting down");
                        break;
                    };
                    if let Err(e) = self.deliver_pdu(source, pdu).await {
                        error!("Failed to handle PDU from {:#06x}: {}", source, e);
                    }
                }
                _ = interval.tick() => {
                    self.poll_ack_timeouts().await;
                }
            }
        }
    }
}
