//! Error types for provisioning and transport.

use mesh_access::AccessError;
use mesh_crypto::CryptoError;
use mesh_storage::StorageError;
use mesh_wire::WireError;
use thiserror::Error;

use crate::provisioning::ProvisioningState;

/// Provisioning key exchange errors
///
/// Every variant aborts the provisioning attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    /// Step invoked out of order
    #[error("invalid state: {operation} not allowed in {state:?}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// State the session was in
        state: ProvisioningState,
    },

    /// No local key pair to send or agree with
    #[error("local key pair missing")]
    KeyPairMissing,

    /// Malformed provisioning PDU
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Invalid peer key or failed agreement
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Transport and manager errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Malformed PDU
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Encryption, decryption or key failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Access message could not be built or parsed
    #[error("access error: {0}")]
    Access(#[from] AccessError),

    /// Node persistence failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Provisioning failed
    #[error("provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    /// No session for this address
    #[error("unknown node {0:#06x}")]
    UnknownNode(u16),

    /// Node already registered
    #[error("node {0:#06x} already exists")]
    NodeExists(u16),

    /// AppKey index not bound to the node or not known locally
    #[error("application key index {0} not bound to node")]
    AppKeyNotBound(u16),

    /// AppKey Add carries key material that differs from the local key at that index
    #[error("application key {0} does not match the registered key")]
    AppKeyMismatch(u16),

    /// NetKey index differs from the node's bound NetKey
    #[error("network key index {0} not bound to node")]
    NetKeyNotBound(u16),

    /// Configuration message requested under an application key
    #[error("configuration messages must use the device key")]
    DeviceKeyRequired,

    /// Non-configuration message requested under the device key
    #[error("message requires an application key")]
    ApplicationKeyRequired,

    /// A segmented transfer to this node is still awaiting its acknowledgement
    #[error("node {0:#06x} has an unacknowledged transfer in flight")]
    Busy(u16),

    /// 24-bit sequence space of our source address used up
    #[error("sequence numbers exhausted for source {0:#06x}")]
    SequenceExhausted(u16),

    /// Access payload too large for 32 segments
    #[error("access payload of {0} bytes too large")]
    PayloadTooLarge(usize),

    /// Network PDU for a different network
    #[error("nid {0:#04x} does not match")]
    UnknownNid(u8),

    /// Network PDU addressed elsewhere
    #[error("pdu addressed to {0:#06x}")]
    NotForUs(u16),

    /// Sequence number not newer than the last one accepted
    #[error("replayed sequence number {0:#08x}")]
    Replay(u32),

    /// No key decrypted the upper transport PDU
    #[error("no key authenticated the message")]
    NoMatchingKey,

    /// Bearer failed to send
    #[error("bearer error: {0}")]
    Bearer(String),
}
