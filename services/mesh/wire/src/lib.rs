//! Wire encoding for the mesh provisioner.
//!
//! This crate holds the byte layouts shared by every layer of the stack,
//! with no cryptography and no I/O:
//!
//! - **Proxy and network headers**: the one-octet proxy header and the clear
//!   9-octet network header
//! - **Lower transport**: unsegmented/segmented access and control PDUs,
//!   segment acknowledgements
//! - **Segmentation**: splitting upper transport PDUs and reassembling them
//!   with a 32-bit block acknowledgement
//! - **Access parameters**: opcodes, key index packing, model identifiers
//! - **Provisioning**: the public key exchange PDU
//!
//! ## Network PDU
//!
//! ```text
//! +-------+---------+-----------------------+---------------------------+--------+
//! | proxy | IVI|NID | CTL|TTL SEQ SRC       | DST || transport PDU      | NetMIC |
//! | 1B    | 1B      | 6B, obfuscated        | encrypted                 | 4B/8B  |
//! +-------+---------+-----------------------+---------------------------+--------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod header;
pub mod lower;
pub mod opcode;
pub mod provisioning;
pub mod segment;

// Re-export main types
pub use codec::{
    is_sig_model_id, pack_key_indexes, unpack_key_indexes, ParamBuilder, ParamReader,
    MAX_KEY_INDEX,
};
pub use error::WireError;
pub use header::{
    unwrap_proxy, wrap_proxy, NetworkHeader, ProxyHeader, ProxyPduType, Sar, MAX_NETWORK_PDU_SIZE,
    MAX_SEQUENCE_NUMBER, MAX_TTL, NETWORK_HEADER_SIZE, NET_MIC_ACCESS, NET_MIC_CONTROL,
    OBFUSCATED_HEADER_SIZE,
};
pub use lower::{
    LowerFlags, LowerTransportPdu, SegmentHeader, AID_MASK, MAX_SEGMENTED_ACCESS_PAYLOAD,
    MAX_UNSEGMENTED_ACCESS_PAYLOAD, SEQ_ZERO_MASK,
};
pub use opcode::{split_access_payload, Opcode};
pub use provisioning::{
    provisioning_pdu_type, ProvisioningPduType, PublicKeyPdu, COORDINATE_SIZE,
    PUBLIC_KEY_PDU_SIZE,
};
pub use segment::{BlockAck, Reassembly, SegmentOutcome, Segmenter, MAX_SEGMENTS};
