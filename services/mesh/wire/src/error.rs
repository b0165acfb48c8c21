//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes for the field being decoded
    #[error("incomplete pdu: need {need} bytes, have {have}")]
    Incomplete {
        /// Bytes required
        need: usize,
        /// Bytes available
        have: usize,
    },

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Unknown proxy or provisioning pdu type
    #[error("unknown type {0:#04x}")]
    Type(u8),

    /// Opcode outside the 1/2/3-octet encoding rules
    #[error("invalid opcode {0:#x}")]
    Opcode(u32),

    /// Segment header inconsistent with the transfer it belongs to
    #[error("bad segment: seg_o={seg_o} seg_n={seg_n}")]
    Segment {
        /// Segment offset
        seg_o: u8,
        /// Last segment number
        seg_n: u8,
    },

    /// Reserved bits or values in use
    #[error("reserved bits nonzero")]
    Reserved,

    /// Trailing bytes after a fixed-layout parameter block
    #[error("{0} trailing bytes")]
    Trailing(usize),

    /// Malformed pdu structure
    #[error("malformed pdu")]
    Malformed,
}

impl WireError {
    pub(crate) fn need(need: usize, have: usize) -> Self {
        WireError::Incomplete { need, have }
    }
}
