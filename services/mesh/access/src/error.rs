//! Access layer error types.

use mesh_wire::{Opcode, WireError};
use thiserror::Error;

/// Access message errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Parameter block could not be decoded
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Opcode not handled by any message type
    #[error("unknown opcode {0}")]
    UnknownOpcode(Opcode),

    /// Opcode differs from the one the handler expects
    #[error("unexpected opcode {actual}, expected {expected}")]
    UnexpectedOpcode {
        /// Opcode the handler owns
        expected: Opcode,
        /// Opcode received
        actual: Opcode,
    },

    /// Parameters that cannot be represented on the wire
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}
