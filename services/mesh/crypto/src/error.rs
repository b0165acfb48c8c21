//! Error types for mesh cryptographic operations.

use thiserror::Error;

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Cryptographic operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material of the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Key material that is not valid hex
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// Peer public key is not a point on P-256
    #[error("public key is not a valid P-256 point")]
    InvalidPoint,

    /// Private key outside the curve order
    #[error("invalid private key")]
    InvalidPrivateKey,

    /// ECDH agreement failed
    #[error("key agreement failed")]
    KeyAgreement,

    /// AES-CCM encryption failed
    #[error("encryption failed")]
    Encryption,

    /// MIC verification failed
    #[error("authentication failed")]
    Authentication,

    /// Input too short for the operation
    #[error("input too short: need {need} bytes, have {have}")]
    ShortInput {
        /// Required length
        need: usize,
        /// Actual length
        have: usize,
    },
}
