//! Cryptographic primitives for the mesh provisioner.
//!
//! Thin, typed wrappers over RustCrypto crates:
//!
//! - [`ecdh`]: P-256 key pairs and shared secret agreement (`p256`)
//! - [`aead`]: AES-CCM with 32- or 64-bit MIC (`ccm`, `aes`)
//! - [`kdf`]: AES-CMAC and the s1/k1/k2/k3/k4 derivations (`cmac`)
//! - [`privacy`]: network header obfuscation (AES-ECB)
//! - [`nonce`]: network, application and device nonces
//! - [`keys`]: zeroizing network, application and device keys

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod ecdh;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod nonce;
pub mod privacy;

pub use aead::{open, seal, MicSize};
pub use ecdh::{validate_public_key, EcdhKeyPair, SharedSecret, PUBLIC_KEY_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{aes_cmac, k1, k2, k3, k4, s1};
pub use keys::{ApplicationKey, DeviceKey, NetworkKey, NetworkSecrets, KEY_SIZE};
pub use nonce::{network_nonce, upper_transport_nonce, NONCE_SIZE};
pub use privacy::obfuscate;
