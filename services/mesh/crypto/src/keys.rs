//! Zeroizing 128-bit key types.
//!
//! Network, application and device keys are opaque 16-octet secrets. Their
//! `Debug` output never includes key material.

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{k1, k2, k3, k4, BLOCK_SIZE};

/// Size of a mesh key
pub const KEY_SIZE: usize = BLOCK_SIZE;

macro_rules! mesh_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl $name {
            /// Create from raw bytes
            #[must_use]
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            /// Generate a random key
            #[must_use]
            pub fn generate() -> Self {
                let mut bytes = [0u8; KEY_SIZE];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                Self { bytes }
            }

            /// Create from a slice of exactly [`KEY_SIZE`] bytes
            pub fn try_from_slice(slice: &[u8]) -> CryptoResult<Self> {
                let bytes: [u8; KEY_SIZE] =
                    slice
                        .try_into()
                        .map_err(|_| CryptoError::InvalidKeyLength {
                            expected: KEY_SIZE,
                            actual: slice.len(),
                        })?;
                Ok(Self { bytes })
            }

            /// Parse a 32-character hex string
            pub fn from_hex(s: &str) -> CryptoResult<Self> {
                let raw = hex::decode(s.trim())
                    .map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
                Self::try_from_slice(&raw)
            }

            /// Hex encoding of the key
            pub fn to_hex(&self) -> String {
                hex::encode(self.bytes)
            }

            /// Key bytes
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).finish_non_exhaustive()
            }
        }
    };
}

mesh_key!(
    /// Network key
    NetworkKey
);

mesh_key!(
    /// Application key
    ApplicationKey
);

mesh_key!(
    /// Device key shared between the provisioner and one node
    DeviceKey
);

/// Keys derived from a network key with `k2(NetKey, 0x00)`
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct NetworkSecrets {
    nid: u8,
    encryption_key: [u8; KEY_SIZE],
    privacy_key: [u8; KEY_SIZE],
    network_id: [u8; 8],
}

impl NetworkSecrets {
    /// NID carried in every network PDU header
    pub fn nid(&self) -> u8 {
        self.nid
    }

    /// Network layer AES-CCM key
    pub fn encryption_key(&self) -> &[u8; KEY_SIZE] {
        &self.encryption_key
    }

    /// Header obfuscation key
    pub fn privacy_key(&self) -> &[u8; KEY_SIZE] {
        &self.privacy_key
    }

    /// 64-bit network identifier
    pub fn network_id(&self) -> [u8; 8] {
        self.network_id
    }
}

impl std::fmt::Debug for NetworkSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSecrets")
            .field("nid", &format_args!("{:#04x}", self.nid))
            .finish_non_exhaustive()
    }
}

impl NetworkKey {
    /// Derive NID, encryption key, privacy key and network ID
    pub fn derive(&self) -> NetworkSecrets {
        let out = k2(&self.bytes, &[0x00]);
        NetworkSecrets {
            nid: out.nid,
            encryption_key: out.encryption_key,
            privacy_key: out.privacy_key,
            network_id: k3(&self.bytes),
        }
    }
}

impl ApplicationKey {
    /// 6-bit application key identifier
    pub fn aid(&self) -> u8 {
        k4(&self.bytes)
    }
}

impl DeviceKey {
    /// Derive the device key from the ECDH secret and the provisioning salt
    pub fn from_ecdh_secret(secret: &[u8], provisioning_salt: &[u8; KEY_SIZE]) -> Self {
        Self::from_bytes(k1(secret, provisioning_salt, b"prdk"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_key_derivation() {
        let key = NetworkKey::from_hex("7dd7364cd842ad18c17c2b820c84c3d6").unwrap();
        let secrets = key.derive();
        assert_eq!(secrets.nid(), 0x68);
        assert_eq!(
            hex::encode(secrets.encryption_key()),
            "0953fa93e7caac9638f58820220a398e"
        );
        assert_eq!(
            hex::encode(secrets.privacy_key()),
            "8b84eedec100067d670971dd2aa700cf"
        );
        assert_eq!(hex::encode(secrets.network_id()), "3ecaff672f673370");
    }

    #[test]
    fn test_application_key_aid() {
        let key = ApplicationKey::from_hex("63964771734fbd76e3b40519d1d94a48").unwrap();
        assert_eq!(key.aid(), 0x26);
    }

    #[test]
    fn test_key_parsing_errors() {
        assert_eq!(
            DeviceKey::try_from_slice(&[0u8; 15]),
            Err(CryptoError::InvalidKeyLength {
                expected: 16,
                actual: 15
            })
        );
        assert!(matches!(
            NetworkKey::from_hex("zz"),
            Err(CryptoError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = ApplicationKey::from_bytes([0xAB; 16]);
        let debug = format!("{key:?}");
        assert!(!debug.contains("ab"));
        assert!(!debug.contains("171"));
        assert_eq!(key.to_hex(), "ab".repeat(16));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(NetworkKey::generate(), NetworkKey::generate());
    }
}
