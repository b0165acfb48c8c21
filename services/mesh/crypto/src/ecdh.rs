//! P-256 key agreement for provisioning.
//!
//! Public keys travel as the raw 64-octet `X || Y` concatenation, each
//! coordinate a 32-octet unsigned big-endian integer.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Size of one coordinate
pub const COORDINATE_SIZE: usize = 32;

/// Size of an `X || Y` public key
pub const PUBLIC_KEY_SIZE: usize = 2 * COORDINATE_SIZE;

/// Size of the ECDH shared secret
pub const SHARED_SECRET_SIZE: usize = 32;

const SEC1_UNCOMPRESSED: u8 = 0x04;

/// ECDH shared secret (x-coordinate of the agreed point)
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; SHARED_SECRET_SIZE],
}

impl SharedSecret {
    /// Secret bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecret").finish_non_exhaustive()
    }
}

/// Local P-256 key pair
#[derive(Clone)]
pub struct EcdhKeyPair {
    secret: SecretKey,
    public_xy: [u8; PUBLIC_KEY_SIZE],
}

impl EcdhKeyPair {
    /// Generate a fresh key pair from the OS RNG
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut rand::rngs::OsRng))
    }

    /// Restore a key pair from a 32-octet big-endian private scalar
    pub fn from_private_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let point = secret.public_key().to_encoded_point(false);
        let mut public_xy = [0u8; PUBLIC_KEY_SIZE];
        // Uncompressed SEC1 is 0x04 || X || Y
        public_xy.copy_from_slice(&point.as_bytes()[1..]);
        Self { secret, public_xy }
    }

    /// Public key as `X || Y`
    pub fn public_xy(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public_xy
    }

    /// Agree on a shared secret with a peer's `X || Y` public key
    pub fn agree(&self, peer_xy: &[u8; PUBLIC_KEY_SIZE]) -> CryptoResult<SharedSecret> {
        let peer = validate_public_key(peer_xy)?;
        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let raw = shared.raw_secret_bytes();
        if raw.len() != SHARED_SECRET_SIZE {
            return Err(CryptoError::KeyAgreement);
        }
        let mut bytes = [0u8; SHARED_SECRET_SIZE];
        bytes.copy_from_slice(raw);
        trace!("ECDH secret derived: {}", hex::encode(bytes));
        Ok(SharedSecret { bytes })
    }
}

impl std::fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyPair")
            .field("public_xy", &hex::encode(self.public_xy))
            .finish_non_exhaustive()
    }
}

/// Check that `X || Y` is a point on P-256
pub fn validate_public_key(xy: &[u8; PUBLIC_KEY_SIZE]) -> CryptoResult<PublicKey> {
    let mut sec1 = [0u8; 1 + PUBLIC_KEY_SIZE];
    sec1[0] = SEC1_UNCOMPRESSED;
    sec1[1..].copy_from_slice(xy);
    PublicKey::from_sec1_bytes(&sec1).map_err(|_| CryptoError::InvalidPoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROVISIONER_PRIVATE: &str =
        "06a516693c9aa31a6084545d0c5db641b48572b97203ddffb7ac73f7d0457663";
    const PROVISIONER_PUBLIC: &str = "2c31a47b5779809ef44cb5eaaf5c3e43d5f8faad4a8794cb987e9b03745c78dd\
                                      919512183898dfbecd52e2408e43871fd021109117bd3ed4eaf8437743715d4f";
    const DEVICE_PRIVATE: &str = "529aa0670d72cd6497502ed473502b037e8803b5c60829a5a3caa219505530ba";
    const DEVICE_PUBLIC: &str = "f465e43ff23d3f1b9dc7dfc04da8758184dbc966204796eccf0d6cf5e16500cc\
                                 0201d048bcbbd899eeefc424164e33c201c2b010ca6b4d43a8a155cad8ecb279";
    const SHARED: &str = "ab85843a2f6d883f62e5684b38e307335fe6e1945ecd19604105c6f23221eb69";

    fn xy(s: &str) -> [u8; PUBLIC_KEY_SIZE] {
        let compact: String = s.split_whitespace().collect();
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(compact, &mut out).unwrap();
        out
    }

    #[test]
    fn test_public_key_from_private() {
        let provisioner =
            EcdhKeyPair::from_private_bytes(&hex::decode(PROVISIONER_PRIVATE).unwrap()).unwrap();
        assert_eq!(provisioner.public_xy(), &xy(PROVISIONER_PUBLIC));

        let device = EcdhKeyPair::from_private_bytes(&hex::decode(DEVICE_PRIVATE).unwrap()).unwrap();
        assert_eq!(device.public_xy(), &xy(DEVICE_PUBLIC));
    }

    #[test]
    fn test_shared_secret_vector() {
        let provisioner =
            EcdhKeyPair::from_private_bytes(&hex::decode(PROVISIONER_PRIVATE).unwrap()).unwrap();
        let device = EcdhKeyPair::from_private_bytes(&hex::decode(DEVICE_PRIVATE).unwrap()).unwrap();

        let a = provisioner.agree(&xy(DEVICE_PUBLIC)).unwrap();
        let b = device.agree(&xy(PROVISIONER_PUBLIC)).unwrap();
        assert_eq!(hex::encode(a.as_bytes()), SHARED);
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_point_rejected() {
        let provisioner = EcdhKeyPair::generate();
        let mut corrupted = xy(DEVICE_PUBLIC);
        corrupted[63] ^= 0x01;
        assert_eq!(
            provisioner.agree(&corrupted).unwrap_err(),
            CryptoError::InvalidPoint
        );
        assert!(validate_public_key(&[0u8; PUBLIC_KEY_SIZE]).is_err());
    }

    #[test]
    fn test_other_valid_key_changes_secret() {
        let provisioner =
            EcdhKeyPair::from_private_bytes(&hex::decode(PROVISIONER_PRIVATE).unwrap()).unwrap();
        let other = EcdhKeyPair::generate();
        let secret = provisioner.agree(other.public_xy()).unwrap();
        assert_ne!(hex::encode(secret.as_bytes()), SHARED);
    }

    #[test]
    fn test_invalid_private_key() {
        assert_eq!(
            EcdhKeyPair::from_private_bytes(&[0u8; 32]).unwrap_err(),
            CryptoError::InvalidPrivateKey
        );
    }
}
