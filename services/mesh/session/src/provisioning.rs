//! Provisioning public key exchange.
//!
//! One [`ProvisioningSession`] exists per unprovisioned device and walks a
//! strict sequence:
//!
//! ```text
//! Idle -> KeyPairGenerated -> PublicKeySent -> PeerKeyReceived
//!                                     \-> Failed (invalid point, agreement failure)
//! ```
//!
//! `Failed` is terminal; a new attempt needs a new session.

use bytes::Bytes;
use mesh_crypto::{EcdhKeyPair, SharedSecret, PUBLIC_KEY_SIZE};
use mesh_wire::PublicKeyPdu;
use tracing::{debug, error, info};

use crate::error::ProvisioningError;

/// Key exchange progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    /// Nothing done yet
    Idle,
    /// Local key pair exists
    KeyPairGenerated,
    /// Local public key handed to the bearer
    PublicKeySent,
    /// Peer key validated and shared secret derived
    PeerKeyReceived,
    /// Aborted by a cryptographic or protocol fault
    Failed,
}

/// Provisioner side of the public key exchange with one device
#[derive(Debug)]
pub struct ProvisioningSession {
    state: ProvisioningState,
    key_pair: Option<EcdhKeyPair>,
    peer_public_key: Option<[u8; PUBLIC_KEY_SIZE]>,
    shared_secret: Option<SharedSecret>,
}

impl ProvisioningSession {
    /// Fresh session in `Idle`
    pub fn new() -> Self {
        Self {
            state: ProvisioningState::Idle,
            key_pair: None,
            peer_public_key: None,
            shared_secret: None,
        }
    }

    /// Current state
    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    fn require(&self, operation: &'static str, expected: ProvisioningState) -> Result<(), ProvisioningError> {
        if self.state != expected {
            return Err(ProvisioningError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Generate the local key pair
    pub fn generate_key_pair(&mut self) -> Result<&[u8; PUBLIC_KEY_SIZE], ProvisioningError> {
        self.require("generate_key_pair", ProvisioningState::Idle)?;
        self.install_key_pair(EcdhKeyPair::generate())
    }

    /// Use a caller-supplied key pair instead of a random one
    pub fn install_key_pair(
        &mut self,
        key_pair: EcdhKeyPair,
    ) -> Result<&[u8; PUBLIC_KEY_SIZE], ProvisioningError> {
        self.require("install_key_pair", ProvisioningState::Idle)?;
        debug!("Provisioning key pair ready: {}", hex::encode(key_pair.public_xy()));
        self.state = ProvisioningState::KeyPairGenerated;
        Ok(self.key_pair.insert(key_pair).public_xy())
    }

    /// Encode the local public key PDU and move to `PublicKeySent`
    pub fn send(&mut self) -> Result<Bytes, ProvisioningError> {
        let key_pair = match &self.key_pair {
            Some(key_pair) => key_pair,
            None => {
                self.state = ProvisioningState::Failed;
                error!("Provisioning aborted: public key send without a key pair");
                return Err(ProvisioningError::KeyPairMissing);
            }
        };
        self.require("send", ProvisioningState::KeyPairGenerated)?;
        let pdu = PublicKeyPdu::from_xy(key_pair.public_xy()).encode();
        self.state = ProvisioningState::PublicKeySent;
        info!("Provisioning public key sent ({} bytes)", pdu.len());
        Ok(pdu)
    }

    /// Validate the peer's public key PDU and derive the shared secret
    pub fn receive(&mut self, pdu: &[u8]) -> Result<&SharedSecret, ProvisioningError> {
        self.require("receive", ProvisioningState::PublicKeySent)?;
        match self.agree(pdu) {
            Ok((peer, secret)) => {
                self.peer_public_key = Some(peer);
                self.state = ProvisioningState::PeerKeyReceived;
                info!("Provisioning peer public key accepted, shared secret derived");
                Ok(self.shared_secret.insert(secret))
            }
            Err(e) => {
                self.state = ProvisioningState::Failed;
                self.key_pair = None;
                error!("Provisioning aborted: {}", e);
                Err(e)
            }
        }
    }

    fn agree(&self, pdu: &[u8]) -> Result<([u8; PUBLIC_KEY_SIZE], SharedSecret), ProvisioningError> {
        let key_pair = self.key_pair.as_ref().ok_or(ProvisioningError::KeyPairMissing)?;
        let peer = PublicKeyPdu::decode(pdu)?.xy();
        let secret = key_pair.agree(&peer)?;
        Ok((peer, secret))
    }

    /// Local public key as `X || Y`
    pub fn local_public_key(&self) -> Option<&[u8; PUBLIC_KEY_SIZE]> {
        self.key_pair.as_ref().map(EcdhKeyPair::public_xy)
    }

    /// Peer public key as `X || Y`, once received
    pub fn peer_public_key(&self) -> Option<&[u8; PUBLIC_KEY_SIZE]> {
        self.peer_public_key.as_ref()
    }

    /// Shared secret, once derived
    pub fn shared_secret(&self) -> Option<&SharedSecret> {
        self.shared_secret.as_ref()
    }

    /// Consume the session, yielding the shared secret if the exchange completed
    pub fn into_shared_secret(self) -> Option<SharedSecret> {
        match self.state {
            ProvisioningState::PeerKeyReceived => self.shared_secret,
            _ => None,
        }
    }
}

impl Default for ProvisioningSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::PUBLIC_KEY_PDU_SIZE;

    const PROVISIONER_PRIVATE: &str =
        "06a516693c9aa31a6084545d0c5db641b48572b97203ddffb7ac73f7d0457663";
    const DEVICE_PRIVATE: &str = "529aa0670d72cd6497502ed473502b037e8803b5c60829a5a3caa219505530ba";
    const SHARED: &str = "ab85843a2f6d883f62e5684b38e307335fe6e1945ecd19604105c6f23221eb69";

    fn key_pair(hex_private: &str) -> EcdhKeyPair {
        EcdhKeyPair::from_private_bytes(&hex::decode(hex_private).unwrap()).unwrap()
    }

    #[test]
    fn test_full_exchange_with_vectors() {
        let mut session = ProvisioningSession::new();
        session.install_key_pair(key_pair(PROVISIONER_PRIVATE)).unwrap();
        assert_eq!(session.state(), ProvisioningState::KeyPairGenerated);

        let pdu = session.send().unwrap();
        assert_eq!(pdu.len(), PUBLIC_KEY_PDU_SIZE);
        assert_eq!(&pdu[..2], &[0x03, 0x03]);
        assert_eq!(session.state(), ProvisioningState::PublicKeySent);

        let device = key_pair(DEVICE_PRIVATE);
        let device_pdu = PublicKeyPdu::from_xy(device.public_xy()).encode();
        let secret = session.receive(&device_pdu).unwrap();
        assert_eq!(hex::encode(secret.as_bytes()), SHARED);
        assert_eq!(session.state(), ProvisioningState::PeerKeyReceived);
        assert_eq!(session.peer_public_key(), Some(device.public_xy()));

        // The device derives the same secret from the provisioner's PDU
        let provisioner_xy = PublicKeyPdu::decode(&pdu).unwrap().xy();
        let device_secret = device.agree(&provisioner_xy).unwrap();
        assert_eq!(hex::encode(device_secret.as_bytes()), SHARED);

        let secret = session.into_shared_secret().unwrap();
        assert_eq!(hex::encode(secret.as_bytes()), SHARED);
    }

    #[test]
    fn test_send_before_key_pair_is_fatal() {
        let mut session = ProvisioningSession::new();
        assert_eq!(session.send(), Err(ProvisioningError::KeyPairMissing));
        assert_eq!(session.state(), ProvisioningState::Failed);
        assert!(session.generate_key_pair().is_err());
    }

    #[test]
    fn test_invalid_point_is_terminal() {
        let mut session = ProvisioningSession::new();
        session.generate_key_pair().unwrap();
        session.send().unwrap();

        let device = key_pair(DEVICE_PRIVATE);
        let mut xy = *device.public_xy();
        xy[40] ^= 0xFF;
        let bad = PublicKeyPdu::from_xy(&xy).encode();

        assert!(matches!(
            session.receive(&bad),
            Err(ProvisioningError::Crypto(mesh_crypto::CryptoError::InvalidPoint))
        ));
        assert_eq!(session.state(), ProvisioningState::Failed);
        assert!(session.shared_secret().is_none());

        let good = PublicKeyPdu::from_xy(device.public_xy()).encode();
        assert!(matches!(
            session.receive(&good),
            Err(ProvisioningError::InvalidState { .. })
        ));
        assert!(session.into_shared_secret().is_none());
    }

    #[test]
    fn test_receive_before_send_rejected() {
        let mut session = ProvisioningSession::new();
        session.generate_key_pair().unwrap();
        let err = session.receive(&[0u8; PUBLIC_KEY_PDU_SIZE]).unwrap_err();
        assert_eq!(
            err,
            ProvisioningError::InvalidState {
                operation: "receive",
                state: ProvisioningState::KeyPairGenerated
            }
        );
        // Out-of-order calls leave the session usable
        assert_eq!(session.state(), ProvisioningState::KeyPairGenerated);
    }

    #[test]
    fn test_malformed_pdu_aborts() {
        let mut session = ProvisioningSession::new();
        session.generate_key_pair().unwrap();
        session.send().unwrap();
        assert!(matches!(
            session.receive(&[0x03, 0x03, 0x00]),
            Err(ProvisioningError::Wire(_))
        ));
        assert_eq!(session.state(), ProvisioningState::Failed);
    }
}
