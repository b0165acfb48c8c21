//! Provisioning PDUs.
//!
//! Provisioning PDUs travel behind a proxy header of type
//! [`ProxyPduType::Provisioning`]. Only the public key exchange is encoded
//! here; the 64-octet body is the uncompressed P-256 point without its
//! SEC1 prefix:
//!
//! ```text
//! +------+------+----------------+----------------+
//! | 0x03 | 0x03 | X (32B, BE)    | Y (32B, BE)    |
//! +------+------+----------------+----------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::header::ProxyPduType;
use crate::WireError;

/// Size of one P-256 coordinate
pub const COORDINATE_SIZE: usize = 32;

/// Header octets preceding the public key (proxy type, provisioning type)
pub const PROVISIONING_HEADER_SIZE: usize = 2;

/// Size of a complete provisioning public key PDU
pub const PUBLIC_KEY_PDU_SIZE: usize = PROVISIONING_HEADER_SIZE + 2 * COORDINATE_SIZE;

/// Provisioning PDU types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisioningPduType {
    /// Provisioning invite
    Invite = 0x00,
    /// Provisioning capabilities
    Capabilities = 0x01,
    /// Provisioning start
    Start = 0x02,
    /// Provisioning public key
    PublicKey = 0x03,
    /// Input complete
    InputComplete = 0x04,
    /// Provisioning confirmation
    Confirmation = 0x05,
    /// Provisioning random
    Random = 0x06,
    /// Provisioning data
    Data = 0x07,
    /// Provisioning complete
    Complete = 0x08,
    /// Provisioning failed
    Failed = 0x09,
}

impl TryFrom<u8> for ProvisioningPduType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ProvisioningPduType::Invite),
            0x01 => Ok(ProvisioningPduType::Capabilities),
            0x02 => Ok(ProvisioningPduType::Start),
            0x03 => Ok(ProvisioningPduType::PublicKey),
            0x04 => Ok(ProvisioningPduType::InputComplete),
            0x05 => Ok(ProvisioningPduType::Confirmation),
            0x06 => Ok(ProvisioningPduType::Random),
            0x07 => Ok(ProvisioningPduType::Data),
            0x08 => Ok(ProvisioningPduType::Complete),
            0x09 => Ok(ProvisioningPduType::Failed),
            _ => Err(WireError::Type(value)),
        }
    }
}

/// Provisioning public key PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyPdu {
    /// X coordinate, big-endian
    pub x: [u8; COORDINATE_SIZE],
    /// Y coordinate, big-endian
    pub y: [u8; COORDINATE_SIZE],
}

impl PublicKeyPdu {
    /// Build from the 64-octet `X || Y` concatenation
    pub fn from_xy(xy: &[u8; 2 * COORDINATE_SIZE]) -> Self {
        let mut x = [0u8; COORDINATE_SIZE];
        let mut y = [0u8; COORDINATE_SIZE];
        x.copy_from_slice(&xy[..COORDINATE_SIZE]);
        y.copy_from_slice(&xy[COORDINATE_SIZE..]);
        Self { x, y }
    }

    /// `X || Y`
    pub fn xy(&self) -> [u8; 2 * COORDINATE_SIZE] {
        let mut xy = [0u8; 2 * COORDINATE_SIZE];
        xy[..COORDINATE_SIZE].copy_from_slice(&self.x);
        xy[COORDINATE_SIZE..].copy_from_slice(&self.y);
        xy
    }

    /// Encode the full 66-octet PDU
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PUBLIC_KEY_PDU_SIZE);
        buf.put_u8(ProxyPduType::Provisioning as u8);
        buf.put_u8(ProvisioningPduType::PublicKey as u8);
        buf.put_slice(&self.x);
        buf.put_slice(&self.y);
        buf.freeze()
    }

    /// Decode a received 66-octet PDU
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < PUBLIC_KEY_PDU_SIZE {
            return Err(WireError::need(PUBLIC_KEY_PDU_SIZE, raw.len()));
        }
        if raw.len() > PUBLIC_KEY_PDU_SIZE {
            return Err(WireError::Trailing(raw.len() - PUBLIC_KEY_PDU_SIZE));
        }
        if ProxyPduType::try_from(raw[0])? != ProxyPduType::Provisioning {
            return Err(WireError::Type(raw[0]));
        }
        if ProvisioningPduType::try_from(raw[1])? != ProvisioningPduType::PublicKey {
            return Err(WireError::Type(raw[1]));
        }
        let mut xy = [0u8; 2 * COORDINATE_SIZE];
        xy.copy_from_slice(&raw[PROVISIONING_HEADER_SIZE..]);
        Ok(Self::from_xy(&xy))
    }
}

/// Provisioning type of a raw PDU that starts with its proxy header
pub fn provisioning_pdu_type(raw: &[u8]) -> Result<ProvisioningPduType, WireError> {
    if raw.len() < PROVISIONING_HEADER_SIZE {
        return Err(WireError::need(PROVISIONING_HEADER_SIZE, raw.len()));
    }
    if raw[0] & 0x3F != ProxyPduType::Provisioning as u8 {
        return Err(WireError::Type(raw[0]));
    }
    ProvisioningPduType::try_from(raw[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_pdu_layout() {
        let pdu = PublicKeyPdu {
            x: [0x11; COORDINATE_SIZE],
            y: [0x22; COORDINATE_SIZE],
        };
        let raw = pdu.encode();
        assert_eq!(raw.len(), PUBLIC_KEY_PDU_SIZE);
        assert_eq!(&raw[..2], &[0x03, 0x03]);
        assert_eq!(raw[2], 0x11);
        assert_eq!(raw[34], 0x22);

        assert_eq!(PublicKeyPdu::decode(&raw).unwrap(), pdu);
        assert_eq!(
            provisioning_pdu_type(&raw).unwrap(),
            ProvisioningPduType::PublicKey
        );
    }

    #[test]
    fn test_public_key_pdu_rejects_bad_input() {
        assert_eq!(
            PublicKeyPdu::decode(&[0x03, 0x03, 0x00]),
            Err(WireError::Incomplete { need: 66, have: 3 })
        );

        let mut raw = vec![0x03, 0x02];
        raw.extend_from_slice(&[0u8; 64]);
        assert_eq!(PublicKeyPdu::decode(&raw), Err(WireError::Type(0x02)));

        raw[0] = 0x00;
        raw[1] = 0x03;
        assert_eq!(PublicKeyPdu::decode(&raw), Err(WireError::Type(0x00)));
    }

    #[test]
    fn test_xy_concatenation() {
        let mut xy = [0u8; 64];
        xy[0] = 0xAB;
        xy[63] = 0xCD;
        let pdu = PublicKeyPdu::from_xy(&xy);
        assert_eq!(pdu.x[0], 0xAB);
        assert_eq!(pdu.y[31], 0xCD);
        assert_eq!(pdu.xy(), xy);
    }
}
