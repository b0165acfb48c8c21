//! Proxy and network layer headers.
//!
//! Every PDU handed to the bearer starts with a one-byte proxy header
//! `SAR(2) | Type(6)`. Network PDUs then carry a 9-byte network header:
//!
//! ```text
//! +-----------+-----------+-----------+---------+---------+
//! | IVI | NID | CTL | TTL | SEQ (3B)  | SRC (2B)| DST (2B)|
//! +-----------+-----------+-----------+---------+---------+
//! ```
//!
//! The header is encoded here in the clear; obfuscation of `CTL|TTL..SRC`
//! and encryption of `DST||TransportPDU` happen in the session layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::WireError;

/// Proxy header size in bytes
pub const PROXY_HEADER_SIZE: usize = 1;

/// Clear network header size in bytes
pub const NETWORK_HEADER_SIZE: usize = 9;

/// Number of header bytes covered by obfuscation (`CTL|TTL`, SEQ, SRC)
pub const OBFUSCATED_HEADER_SIZE: usize = 6;

/// NetMIC size for access messages
pub const NET_MIC_ACCESS: usize = 4;

/// NetMIC size for control messages
pub const NET_MIC_CONTROL: usize = 8;

/// Largest network PDU the bearer will carry
pub const MAX_NETWORK_PDU_SIZE: usize = 29;

/// Largest sequence number (24 bits)
pub const MAX_SEQUENCE_NUMBER: u32 = 0x00FF_FFFF;

/// Largest TTL value (7 bits)
pub const MAX_TTL: u8 = 0x7F;

/// Proxy PDU message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyPduType {
    /// Network PDU
    Network = 0x00,
    /// Mesh beacon
    MeshBeacon = 0x01,
    /// Proxy configuration
    ProxyConfiguration = 0x02,
    /// Provisioning PDU
    Provisioning = 0x03,
}

impl TryFrom<u8> for ProxyPduType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ProxyPduType::Network),
            0x01 => Ok(ProxyPduType::MeshBeacon),
            0x02 => Ok(ProxyPduType::ProxyConfiguration),
            0x03 => Ok(ProxyPduType::Provisioning),
            _ => Err(WireError::Type(value)),
        }
    }
}

/// Segmentation-and-reassembly field of the proxy header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sar {
    /// Complete message
    Complete = 0b00,
    /// First segment
    First = 0b01,
    /// Continuation segment
    Continuation = 0b10,
    /// Last segment
    Last = 0b11,
}

impl From<u8> for Sar {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0b00 => Sar::Complete,
            0b01 => Sar::First,
            0b10 => Sar::Continuation,
            _ => Sar::Last,
        }
    }
}

/// One-byte proxy header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHeader {
    /// SAR bits
    pub sar: Sar,
    /// Message type
    pub typ: ProxyPduType,
}

impl ProxyHeader {
    /// Header for a complete (unsegmented) proxy PDU
    pub fn complete(typ: ProxyPduType) -> Self {
        Self {
            sar: Sar::Complete,
            typ,
        }
    }

    /// Header byte value
    pub fn to_byte(self) -> u8 {
        ((self.sar as u8) << 6) | (self.typ as u8)
    }

    /// Parse a header byte
    pub fn from_byte(value: u8) -> Result<Self, WireError> {
        Ok(Self {
            sar: Sar::from(value >> 6),
            typ: ProxyPduType::try_from(value & 0x3F)?,
        })
    }

    /// Encode into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.to_byte());
    }

    /// Decode from the front of a buffer
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < PROXY_HEADER_SIZE {
            return Err(WireError::need(PROXY_HEADER_SIZE, buf.remaining()));
        }
        Self::from_byte(buf.get_u8())
    }
}

/// Prefix `payload` with a complete proxy header of the given type
pub fn wrap_proxy(typ: ProxyPduType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PROXY_HEADER_SIZE + payload.len());
    ProxyHeader::complete(typ).encode(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a bearer PDU into its proxy header and body
pub fn unwrap_proxy(mut pdu: Bytes) -> Result<(ProxyHeader, Bytes), WireError> {
    let header = ProxyHeader::decode(&mut pdu)?;
    Ok((header, pdu))
}

/// Clear-text network header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHeader {
    /// Least significant bit of the IV index
    pub ivi: u8,
    /// Network identifier (7 bits)
    pub nid: u8,
    /// Control message flag
    pub ctl: bool,
    /// Time to live (7 bits)
    pub ttl: u8,
    /// Sequence number (24 bits)
    pub seq: u32,
    /// Source unicast address
    pub src: u16,
    /// Destination address
    pub dst: u16,
}

impl NetworkHeader {
    /// `IVI | NID` octet
    pub fn ivi_nid(&self) -> u8 {
        ((self.ivi & 0x01) << 7) | (self.nid & 0x7F)
    }

    /// `CTL | TTL` octet
    pub fn ctl_ttl(&self) -> u8 {
        ((self.ctl as u8) << 7) | (self.ttl & MAX_TTL)
    }

    /// NetMIC length implied by the CTL flag
    pub fn net_mic_len(&self) -> usize {
        if self.ctl {
            NET_MIC_CONTROL
        } else {
            NET_MIC_ACCESS
        }
    }

    /// The six octets that get obfuscated: `CTL|TTL || SEQ || SRC`
    pub fn obfuscated_fields(&self) -> [u8; OBFUSCATED_HEADER_SIZE] {
        let seq = self.seq.to_be_bytes();
        let src = self.src.to_be_bytes();
        [self.ctl_ttl(), seq[1], seq[2], seq[3], src[0], src[1]]
    }

    /// Rebuild a header from its first octet, the six de-obfuscated octets and DST
    pub fn from_fields(ivi_nid: u8, fields: [u8; OBFUSCATED_HEADER_SIZE], dst: u16) -> Self {
        Self {
            ivi: ivi_nid >> 7,
            nid: ivi_nid & 0x7F,
            ctl: fields[0] & 0x80 != 0,
            ttl: fields[0] & MAX_TTL,
            seq: u32::from_be_bytes([0, fields[1], fields[2], fields[3]]),
            src: u16::from_be_bytes([fields[4], fields[5]]),
            dst,
        }
    }

    /// Encode the clear header
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ivi_nid());
        buf.put_slice(&self.obfuscated_fields());
        buf.put_u16(self.dst);
    }

    /// Decode a clear header
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < NETWORK_HEADER_SIZE {
            return Err(WireError::need(NETWORK_HEADER_SIZE, buf.remaining()));
        }
        let ivi_nid = buf.get_u8();
        let mut fields = [0u8; OBFUSCATED_HEADER_SIZE];
        buf.copy_to_slice(&mut fields);
        let dst = buf.get_u16();
        Ok(Self::from_fields(ivi_nid, fields, dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_header_byte() {
        let header = ProxyHeader::complete(ProxyPduType::Provisioning);
        assert_eq!(header.to_byte(), 0x03);

        let header = ProxyHeader::from_byte(0x40).unwrap();
        assert_eq!(header.sar, Sar::First);
        assert_eq!(header.typ, ProxyPduType::Network);

        assert_eq!(ProxyHeader::from_byte(0x3F), Err(WireError::Type(0x3F)));
    }

    #[test]
    fn test_wrap_unwrap_proxy() {
        let pdu = wrap_proxy(ProxyPduType::Network, &[1, 2, 3]);
        assert_eq!(&pdu[..], &[0x00, 1, 2, 3]);

        let (header, body) = unwrap_proxy(pdu).unwrap();
        assert_eq!(header.typ, ProxyPduType::Network);
        assert_eq!(&body[..], &[1, 2, 3]);

        assert!(unwrap_proxy(Bytes::new()).is_err());
    }

    #[test]
    fn test_network_header_layout() {
        let header = NetworkHeader {
            ivi: 1,
            nid: 0x68,
            ctl: false,
            ttl: 4,
            seq: 0x000007,
            src: 0x1201,
            dst: 0xFFFD,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(
            &buf[..],
            &[0xE8, 0x04, 0x00, 0x00, 0x07, 0x12, 0x01, 0xFF, 0xFD]
        );

        let decoded = NetworkHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.net_mic_len(), NET_MIC_ACCESS);
    }

    #[test]
    fn test_network_header_control_flag() {
        let header = NetworkHeader {
            ivi: 0,
            nid: 0x7F,
            ctl: true,
            ttl: 0,
            seq: 0x3129AB,
            src: 0x0003,
            dst: 0x1201,
        };
        let fields = header.obfuscated_fields();
        assert_eq!(fields, [0x80, 0x31, 0x29, 0xAB, 0x00, 0x03]);
        assert_eq!(NetworkHeader::from_fields(0x7F, fields, 0x1201), header);
        assert_eq!(header.net_mic_len(), NET_MIC_CONTROL);
    }

    #[test]
    fn test_network_header_truncated() {
        let mut buf = Bytes::from_static(&[0x68, 0x04, 0x00]);
        assert_eq!(
            NetworkHeader::decode(&mut buf),
            Err(WireError::Incomplete { need: 9, have: 3 })
        );
    }
}
