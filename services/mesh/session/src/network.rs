//! Network layer: NetMIC encryption and header obfuscation.

use bytes::{BufMut, Bytes, BytesMut};
use mesh_crypto::{network_nonce, obfuscate, open, seal, MicSize, NetworkKey, NetworkSecrets};
use mesh_wire::{
    NetworkHeader, WireError, MAX_NETWORK_PDU_SIZE, NETWORK_HEADER_SIZE, NET_MIC_ACCESS,
    OBFUSCATED_HEADER_SIZE,
};
use tracing::trace;

use crate::error::TransportError;

/// Smallest network PDU: clear header, one transport octet and a short NetMIC
pub const MIN_NETWORK_PDU_SIZE: usize = NETWORK_HEADER_SIZE + 1 + NET_MIC_ACCESS;

fn net_mic(ctl: bool) -> MicSize {
    if ctl {
        MicSize::Long
    } else {
        MicSize::Short
    }
}

/// A decrypted network PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPdu {
    /// De-obfuscated header
    pub header: NetworkHeader,
    /// IV index the PDU was accepted under
    pub iv_index: u32,
    /// Lower transport PDU
    pub transport: Bytes,
}

/// Encrypts and decrypts network PDUs for one network key
#[derive(Debug)]
pub struct NetworkLayer {
    secrets: NetworkSecrets,
    iv_index: u32,
}

impl NetworkLayer {
    /// Derive the network secrets for `key`
    pub fn new(key: &NetworkKey, iv_index: u32) -> Self {
        Self {
            secrets: key.derive(),
            iv_index,
        }
    }

    /// Current IV index
    pub fn iv_index(&self) -> u32 {
        self.iv_index
    }

    /// NID of the bound network key
    pub fn nid(&self) -> u8 {
        self.secrets.nid()
    }

    /// Fill in IVI and NID for an outbound header
    pub fn header(&self, ctl: bool, ttl: u8, seq: u32, src: u16, dst: u16) -> NetworkHeader {
        NetworkHeader {
            ivi: (self.iv_index & 0x01) as u8,
            nid: self.secrets.nid(),
            ctl,
            ttl,
            seq,
            src,
            dst,
        }
    }

    /// Encrypt `DST || transport` and obfuscate the header
    pub fn encode(&self, header: &NetworkHeader, transport: &[u8]) -> Result<Bytes, TransportError> {
        let mic = net_mic(header.ctl);
        let size = NETWORK_HEADER_SIZE + transport.len() + mic.len();
        if transport.is_empty() || size > MAX_NETWORK_PDU_SIZE {
            return Err(WireError::Size(size).into());
        }

        let mut plaintext = BytesMut::with_capacity(2 + transport.len());
        plaintext.put_u16(header.dst);
        plaintext.put_slice(transport);

        let nonce = network_nonce(header.ctl_ttl(), header.seq, header.src, self.iv_index);
        let encrypted = seal(self.secrets.encryption_key(), &nonce, &plaintext, &[], mic)?;
        let obfuscated = obfuscate(
            self.secrets.privacy_key(),
            self.iv_index,
            &encrypted,
            header.obfuscated_fields(),
        )?;

        let mut pdu = BytesMut::with_capacity(size);
        pdu.put_u8(header.ivi_nid());
        pdu.put_slice(&obfuscated);
        pdu.put_slice(&encrypted);
        trace!(
            "Network PDU seq={:#08x} src={:#06x} dst={:#06x}: {}",
            header.seq,
            header.src,
            header.dst,
            hex::encode(&pdu)
        );
        Ok(pdu.freeze())
    }

    /// IV index implied by the received IVI bit
    pub fn reception_iv_index(&self, ivi: u8) -> u32 {
        if u32::from(ivi & 0x01) == self.iv_index & 0x01 {
            self.iv_index
        } else {
            self.iv_index.wrapping_sub(1)
        }
    }

    /// De-obfuscate, authenticate and decrypt a network PDU
    pub fn decode(&self, raw: &[u8]) -> Result<NetworkPdu, TransportError> {
        if raw.len() < MIN_NETWORK_PDU_SIZE {
            return Err(WireError::Incomplete {
                need: MIN_NETWORK_PDU_SIZE,
                have: raw.len(),
            }
            .into());
        }
        if raw.len() > MAX_NETWORK_PDU_SIZE {
            return Err(WireError::Size(raw.len()).into());
        }

        let ivi_nid = raw[0];
        let nid = ivi_nid & 0x7F;
        if nid != self.secrets.nid() {
            return Err(TransportError::UnknownNid(nid));
        }
        let iv_index = self.reception_iv_index(ivi_nid >> 7);

        let encrypted = &raw[1 + OBFUSCATED_HEADER_SIZE..];
        let mut obfuscated = [0u8; OBFUSCATED_HEADER_SIZE];
        obfuscated.copy_from_slice(&raw[1..1 + OBFUSCATED_HEADER_SIZE]);
        let fields = obfuscate(self.secrets.privacy_key(), iv_index, encrypted, obfuscated)?;

        let partial = NetworkHeader::from_fields(ivi_nid, fields, 0);
        let mic = net_mic(partial.ctl);
        let nonce = network_nonce(partial.ctl_ttl(), partial.seq, partial.src, iv_index);
        let plaintext = open(self.secrets.encryption_key(), &nonce, encrypted, &[], mic)?;
        if plaintext.len() < 3 {
            return Err(WireError::Incomplete {
                need: 3,
                have: plaintext.len(),
            }
            .into());
        }

        let mut plaintext = Bytes::from(plaintext);
        let dst = u16::from_be_bytes([plaintext[0], plaintext[1]]);
        let transport = plaintext.split_off(2);
        Ok(NetworkPdu {
            header: NetworkHeader { dst, ..partial },
            iv_index,
            transport,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_KEY: &str = "7dd7364cd842ad18c17c2b820c84c3d6";
    const TRANSPORT: &str = "034b50057e400000010000";
    const NETWORK_PDU: &str = "68eca487516765b5e5bfdacbaf6cb7fb6bff871f035444ce83a670df";

    fn layer(iv_index: u32) -> NetworkLayer {
        NetworkLayer::new(&NetworkKey::from_hex(NET_KEY).unwrap(), iv_index)
    }

    #[test]
    fn test_encode_sample_control_message() {
        let layer = layer(0x12345678);
        assert_eq!(layer.nid(), 0x68);
        let header = layer.header(true, 0, 0x000001, 0x1201, 0xFFFD);
        let pdu = layer.encode(&header, &hex::decode(TRANSPORT).unwrap()).unwrap();
        assert_eq!(hex::encode(&pdu), NETWORK_PDU);
    }

    #[test]
    fn test_decode_sample_control_message() {
        let layer = layer(0x12345678);
        let pdu = layer.decode(&hex::decode(NETWORK_PDU).unwrap()).unwrap();
        assert_eq!(pdu.header.seq, 1);
        assert_eq!(pdu.header.src, 0x1201);
        assert_eq!(pdu.header.dst, 0xFFFD);
        assert!(pdu.header.ctl);
        assert_eq!(pdu.header.ttl, 0);
        assert_eq!(pdu.iv_index, 0x12345678);
        assert_eq!(hex::encode(&pdu.transport), TRANSPORT);
    }

    #[test]
    fn test_access_roundtrip_and_tamper() {
        let layer = layer(7);
        let header = layer.header(false, 5, 0x00_0102, 0x0001, 0x0100);
        let pdu = layer.encode(&header, &[0x66, 1, 2, 3, 4, 5]).unwrap();
        let decoded = layer.decode(&pdu).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(&decoded.transport[..], &[0x66, 1, 2, 3, 4, 5]);

        let mut tampered = pdu.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            layer.decode(&tampered),
            Err(TransportError::Crypto(_))
        ));
    }

    #[test]
    fn test_previous_iv_index_accepted() {
        let sender = layer(0x12345678);
        let receiver = layer(0x12345679);
        let header = sender.header(false, 3, 9, 0x0002, 0x0001);
        let pdu = sender.encode(&header, &[0x00, 0xAA]).unwrap();
        let decoded = receiver.decode(&pdu).unwrap();
        assert_eq!(decoded.iv_index, 0x12345678);
        assert_eq!(decoded.header.seq, 9);
    }

    #[test]
    fn test_rejects_wrong_nid_and_short() {
        let layer = layer(0);
        let mut raw = hex::decode(NETWORK_PDU).unwrap();
        raw[0] = 0x11;
        assert!(matches!(layer.decode(&raw), Err(TransportError::UnknownNid(0x11))));
        assert!(matches!(
            layer.decode(&raw[..10]),
            Err(TransportError::Wire(WireError::Incomplete { .. }))
        ));
    }

    #[test]
    fn test_rejects_oversized_transport() {
        let layer = layer(0);
        let header = layer.header(false, 0, 1, 1, 2);
        assert!(layer.encode(&header, &[0u8; 17]).is_err());
        assert!(layer.encode(&header, &[0u8; 16]).is_ok());
    }
}
