//! Lower transport PDUs.
//!
//! ```text
//! Unsegmented access:   SEG=0 | AKF | AID(6)   upper transport PDU (<= 15B)
//! Segmented access:     SEG=1 | AKF | AID(6)   SZMIC | SeqZero(13) | SegO(5) | SegN(5)   segment (<= 12B)
//! Unsegmented control:  SEG=0 | Opcode(7)      parameters (<= 11B)
//! Segment ack:          SEG=0 | 0x00           OBO | SeqZero(13) | RFU(2)   BlockAck (4B)
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::segment::BlockAck;
use crate::WireError;

/// Largest upper transport PDU carried in one unsegmented access PDU
pub const MAX_UNSEGMENTED_ACCESS_PAYLOAD: usize = 15;

/// Largest segment of a segmented access PDU
pub const MAX_SEGMENTED_ACCESS_PAYLOAD: usize = 12;

/// Largest parameter block of an unsegmented control PDU
pub const MAX_UNSEGMENTED_CONTROL_PAYLOAD: usize = 11;

/// Largest segment of a segmented control PDU
pub const MAX_SEGMENTED_CONTROL_PAYLOAD: usize = 8;

/// Mask for the 6-bit application key identifier
pub const AID_MASK: u8 = 0x3F;

/// Mask for the 13-bit SeqZero field
pub const SEQ_ZERO_MASK: u16 = 0x1FFF;

/// Mask for the 5-bit SegO/SegN fields
pub const SEG_MASK: u8 = 0x1F;

/// Mask for the 7-bit control opcode
pub const CONTROL_OPCODE_MASK: u8 = 0x7F;

/// Control opcode of a segment acknowledgement
pub const SEGMENT_ACK_OPCODE: u8 = 0x00;

/// Size of the segmentation header following the first octet
pub const SEGMENT_HEADER_SIZE: usize = 3;

bitflags! {
    /// First-octet flags of a lower transport PDU
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LowerFlags: u8 {
        /// PDU is one segment of a segmented message
        const SEG = 0x80;
        /// Upper transport PDU is encrypted with an application key
        const AKF = 0x40;
    }
}

/// Segmentation header of a segmented PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// TransMIC is 8 octets (access messages only)
    pub szmic: bool,
    /// Low 13 bits of the sequence number of the first segment
    pub seq_zero: u16,
    /// Offset of this segment
    pub seg_o: u8,
    /// Number of the last segment
    pub seg_n: u8,
}

impl SegmentHeader {
    /// Pack into the 24-bit wire value
    pub fn pack(&self) -> u32 {
        ((self.szmic as u32) << 23)
            | (((self.seq_zero & SEQ_ZERO_MASK) as u32) << 10)
            | (((self.seg_o & SEG_MASK) as u32) << 5)
            | (self.seg_n & SEG_MASK) as u32
    }

    /// Unpack from a 24-bit wire value
    pub fn unpack(value: u32) -> Self {
        Self {
            szmic: (value >> 23) & 1 == 1,
            seq_zero: ((value >> 10) as u16) & SEQ_ZERO_MASK,
            seg_o: ((value >> 5) as u8) & SEG_MASK,
            seg_n: (value as u8) & SEG_MASK,
        }
    }

    /// Encode the three header octets
    pub fn encode(&self, buf: &mut BytesMut) {
        let packed = self.pack().to_be_bytes();
        buf.put_slice(&packed[1..]);
    }

    /// Decode the three header octets
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < SEGMENT_HEADER_SIZE {
            return Err(WireError::need(SEGMENT_HEADER_SIZE, buf.remaining()));
        }
        let header = Self::unpack(
            ((buf.get_u8() as u32) << 16) | ((buf.get_u8() as u32) << 8) | buf.get_u8() as u32,
        );
        if header.seg_o > header.seg_n {
            return Err(WireError::Segment {
                seg_o: header.seg_o,
                seg_n: header.seg_n,
            });
        }
        Ok(header)
    }
}

/// Decoded lower transport PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerTransportPdu {
    /// Whole upper transport access PDU
    UnsegmentedAccess {
        /// Application key flag
        akf: bool,
        /// Application key identifier
        aid: u8,
        /// Upper transport PDU (encrypted access payload plus TransMIC)
        upper: Bytes,
    },
    /// One segment of an upper transport access PDU
    SegmentedAccess {
        /// Application key flag
        akf: bool,
        /// Application key identifier
        aid: u8,
        /// Segmentation header
        header: SegmentHeader,
        /// Segment payload
        segment: Bytes,
    },
    /// Unsegmented transport control message other than a segment ack
    UnsegmentedControl {
        /// Control opcode
        opcode: u8,
        /// Control parameters
        parameters: Bytes,
    },
    /// One segment of a transport control message
    SegmentedControl {
        /// Control opcode
        opcode: u8,
        /// Segmentation header
        header: SegmentHeader,
        /// Segment payload
        segment: Bytes,
    },
    /// Segment acknowledgement
    SegmentAck {
        /// Acknowledged on behalf of a low power node
        obo: bool,
        /// SeqZero of the acknowledged transfer
        seq_zero: u16,
        /// Received segments
        block_ack: BlockAck,
    },
}

fn akf_aid(akf: bool, aid: u8) -> u8 {
    let mut flags = LowerFlags::empty();
    flags.set(LowerFlags::AKF, akf);
    flags.bits() | (aid & AID_MASK)
}

impl LowerTransportPdu {
    /// Whether this PDU travels with CTL=1
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            LowerTransportPdu::UnsegmentedControl { .. }
                | LowerTransportPdu::SegmentedControl { .. }
                | LowerTransportPdu::SegmentAck { .. }
        )
    }

    /// Whether this PDU is one segment of a larger message
    pub fn is_segmented(&self) -> bool {
        matches!(
            self,
            LowerTransportPdu::SegmentedAccess { .. } | LowerTransportPdu::SegmentedControl { .. }
        )
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + SEGMENT_HEADER_SIZE + MAX_UNSEGMENTED_ACCESS_PAYLOAD);
        match self {
            LowerTransportPdu::UnsegmentedAccess { akf, aid, upper } => {
                buf.put_u8(akf_aid(*akf, *aid));
                buf.put_slice(upper);
            }
            LowerTransportPdu::SegmentedAccess {
                akf,
                aid,
                header,
                segment,
            } => {
                buf.put_u8(LowerFlags::SEG.bits() | akf_aid(*akf, *aid));
                header.encode(&mut buf);
                buf.put_slice(segment);
            }
            LowerTransportPdu::UnsegmentedControl { opcode, parameters } => {
                buf.put_u8(opcode & CONTROL_OPCODE_MASK);
                buf.put_slice(parameters);
            }
            LowerTransportPdu::SegmentedControl {
                opcode,
                header,
                segment,
            } => {
                buf.put_u8(LowerFlags::SEG.bits() | (opcode & CONTROL_OPCODE_MASK));
                header.encode(&mut buf);
                buf.put_slice(segment);
            }
            LowerTransportPdu::SegmentAck {
                obo,
                seq_zero,
                block_ack,
            } => {
                buf.put_u8(SEGMENT_ACK_OPCODE);
                buf.put_u16(((*obo as u16) << 15) | ((seq_zero & SEQ_ZERO_MASK) << 2));
                buf.put_u32(block_ack.bits());
            }
        }
        buf.freeze()
    }

    /// Decode a lower transport PDU; `ctl` comes from the network header
    pub fn decode(ctl: bool, mut buf: Bytes) -> Result<Self, WireError> {
        if !buf.has_remaining() {
            return Err(WireError::need(1, 0));
        }
        let first = buf.get_u8();
        let seg = LowerFlags::from_bits_truncate(first).contains(LowerFlags::SEG);

        if !ctl {
            let akf = LowerFlags::from_bits_truncate(first).contains(LowerFlags::AKF);
            let aid = first & AID_MASK;
            if !seg {
                if buf.remaining() > MAX_UNSEGMENTED_ACCESS_PAYLOAD {
                    return Err(WireError::Size(buf.remaining()));
                }
                return Ok(LowerTransportPdu::UnsegmentedAccess { akf, aid, upper: buf });
            }
            let header = SegmentHeader::decode(&mut buf)?;
            if buf.is_empty() || buf.remaining() > MAX_SEGMENTED_ACCESS_PAYLOAD {
                return Err(WireError::Size(buf.remaining()));
            }
            return Ok(LowerTransportPdu::SegmentedAccess {
                akf,
                aid,
                header,
                segment: buf,
            });
        }

        let opcode = first & CONTROL_OPCODE_MASK;
        if seg {
            let header = SegmentHeader::decode(&mut buf)?;
            if buf.is_empty() || buf.remaining() > MAX_SEGMENTED_CONTROL_PAYLOAD {
                return Err(WireError::Size(buf.remaining()));
            }
            return Ok(LowerTransportPdu::SegmentedControl {
                opcode,
                header,
                segment: buf,
            });
        }

        if opcode == SEGMENT_ACK_OPCODE {
            if buf.remaining() != 6 {
                return Err(WireError::Size(buf.remaining()));
            }
            let field = buf.get_u16();
            if field & 0x0003 != 0 {
                return Err(WireError::Reserved);
            }
            return Ok(LowerTransportPdu::SegmentAck {
                obo: field & 0x8000 != 0,
                seq_zero: (field >> 2) & SEQ_ZERO_MASK,
                block_ack: BlockAck::new(buf.get_u32()),
            });
        }

        if buf.remaining() > MAX_UNSEGMENTED_CONTROL_PAYLOAD {
            return Err(WireError::Size(buf.remaining()));
        }
        Ok(LowerTransportPdu::UnsegmentedControl {
            opcode,
            parameters: buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_header_packing() {
        let header = SegmentHeader {
            szmic: false,
            seq_zero: 0x0007,
            seg_o: 1,
            seg_n: 2,
        };
        assert_eq!(header.pack(), 0x00_1C22);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[..], &[0x00, 0x1C, 0x22]);
        assert_eq!(SegmentHeader::decode(&mut buf.freeze()).unwrap(), header);

        let full = SegmentHeader {
            szmic: true,
            seq_zero: SEQ_ZERO_MASK,
            seg_o: 31,
            seg_n: 31,
        };
        assert_eq!(SegmentHeader::unpack(full.pack()), full);
    }

    #[test]
    fn test_segment_header_offset_past_last() {
        let header = SegmentHeader {
            szmic: false,
            seq_zero: 1,
            seg_o: 3,
            seg_n: 2,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(
            SegmentHeader::decode(&mut buf.freeze()),
            Err(WireError::Segment { seg_o: 3, seg_n: 2 })
        );
    }

    #[test]
    fn test_unsegmented_access() {
        let pdu = LowerTransportPdu::UnsegmentedAccess {
            akf: true,
            aid: 0x26,
            upper: Bytes::from_static(&[0xAA; 6]),
        };
        let raw = pdu.encode();
        assert_eq!(raw[0], 0x66);
        assert_eq!(LowerTransportPdu::decode(false, raw).unwrap(), pdu);
        assert!(!pdu.is_control());
    }

    #[test]
    fn test_segmented_access() {
        let pdu = LowerTransportPdu::SegmentedAccess {
            akf: false,
            aid: 0,
            header: SegmentHeader {
                szmic: true,
                seq_zero: 0x1234 & SEQ_ZERO_MASK,
                seg_o: 0,
                seg_n: 1,
            },
            segment: Bytes::from_static(&[0x55; 12]),
        };
        let raw = pdu.encode();
        assert_eq!(raw[0], 0x80);
        assert_eq!(raw.len(), 16);
        let decoded = LowerTransportPdu::decode(false, raw).unwrap();
        assert_eq!(decoded, pdu);
        assert!(decoded.is_segmented());
    }

    #[test]
    fn test_segment_ack() {
        let pdu = LowerTransportPdu::SegmentAck {
            obo: false,
            seq_zero: 0x0007,
            block_ack: BlockAck::new(0x0000_0007),
        };
        let raw = pdu.encode();
        assert_eq!(&raw[..], &[0x00, 0x00, 0x1C, 0x00, 0x00, 0x00, 0x07]);
        assert_eq!(LowerTransportPdu::decode(true, raw).unwrap(), pdu);
    }

    #[test]
    fn test_segment_ack_reserved_bits() {
        let raw = Bytes::from_static(&[0x00, 0x00, 0x1D, 0x00, 0x00, 0x00, 0x07]);
        assert_eq!(
            LowerTransportPdu::decode(true, raw),
            Err(WireError::Reserved)
        );
    }

    #[test]
    fn test_oversized_unsegmented_access() {
        let mut raw = BytesMut::new();
        raw.put_u8(0x00);
        raw.put_slice(&[0u8; 16]);
        assert_eq!(
            LowerTransportPdu::decode(false, raw.freeze()),
            Err(WireError::Size(16))
        );
    }

    #[test]
    fn test_unsegmented_control() {
        let pdu = LowerTransportPdu::UnsegmentedControl {
            opcode: 0x0A,
            parameters: Bytes::from_static(&[1, 2]),
        };
        assert_eq!(LowerTransportPdu::decode(true, pdu.encode()).unwrap(), pdu);
    }
}
