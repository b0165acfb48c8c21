//! Upper and lower transport.
//!
//! Outbound, an access payload is sealed under the device or an application
//! key, split into segments when it does not fit one lower transport PDU and
//! wrapped into network PDUs ready for the bearer. Inbound, lower transport
//! PDUs feed the node's reassembly buffer; completed transfers come back as
//! [`UpperPdu`]s for [`open_upper`].
//!
//! Sequence numbers are reserved from the provisioner-wide
//! [`SequenceCounter`] before anything is encrypted, one per segment, so a
//! message that later fails to reach the bearer still consumes its numbers.

use std::time::Instant;

use bytes::Bytes;
use mesh_access::KeySelector;
use mesh_crypto::{open, seal, upper_transport_nonce, ApplicationKey, DeviceKey, MicSize};
use mesh_wire::lower::MAX_SEGMENTED_CONTROL_PAYLOAD;
use mesh_wire::{
    wrap_proxy, BlockAck, LowerTransportPdu, NetworkHeader, ProxyPduType, Reassembly,
    SegmentHeader, SegmentOutcome, Segmenter, WireError, MAX_SEGMENTED_ACCESS_PAYLOAD,
    MAX_SEGMENTS, MAX_UNSEGMENTED_ACCESS_PAYLOAD, SEQ_ZERO_MASK,
};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::network::NetworkLayer;
use crate::node::{InboundTransfer, NodeSession, TransferKind};
use crate::sequence::SequenceCounter;

/// Source address and TTL stamped on outbound PDUs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addressing {
    /// Our unicast address
    pub src: u16,
    /// Time to live
    pub ttl: u8,
}

/// Key used to seal an upper transport PDU
#[derive(Debug, Clone, Copy)]
pub enum UpperKey<'a> {
    /// Device key (AKF=0)
    Device(&'a DeviceKey),
    /// Application key (AKF=1)
    Application(&'a ApplicationKey),
}

impl UpperKey<'_> {
    fn akf(&self) -> bool {
        matches!(self, UpperKey::Application(_))
    }

    fn aid(&self) -> u8 {
        match self {
            UpperKey::Device(_) => 0,
            UpperKey::Application(key) => key.aid(),
        }
    }

    fn bytes(&self) -> &[u8; 16] {
        match self {
            UpperKey::Device(key) => key.as_bytes(),
            UpperKey::Application(key) => key.as_bytes(),
        }
    }
}

/// Network PDUs of one outbound message
#[derive(Debug, Clone)]
pub struct Outbound {
    /// First sequence number used (SeqAuth)
    pub seq: u32,
    /// SeqZero and SegN when the message is segmented
    pub segmentation: Option<(u16, u8)>,
    /// Proxy-wrapped network PDUs in send order
    pub pdus: Vec<Bytes>,
}

impl Outbound {
    /// Whether the message was split into segments
    pub fn is_segmented(&self) -> bool {
        self.segmentation.is_some()
    }
}

/// Number of segments an access payload of `len` octets needs, if any
///
/// Returns `None` when it fits an unsegmented PDU.
pub fn segments_needed(len: usize, mic: MicSize) -> Result<Option<usize>, TransportError> {
    let upper_len = len + mic.len();
    if mic == MicSize::Short && upper_len <= MAX_UNSEGMENTED_ACCESS_PAYLOAD {
        return Ok(None);
    }
    let count = Segmenter::new().segment_count(upper_len);
    if count > MAX_SEGMENTS {
        return Err(TransportError::PayloadTooLarge(len));
    }
    Ok(Some(count))
}

/// Seal `payload` for `node` and build its network PDUs
///
/// `MicSize::Long` forces segmentation since only segmented access
/// messages carry SZMIC.
pub fn build_access(
    network: &NetworkLayer,
    sequence: &mut SequenceCounter,
    node: &mut NodeSession,
    addressing: Addressing,
    key: UpperKey<'_>,
    payload: &[u8],
    mic: MicSize,
) -> Result<Outbound, TransportError> {
    let segments = segments_needed(payload.len(), mic)?;
    let count = segments.unwrap_or(1) as u32;
    let seq = sequence.reserve(count)?;
    node.record_sent(seq + count);
    let dst = node.address();
    let aszmic = mic == MicSize::Long;

    let nonce = upper_transport_nonce(key.akf(), aszmic, seq, addressing.src, dst, network.iv_index());
    let upper = Bytes::from(seal(key.bytes(), &nonce, payload, &[], mic)?);

    let (akf, aid) = (key.akf(), key.aid());
    let lowers: Vec<LowerTransportPdu> = match segments {
        None => vec![LowerTransportPdu::UnsegmentedAccess { akf, aid, upper }],
        Some(_) => {
            let parts = Segmenter::new().segment(&upper)?;
            let seg_n = (parts.len() - 1) as u8;
            let seq_zero = (seq & u32::from(SEQ_ZERO_MASK)) as u16;
            parts
                .into_iter()
                .enumerate()
                .map(|(i, segment)| LowerTransportPdu::SegmentedAccess {
                    akf,
                    aid,
                    header: SegmentHeader {
                        szmic: aszmic,
                        seq_zero,
                        seg_o: i as u8,
                        seg_n,
                    },
                    segment,
                })
                .collect()
        }
    };

    let mut segmentation = None;
    let mut pdus = Vec::with_capacity(lowers.len());
    for (i, lower) in lowers.iter().enumerate() {
        if let LowerTransportPdu::SegmentedAccess { header, .. } = lower {
            segmentation = Some((header.seq_zero, header.seg_n));
        }
        let header = network.header(false, addressing.ttl, seq + i as u32, addressing.src, dst);
        pdus.push(wrap_proxy(
            ProxyPduType::Network,
            &network.encode(&header, &lower.encode())?,
        ));
    }

    debug!(
        "Access message to {:#06x}: seq={:#08x} akf={} segments={}",
        dst,
        seq,
        akf,
        pdus.len()
    );
    Ok(Outbound {
        seq,
        segmentation,
        pdus,
    })
}

/// Build a Segment Acknowledgment for a transfer received from `node`
pub fn build_segment_ack(
    network: &NetworkLayer,
    sequence: &mut SequenceCounter,
    node: &mut NodeSession,
    addressing: Addressing,
    seq_zero: u16,
    block_ack: BlockAck,
) -> Result<Bytes, TransportError> {
    let seq = sequence.reserve(1)?;
    node.record_sent(seq + 1);
    let lower = LowerTransportPdu::SegmentAck {
        obo: false,
        seq_zero,
        block_ack,
    };
    let header = network.header(true, addressing.ttl, seq, addressing.src, node.address());
    let pdu = network.encode(&header, &lower.encode())?;
    trace!(
        "Segment ack to {:#06x}: seq_zero={:#06x} block_ack={:#010x}",
        node.address(),
        seq_zero,
        block_ack.bits()
    );
    Ok(wrap_proxy(ProxyPduType::Network, &pdu))
}

/// Recover SeqAuth from a segment's SEQ and its 13-bit SeqZero
pub fn seq_auth(seq: u32, seq_zero: u16) -> Result<u32, TransportError> {
    let mask = u32::from(SEQ_ZERO_MASK);
    let candidate = (seq & !mask) | (u32::from(seq_zero) & mask);
    if candidate <= seq {
        return Ok(candidate);
    }
    candidate
        .checked_sub(mask + 1)
        .ok_or(TransportError::Wire(WireError::Malformed))
}

/// Encrypted upper transport access PDU, ready to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpperPdu {
    /// Application key flag
    pub akf: bool,
    /// Application key identifier
    pub aid: u8,
    /// 64-bit TransMIC
    pub szmic: bool,
    /// Sequence number the nonce is built from
    pub seq_auth: u32,
    /// Sender
    pub src: u16,
    /// Receiver
    pub dst: u16,
    /// IV index the PDU was received under
    pub iv_index: u32,
    /// Encrypted access payload plus TransMIC
    pub encrypted: Bytes,
}

/// Block acknowledgement to send back for a received transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckReply {
    /// SeqZero of the acknowledged transfer
    pub seq_zero: u16,
    /// Received segments
    pub block_ack: BlockAck,
}

/// Result of feeding one lower transport PDU in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A complete access PDU
    Upper {
        /// The PDU to open
        pdu: UpperPdu,
        /// Acknowledgement owed when it arrived segmented
        ack: Option<AckReply>,
    },
    /// Reassembly continues
    Pending {
        /// SeqZero of the transfer
        seq_zero: u16,
        /// Segments so far
        block_ack: BlockAck,
    },
    /// Segment of a transfer that already completed
    Duplicate(AckReply),
    /// Peer acknowledged segments of one of our transfers
    SegmentAck {
        /// Sent on behalf of a low power node
        obo: bool,
        /// SeqZero of our transfer
        seq_zero: u16,
        /// Segments the peer holds
        block_ack: BlockAck,
    },
    /// A complete transport control message
    Control {
        /// Control opcode
        opcode: u8,
        /// Parameters
        parameters: Bytes,
        /// Acknowledgement owed when it arrived segmented
        ack: Option<AckReply>,
    },
}

/// Feed one decrypted network PDU from `node` into the lower transport
pub fn receive(
    node: &mut NodeSession,
    header: &NetworkHeader,
    iv_index: u32,
    transport: Bytes,
    now: Instant,
) -> Result<Received, TransportError> {
    let lower = LowerTransportPdu::decode(header.ctl, transport)?;
    match lower {
        LowerTransportPdu::UnsegmentedAccess { akf, aid, upper } => {
            node.check_replay(header.seq)?;
            node.accept_seq_auth(header.seq);
            Ok(Received::Upper {
                pdu: UpperPdu {
                    akf,
                    aid,
                    szmic: false,
                    seq_auth: header.seq,
                    src: header.src,
                    dst: header.dst,
                    iv_index,
                    encrypted: upper,
                },
                ack: None,
            })
        }
        LowerTransportPdu::SegmentedAccess {
            akf,
            aid,
            header: seg,
            segment: data,
        } => receive_segment(
            node,
            header,
            iv_index,
            Segment {
                kind: TransferKind::Access { akf, aid },
                header: seg,
                data,
                size: MAX_SEGMENTED_ACCESS_PAYLOAD,
            },
            now,
        ),
        LowerTransportPdu::SegmentedControl {
            opcode,
            header: seg,
            segment: data,
        } => receive_segment(
            node,
            header,
            iv_index,
            Segment {
                kind: TransferKind::Control { opcode },
                header: seg,
                data,
                size: MAX_SEGMENTED_CONTROL_PAYLOAD,
            },
            now,
        ),
        LowerTransportPdu::UnsegmentedControl { opcode, parameters } => {
            node.check_replay(header.seq)?;
            node.accept_seq_auth(header.seq);
            Ok(Received::Control {
                opcode,
                parameters,
                ack: None,
            })
        }
        LowerTransportPdu::SegmentAck {
            obo,
            seq_zero,
            block_ack,
        } => {
            node.check_replay(header.seq)?;
            node.accept_seq_auth(header.seq);
            Ok(Received::SegmentAck {
                obo,
                seq_zero,
                block_ack,
            })
        }
    }
}

struct Segment {
    kind: TransferKind,
    header: SegmentHeader,
    data: Bytes,
    size: usize,
}

fn receive_segment(
    node: &mut NodeSession,
    header: &NetworkHeader,
    iv_index: u32,
    segment: Segment,
    now: Instant,
) -> Result<Received, TransportError> {
    let seq_zero = segment.header.seq_zero;
    let seq_auth = seq_auth(header.seq, seq_zero)?;

    let continuing = node
        .inbound()
        .is_some_and(|t| t.reassembly.seq_zero() == seq_zero && t.seq_auth == seq_auth);
    if !continuing {
        if let Some(done) = node.completed() {
            if done.seq_zero == seq_zero && done.seq_auth == seq_auth {
                debug!(
                    "Segment {} of completed transfer {:#06x} from {:#06x}, re-acknowledging",
                    segment.header.seg_o, seq_zero, header.src
                );
                return Ok(Received::Duplicate(AckReply {
                    seq_zero,
                    block_ack: done.block_ack,
                }));
            }
        }
        node.check_replay(seq_auth)?;
        if let Some(current) = node.inbound() {
            if current.seq_auth >= seq_auth {
                debug!(
                    "Segment of stale transfer {:#06x} from {:#06x} while {:#06x} is in progress",
                    seq_zero,
                    header.src,
                    current.reassembly.seq_zero()
                );
                return Err(TransportError::Replay(seq_auth));
            }
        }
        node.begin_inbound(InboundTransfer {
            reassembly: Reassembly::with_segment_size(&segment.header, segment.size),
            kind: segment.kind,
            seq_auth,
            started: now,
        });
    }

    let transfer = node
        .inbound_mut()
        .ok_or(TransportError::Wire(WireError::Malformed))?;
    if transfer.kind != segment.kind {
        return Err(WireError::Malformed.into());
    }
    let outcome = transfer.reassembly.insert(&segment.header, segment.data)?;
    let block_ack = transfer.reassembly.block_ack();
    trace!(
        "Segment {}/{} of {:#06x} from {:#06x}: {:?}",
        segment.header.seg_o,
        segment.header.seg_n,
        seq_zero,
        header.src,
        outcome
    );
    if outcome != SegmentOutcome::Complete {
        return Ok(Received::Pending {
            seq_zero,
            block_ack,
        });
    }

    let transfer = node
        .finish_inbound()
        .ok_or(TransportError::Wire(WireError::Malformed))?;
    let assembled = transfer
        .reassembly
        .assemble()
        .ok_or(TransportError::Wire(WireError::Malformed))?;
    let ack = Some(AckReply {
        seq_zero,
        block_ack,
    });
    Ok(match transfer.kind {
        TransferKind::Access { akf, aid } => Received::Upper {
            pdu: UpperPdu {
                akf,
                aid,
                szmic: transfer.reassembly.szmic(),
                seq_auth,
                src: header.src,
                dst: header.dst,
                iv_index,
                encrypted: assembled,
            },
            ack,
        },
        TransferKind::Control { opcode } => Received::Control {
            opcode,
            parameters: assembled,
            ack,
        },
    })
}

/// Authenticate and decrypt an upper transport PDU
///
/// AKF=1 PDUs try every candidate application key whose AID matches;
/// AKF=0 PDUs use the device key. Returns the access payload and the key
/// that opened it.
pub fn open_upper(
    pdu: &UpperPdu,
    device_key: &DeviceKey,
    app_keys: &[(u16, &ApplicationKey)],
) -> Result<(Bytes, KeySelector), TransportError> {
    let mic = MicSize::from_szmic(pdu.szmic);
    let nonce = upper_transport_nonce(pdu.akf, pdu.szmic, pdu.seq_auth, pdu.src, pdu.dst, pdu.iv_index);

    if !pdu.akf {
        let payload = open(device_key.as_bytes(), &nonce, &pdu.encrypted, &[], mic)?;
        return Ok((Bytes::from(payload), KeySelector::Device));
    }

    for (index, key) in app_keys.iter().filter(|(_, key)| key.aid() == pdu.aid) {
        if let Ok(payload) = open(key.as_bytes(), &nonce, &pdu.encrypted, &[], mic) {
            return Ok((Bytes::from(payload), KeySelector::Application(*index)));
        }
    }
    Err(TransportError::NoMatchingKey)
}
