//! Segmentation and reassembly of upper transport PDUs.
//!
//! An upper transport PDU that does not fit into one lower transport PDU is
//! split into up to 32 segments. The receiver tracks which segment offsets
//! have arrived in a 32-bit block acknowledgement and concatenates the
//! segments once all of `0..=seg_n` are present.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lower::{SegmentHeader, MAX_SEGMENTED_ACCESS_PAYLOAD};
use crate::WireError;

/// Maximum number of segments in one transfer
pub const MAX_SEGMENTS: usize = 32;

/// Bitmask of received segment offsets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockAck(u32);

impl BlockAck {
    /// Wrap a raw bitmask
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Mask with every offset in `0..=seg_n` set
    pub fn all(seg_n: u8) -> Self {
        if seg_n as usize >= MAX_SEGMENTS - 1 {
            Self(u32::MAX)
        } else {
            Self((1u32 << (seg_n + 1)) - 1)
        }
    }

    /// Raw bitmask
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mark an offset as received
    pub fn set(&mut self, seg_o: u8) {
        self.0 |= 1u32 << (seg_o as u32 & 0x1F);
    }

    /// Whether an offset is marked
    pub fn is_set(self, seg_o: u8) -> bool {
        seg_o < MAX_SEGMENTS as u8 && self.0 & (1u32 << seg_o) != 0
    }

    /// Whether every offset in `0..=seg_n` is marked
    pub fn is_complete(self, seg_n: u8) -> bool {
        let all = Self::all(seg_n).0;
        self.0 & all == all
    }

    /// Offsets in `0..=seg_n` not yet marked
    pub fn missing(self, seg_n: u8) -> Vec<u8> {
        (0..=seg_n.min(MAX_SEGMENTS as u8 - 1))
            .filter(|o| !self.is_set(*o))
            .collect()
    }

    /// Number of marked offsets
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// Splits upper transport PDUs into segments
#[derive(Debug, Clone)]
pub struct Segmenter {
    segment_size: usize,
}

impl Segmenter {
    /// Segmenter for access PDUs (12-octet segments)
    pub fn new() -> Self {
        Self {
            segment_size: MAX_SEGMENTED_ACCESS_PAYLOAD,
        }
    }

    /// Segmenter with a custom segment size
    pub fn with_segment_size(segment_size: usize) -> Self {
        Self {
            segment_size: segment_size.max(1),
        }
    }

    /// Segment size in octets
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Number of segments needed for `len` octets
    pub fn segment_count(&self, len: usize) -> usize {
        len.div_ceil(self.segment_size).max(1)
    }

    /// Split `upper` into segments; the last one may be short
    pub fn segment(&self, upper: &Bytes) -> Result<Vec<Bytes>, WireError> {
        let count = self.segment_count(upper.len());
        if count > MAX_SEGMENTS {
            return Err(WireError::Size(upper.len()));
        }
        Ok((0..count)
            .map(|i| {
                let start = i * self.segment_size;
                let end = std::cmp::min(start + self.segment_size, upper.len());
                upper.slice(start..end)
            })
            .collect())
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of feeding one segment into a reassembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Segment stored, more are outstanding
    Stored,
    /// Segment was already present
    Duplicate,
    /// All segments are present
    Complete,
}

/// In-progress reassembly of one segmented transfer
#[derive(Debug, Clone)]
pub struct Reassembly {
    seq_zero: u16,
    seg_n: u8,
    szmic: bool,
    segment_size: usize,
    segments: BTreeMap<u8, Bytes>,
    block_ack: BlockAck,
}

impl Reassembly {
    /// Start a reassembly from the header of any of its segments
    pub fn new(header: &SegmentHeader) -> Self {
        Self::with_segment_size(header, MAX_SEGMENTED_ACCESS_PAYLOAD)
    }

    /// Start a reassembly with a custom segment size
    pub fn with_segment_size(header: &SegmentHeader, segment_size: usize) -> Self {
        Self {
            seq_zero: header.seq_zero,
            seg_n: header.seg_n,
            szmic: header.szmic,
            segment_size,
            segments: BTreeMap::new(),
            block_ack: BlockAck::default(),
        }
    }

    /// SeqZero of the transfer
    pub fn seq_zero(&self) -> u16 {
        self.seq_zero
    }

    /// Last segment number
    pub fn seg_n(&self) -> u8 {
        self.seg_n
    }

    /// SZMIC flag of the transfer
    pub fn szmic(&self) -> bool {
        self.szmic
    }

    /// Segments received so far
    pub fn block_ack(&self) -> BlockAck {
        self.block_ack
    }

    /// Whether all segments are present
    pub fn is_complete(&self) -> bool {
        self.block_ack.is_complete(self.seg_n)
    }

    /// Store one segment
    pub fn insert(
        &mut self,
        header: &SegmentHeader,
        segment: Bytes,
    ) -> Result<SegmentOutcome, WireError> {
        if header.seq_zero != self.seq_zero
            || header.seg_n != self.seg_n
            || header.seg_o > self.seg_n
        {
            return Err(WireError::Segment {
                seg_o: header.seg_o,
                seg_n: header.seg_n,
            });
        }
        let last = header.seg_o == self.seg_n;
        if segment.is_empty()
            || segment.len() > self.segment_size
            || (!last && segment.len() != self.segment_size)
        {
            return Err(WireError::Size(segment.len()));
        }

        if self.block_ack.is_set(header.seg_o) {
            debug!(
                "Duplicate segment {} of seq_zero {:#06x}",
                header.seg_o, self.seq_zero
            );
            return Ok(SegmentOutcome::Duplicate);
        }

        self.segments.insert(header.seg_o, segment);
        self.block_ack.set(header.seg_o);

        if self.is_complete() {
            Ok(SegmentOutcome::Complete)
        } else {
            Ok(SegmentOutcome::Stored)
        }
    }

    /// Concatenate the segments in offset order once complete
    pub fn assemble(&self) -> Option<Bytes> {
        if !self.is_complete() {
            return None;
        }
        let total = self.segments.values().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(total);
        for segment in self.segments.values() {
            buf.extend_from_slice(segment);
        }
        Some(buf.freeze())
    }
}
