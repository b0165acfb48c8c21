//! Outbound sequence numbers of the provisioner.
//!
//! The network nonce is built from SEQ, SRC and the IV index only, so one
//! counter serves every destination: a SEQ is never used twice by our
//! source address, whichever node it was sent to.

use mesh_wire::MAX_SEQUENCE_NUMBER;
use tracing::debug;

use crate::error::TransportError;

/// Monotonic 24-bit SEQ allocator for one source address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceCounter {
    src: u16,
    next: u32,
}

impl SequenceCounter {
    /// Counter for `src` starting at `next`
    pub fn new(src: u16, next: u32) -> Self {
        Self { src, next }
    }

    /// Source address the counter belongs to
    pub fn src(&self) -> u16 {
        self.src
    }

    /// Next SEQ to hand out
    pub fn next(&self) -> u32 {
        self.next
    }

    /// Move the counter to at least `next`; it never moves backwards
    pub fn advance_to(&mut self, next: u32) {
        self.next = self.next.max(next);
    }

    /// Reserve `count` consecutive sequence numbers and return the first
    ///
    /// Reserved numbers are never handed out again, whatever happens to
    /// the message they were reserved for.
    pub fn reserve(&mut self, count: u32) -> Result<u32, TransportError> {
        let first = self.next;
        let last = first
            .checked_add(count.max(1) - 1)
            .filter(|last| *last <= MAX_SEQUENCE_NUMBER)
            .ok_or(TransportError::SequenceExhausted(self.src))?;
        self.next = last + 1;
        debug!(
            "Source {:#06x} reserved seq {:#08x}..={:#08x}",
            self.src, first, last
        );
        Ok(first)
    }
}
