//! Outbound segmented transfers awaiting a Segment Acknowledgment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use mesh_wire::BlockAck;

/// Result of applying a peer's BlockAck
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Every segment acknowledged; the transfer is closed
    Complete,
    /// Some segments still missing
    Partial {
        /// Offsets the peer has not acknowledged
        missing: Vec<u8>,
    },
    /// No transfer with this SeqZero is being tracked
    Unknown,
}

#[derive(Debug, Clone)]
struct PendingTransfer {
    /// Last segment number
    seg_n: u8,
    /// Segments acknowledged so far
    acked: BlockAck,
    /// When the first segment was handed to the bearer
    sent_at: Instant,
}

/// Tracks segmented transfers until the destination acknowledges them
#[derive(Debug, Default)]
pub struct AckTracker {
    /// Pending transfers keyed by (destination, SeqZero)
    transfers: Arc<RwLock<HashMap<(u16, u16), PendingTransfer>>>,
}

impl AckTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a transfer of `seg_n + 1` segments
    pub async fn track(&self, dst: u16, seq_zero: u16, seg_n: u8) {
        self.track_at(dst, seq_zero, seg_n, Instant::now()).await;
    }

    /// Start tracking with an explicit send time
    pub async fn track_at(&self, dst: u16, seq_zero: u16, seg_n: u8, sent_at: Instant) {
        let mut transfers = self.transfers.write().await;
        transfers.insert(
            (dst, seq_zero),
            PendingTransfer {
                seg_n,
                acked: BlockAck::default(),
                sent_at,
            },
        );
        debug!(
            "Tracking transfer to {:#06x} seq_zero={:#06x} ({} segments)",
            dst,
            seq_zero,
            seg_n as u32 + 1
        );
    }

    /// Apply a BlockAck received from `dst`
    pub async fn acknowledge(&self, dst: u16, seq_zero: u16, block_ack: BlockAck) -> AckOutcome {
        let mut transfers = self.transfers.write().await;
        let Some(transfer) = transfers.get_mut(&(dst, seq_zero)) else {
            return AckOutcome::Unknown;
        };

        transfer.acked = BlockAck::new(transfer.acked.bits() | block_ack.bits());
        if transfer.acked.is_complete(transfer.seg_n) {
            transfers.remove(&(dst, seq_zero));
            debug!("Transfer to {:#06x} seq_zero={:#06x} acknowledged", dst, seq_zero);
            return AckOutcome::Complete;
        }
        AckOutcome::Partial {
            missing: transfer.acked.missing(transfer.seg_n),
        }
    }

    /// Whether any transfer to `dst` is still unacknowledged
    pub async fn has_pending(&self, dst: u16) -> bool {
        let transfers = self.transfers.read().await;
        transfers.keys().any(|(d, _)| *d == dst)
    }

    /// Number of tracked transfers
    pub async fn len(&self) -> usize {
        self.transfers.read().await.len()
    }

    /// Whether nothing is tracked
    pub async fn is_empty(&self) -> bool {
        self.transfers.read().await.is_empty()
    }

    /// Drop transfers sent more than `timeout` before `now`
    pub async fn expire(&self, now: Instant, timeout: Duration) -> Vec<(u16, u16)> {
        let mut transfers = self.transfers.write().await;
        let mut expired: Vec<(u16, u16)> = transfers
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(t.sent_at) >= timeout)
            .map(|(key, _)| *key)
            .collect();
        expired.sort_unstable();
        for key in &expired {
            transfers.remove(key);
            warn!(
                "Transfer to {:#06x} seq_zero={:#06x} not acknowledged within {:?}",
                key.0, key.1, timeout
            );
        }
        expired
    }

    /// Forget every transfer to `dst`
    pub async fn abandon(&self, dst: u16) -> usize {
        let mut transfers = self.transfers.write().await;
        let before = transfers.len();
        transfers.retain(|(d, _), _| *d != dst);
        before - transfers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_partial_then_complete() {
        let tracker = AckTracker::new();
        tracker.track(0x0100, 0x10, 2).await;
        assert!(tracker.has_pending(0x0100).await);

        assert_eq!(
            tracker.acknowledge(0x0100, 0x10, BlockAck::new(0b001)).await,
            AckOutcome::Partial { missing: vec![1, 2] }
        );
        // Acks accumulate
        assert_eq!(
            tracker.acknowledge(0x0100, 0x10, BlockAck::new(0b100)).await,
            AckOutcome::Partial { missing: vec![1] }
        );
        assert_eq!(
            tracker.acknowledge(0x0100, 0x10, BlockAck::new(0b111)).await,
            AckOutcome::Complete
        );
        assert!(!tracker.has_pending(0x0100).await);
        assert_eq!(
            tracker.acknowledge(0x0100, 0x10, BlockAck::new(0b111)).await,
            AckOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn test_expire() {
        let tracker = AckTracker::new();
        let start = Instant::now();
        tracker.track_at(0x0100, 1, 1, start).await;
        tracker.track_at(0x0200, 2, 1, start + Duration::from_secs(5)).await;

        let expired = tracker
            .expire(start + Duration::from_secs(10), Duration::from_secs(10))
            .await;
        assert_eq!(expired, vec![(0x0100, 1)]);
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn test_abandon() {
        let tracker = AckTracker::new();
        tracker.track(0x0100, 1, 1).await;
        tracker.track(0x0100, 2, 1).await;
        tracker.track(0x0200, 3, 1).await;
        assert_eq!(tracker.abandon(0x0100).await, 2);
        assert!(!tracker.has_pending(0x0100).await);
        assert!(tracker.has_pending(0x0200).await);
    }
}
