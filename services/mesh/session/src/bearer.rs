//! Link transport seam.
//!
//! The manager hands finished PDUs to a [`Bearer`] and never waits for
//! delivery; retries belong to whatever sits behind it.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::TransportError;

/// Outbound link transport
#[async_trait]
pub trait Bearer: Send + Sync {
    /// Send one proxy-wrapped PDU towards `destination`
    async fn send_pdu(&self, destination: u16, pdu: Bytes) -> Result<(), TransportError>;
}

/// Bearer that pushes PDUs into an in-process channel
#[derive(Debug, Clone)]
pub struct ChannelBearer {
    tx: mpsc::UnboundedSender<(u16, Bytes)>,
}

impl ChannelBearer {
    /// Create a bearer and the receiver that observes its PDUs
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(u16, Bytes)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Bearer for ChannelBearer {
    async fn send_pdu(&self, destination: u16, pdu: Bytes) -> Result<(), TransportError> {
        trace!("Bearer -> {:#06x}: {}", destination, hex::encode(&pdu));
        self.tx
            .send((destination, pdu))
            .map_err(|_| TransportError::Bearer("channel closed".to_string()))
    }
}
