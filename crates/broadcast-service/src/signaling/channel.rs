//! Outbound side of one signaling connection.
//!
//! Every connection owns a bounded queue drained by a single writer task, so
//! messages from the coordinator and from candidate forwarders are written
//! whole and in enqueue order. Sends never wait: a full or closed queue
//! drops the message.

use crate::errors::BroadcastError;
use crate::observability::metrics::record_outbound_dropped;
use crate::signaling::messages::OutboundMessage;

use common::types::ChannelId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Default per-connection outbound queue capacity.
pub const DEFAULT_CHANNEL_BUFFER: usize = 200;

/// Cloneable sender for one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    channel_id: ChannelId,
    sender: mpsc::Sender<OutboundMessage>,
}

impl ChannelHandle {
    /// Create a handle and the receiver its writer task drains.
    #[must_use]
    pub fn new(channel_id: ChannelId, buffer: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { channel_id, sender }, receiver)
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Whether the writer side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// `ChannelFull` or `ChannelClosed`; the message is dropped either way.
    pub fn send(&self, message: OutboundMessage) -> Result<(), BroadcastError> {
        let label = message.label();
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                record_outbound_dropped();
                warn!(
                    target: "bs.signaling",
                    channel_id = %self.channel_id,
                    message = label,
                    "Outbound queue full, message dropped"
                );
                Err(BroadcastError::ChannelFull(self.channel_id))
            }
            Err(TrySendError::Closed(_)) => {
                record_outbound_dropped();
                debug!(
                    target: "bs.signaling",
                    channel_id = %self.channel_id,
                    message = label,
                    "Outbound queue closed, message dropped"
                );
                Err(BroadcastError::ChannelClosed(self.channel_id))
            }
        }
    }

    /// Queue a message, logging instead of returning failures.
    pub fn send_or_log(&self, message: OutboundMessage) {
        // Failures are already logged and counted in `send`.
        let _ = self.send(message);
    }
}
