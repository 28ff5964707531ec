//! Per-connection peer session.
//!
//! A `PeerSession` binds a signaling channel to the media endpoint created
//! for it. The endpoint is assigned once and never replaced; the session is
//! discarded after its endpoint is released.

use crate::errors::BroadcastError;
use crate::signaling::channel::ChannelHandle;
use crate::signaling::messages::OutboundMessage;

use common::types::{ChannelId, EndpointId};
use tokio_util::sync::CancellationToken;

/// One peer (presenter or viewer) known to the coordinator.
#[derive(Debug)]
pub struct PeerSession {
    channel: ChannelHandle,
    endpoint: Option<EndpointId>,
    /// Cancels the candidate forwarder bound to this session's endpoint.
    forwarder: CancellationToken,
}

impl PeerSession {
    /// Create a session with no endpoint. `forwarder` is cancelled when the
    /// session is torn down.
    #[must_use]
    pub fn new(channel: ChannelHandle, forwarder: CancellationToken) -> Self {
        Self {
            channel,
            endpoint: None,
            forwarder,
        }
    }

    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.channel.channel_id()
    }

    #[must_use]
    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    #[must_use]
    pub fn endpoint(&self) -> Option<&EndpointId> {
        self.endpoint.as_ref()
    }

    /// Assign the media endpoint.
    ///
    /// # Errors
    ///
    /// `EndpointAlreadyAssigned` if an endpoint is already set; the existing
    /// endpoint is kept.
    pub fn set_endpoint(&mut self, endpoint: EndpointId) -> Result<(), BroadcastError> {
        if self.endpoint.is_some() {
            return Err(BroadcastError::EndpointAlreadyAssigned(self.channel_id()));
        }
        self.endpoint = Some(endpoint);
        Ok(())
    }

    /// Queue a message to this peer. Failures are logged by the channel.
    pub fn send(&self, message: OutboundMessage) {
        self.channel.send_or_log(message);
    }

    /// Token cancelling this session's candidate forwarder.
    #[must_use]
    pub fn forwarder_token(&self) -> &CancellationToken {
        &self.forwarder
    }

    /// Stop candidate forwarding and hand back the endpoint for release.
    pub fn close(self) -> Option<EndpointId> {
        self.forwarder.cancel();
        self.endpoint
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn session() -> (PeerSession, tokio::sync::mpsc::Receiver<OutboundMessage>) {
        let (channel, rx) = ChannelHandle::new(ChannelId::new(), 4);
        (PeerSession::new(channel, CancellationToken::new()), rx)
    }

    #[test]
    fn test_endpoint_is_set_once() {
        let (mut session, _rx) = session();
        assert!(session.endpoint().is_none());

        session
            .set_endpoint(EndpointId("ep-1".to_string()))
            .unwrap();
        let err = session
            .set_endpoint(EndpointId("ep-2".to_string()))
            .unwrap_err();

        assert!(matches!(err, BroadcastError::EndpointAlreadyAssigned(_)));
        assert_eq!(session.endpoint().unwrap().as_str(), "ep-1");
    }

    #[test]
    fn test_close_cancels_forwarder_and_returns_endpoint() {
        let (mut session, _rx) = session();
        session
            .set_endpoint(EndpointId("ep-1".to_string()))
            .unwrap();
        let token = session.forwarder_token().clone();

        let endpoint = session.close();

        assert!(token.is_cancelled());
        assert_eq!(endpoint, Some(EndpointId("ep-1".to_string())));
    }

    #[tokio::test]
    async fn test_send_reaches_channel() {
        let (session, mut rx) = session();
        session.send(OutboundMessage::StopCommunication);
        assert_eq!(rx.recv().await.unwrap(), OutboundMessage::StopCommunication);
    }
}
