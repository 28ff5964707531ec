//! Inbound message dispatch for one signaling connection.

use crate::actors::{BroadcastCoordinatorHandle, StopOutcome};
use crate::errors::BroadcastError;
use crate::observability::metrics::{record_rejection, record_signaling_message};
use crate::signaling::channel::ChannelHandle;
use crate::signaling::messages::{
    decode, Decoded, InboundMessage, MessageKind, OutboundMessage, Response,
};

use common::types::ChannelId;
use tracing::{debug, error, info, instrument, warn};

/// Decodes inbound frames and drives the coordinator.
///
/// Shared by every connection; holds no per-connection state.
#[derive(Clone)]
pub struct SignalingHandler {
    coordinator: BroadcastCoordinatorHandle,
}

impl SignalingHandler {
    #[must_use]
    pub fn new(coordinator: BroadcastCoordinatorHandle) -> Self {
        Self { coordinator }
    }

    /// Handle one inbound text frame from `channel`.
    #[instrument(skip_all, name = "bs.signaling.message", fields(channel_id = %channel.channel_id()))]
    pub async fn handle_text(&self, channel: &ChannelHandle, text: &str) {
        match decode(text) {
            Decoded::Message(message) => {
                record_signaling_message(message.kind().as_str());
                self.dispatch(channel, message).await;
            }
            Decoded::Unknown(id) => {
                record_signaling_message("unknown");
                debug!(target: "bs.signaling", id = %id, "Ignoring unknown message id");
            }
            Decoded::Malformed { kind, reason } => {
                record_signaling_message(kind.as_str());
                self.reject_malformed(channel, kind, reason).await;
            }
            Decoded::Unparseable(reason) => {
                record_signaling_message("unparseable");
                self.stop_unparseable(channel, reason).await;
            }
        }
    }

    /// Tear down whatever the closed connection owned.
    #[instrument(skip_all, name = "bs.signaling.close", fields(channel_id = %channel_id))]
    pub async fn handle_close(&self, channel_id: ChannelId) {
        match self.coordinator.stop(channel_id).await {
            Ok(StopOutcome::NotRegistered) => {}
            Ok(outcome) => {
                info!(target: "bs.signaling", ?outcome, "Connection closed, session stopped");
            }
            Err(e) => {
                error!(target: "bs.signaling", error = %e, "Failed to stop session on close");
            }
        }
    }

    async fn dispatch(&self, channel: &ChannelHandle, message: InboundMessage) {
        let kind = message.kind();
        let channel_id = channel.channel_id();

        let result = match message {
            InboundMessage::Presenter { sdp_offer } => {
                self.coordinator
                    .become_presenter(channel.clone(), sdp_offer)
                    .await
            }
            InboundMessage::Viewer { sdp_offer } => {
                self.coordinator.become_viewer(channel.clone(), sdp_offer).await
            }
            InboundMessage::OnIceCandidate { candidate } => {
                self.coordinator
                    .add_remote_candidate(channel_id, candidate)
                    .await
            }
            InboundMessage::Stop => self.coordinator.stop(channel_id).await.map(|_| ()),
        };

        match result {
            Ok(()) => {}
            // The coordinator is gone; nobody has answered the peer.
            Err(e @ BroadcastError::Internal(_)) => {
                error!(target: "bs.signaling", kind = kind.as_str(), error = %e, "Coordinator unavailable");
                if matches!(kind, MessageKind::Presenter | MessageKind::Viewer) {
                    channel.send_or_log(OutboundMessage::response_for(
                        kind,
                        Response::rejected(e.client_message()),
                    ));
                }
            }
            // Rejections were already sent by the coordinator.
            Err(e) => {
                debug!(target: "bs.signaling", kind = kind.as_str(), error = %e, "Request rejected");
            }
        }
    }

    /// Stop the sender's session. There is no kind to answer to, so the
    /// peer gets no response; the connection stays open.
    async fn stop_unparseable(&self, channel: &ChannelHandle, reason: String) {
        let error = BroadcastError::MalformedMessage {
            kind: "signaling",
            reason,
        };
        warn!(target: "bs.signaling", error = %error, "Unparseable frame, stopping session");
        record_rejection(error.reason_label());

        match self.coordinator.stop(channel.channel_id()).await {
            Ok(StopOutcome::NotRegistered) => {}
            Ok(outcome) => {
                info!(target: "bs.signaling", ?outcome, "Session stopped after unparseable frame");
            }
            Err(e) => {
                error!(target: "bs.signaling", error = %e, "Failed to stop session after unparseable frame");
            }
        }
    }

    /// Stop the sender's session and answer with a rejected `<kind>Response`.
    async fn reject_malformed(&self, channel: &ChannelHandle, kind: MessageKind, reason: String) {
        let error = BroadcastError::MalformedMessage {
            kind: kind.as_str(),
            reason,
        };
        warn!(target: "bs.signaling", error = %error, "Malformed message");
        record_rejection(error.reason_label());

        if let Err(e) = self.coordinator.stop(channel.channel_id()).await {
            error!(target: "bs.signaling", error = %e, "Failed to stop session after malformed message");
        }

        channel.send_or_log(OutboundMessage::response_for(
            kind,
            Response::rejected(error.client_message()),
        ));
    }
}
