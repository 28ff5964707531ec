//! Broadcast signaling error types.
//!
//! Every error is scoped to one channel's session. `client_message()` is the
//! text placed in the `message` field of a rejected response; internal
//! details stay in the server logs.

use crate::media::MediaError;
use common::types::ChannelId;
use thiserror::Error;

/// Broadcast service error type.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// A presenter is already live.
    #[error("Presenter already active")]
    PresenterActive,

    /// A viewer asked to join with no live presenter.
    #[error("No active presenter")]
    NoActivePresenter,

    /// The channel is already registered as a viewer.
    #[error("Channel already viewing")]
    AlreadyViewing,

    /// The presenter's own channel asked to become a viewer.
    #[error("Channel already presenting")]
    AlreadyPresenting,

    /// A session's endpoint was set twice.
    #[error("Media endpoint already assigned for channel {0}")]
    EndpointAlreadyAssigned(ChannelId),

    /// Media engine call failed.
    #[error(transparent)]
    Media(#[from] MediaError),

    /// Inbound message had a known kind but an invalid payload.
    #[error("Malformed {kind} message: {reason}")]
    MalformedMessage { kind: &'static str, reason: String },

    /// The outbound queue of a channel is closed (peer gone).
    #[error("Channel {0} closed")]
    ChannelClosed(ChannelId),

    /// The outbound queue of a channel is full.
    #[error("Channel {0} outbound queue full")]
    ChannelFull(ChannelId),

    /// Internal error (actor mailbox failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BroadcastError {
    /// Returns the client-facing rejection text.
    pub fn client_message(&self) -> String {
        match self {
            BroadcastError::PresenterActive => "another presenter active".to_string(),
            BroadcastError::NoActivePresenter => "no active presenter".to_string(),
            BroadcastError::AlreadyViewing => "already viewing".to_string(),
            BroadcastError::AlreadyPresenting => "already presenting".to_string(),
            BroadcastError::Media(e) => e.to_string(),
            BroadcastError::MalformedMessage { reason, .. } => reason.clone(),
            BroadcastError::EndpointAlreadyAssigned(_)
            | BroadcastError::ChannelClosed(_)
            | BroadcastError::ChannelFull(_)
            | BroadcastError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Bounded label for the `bs_rejections_total` metric.
    #[must_use]
    pub const fn reason_label(&self) -> &'static str {
        match self {
            BroadcastError::PresenterActive => "presenter_active",
            BroadcastError::NoActivePresenter => "no_presenter",
            BroadcastError::AlreadyViewing => "already_viewing",
            BroadcastError::AlreadyPresenting => "already_presenting",
            BroadcastError::Media(_) => "negotiation_failed",
            BroadcastError::MalformedMessage { .. } => "malformed",
            BroadcastError::EndpointAlreadyAssigned(_)
            | BroadcastError::ChannelClosed(_)
            | BroadcastError::ChannelFull(_)
            | BroadcastError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            BroadcastError::PresenterActive.client_message(),
            "another presenter active"
        );
        assert_eq!(
            BroadcastError::NoActivePresenter.client_message(),
            "no active presenter"
        );
        assert_eq!(
            BroadcastError::AlreadyViewing.client_message(),
            "already viewing"
        );
    }

    #[test]
    fn test_media_errors_pass_their_description_through() {
        let err: BroadcastError = MediaError::Rpc {
            code: 40101,
            message: "Object not found".to_string(),
        }
        .into();

        assert!(matches!(err, BroadcastError::Media(_)));
        assert!(err.client_message().contains("Object not found"));
        assert_eq!(err.reason_label(), "negotiation_failed");
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let err = BroadcastError::Internal("mailbox closed at coordinator.rs".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = BroadcastError::ChannelClosed(ChannelId::new());
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                BroadcastError::MalformedMessage {
                    kind: "viewer",
                    reason: "missing field `sdpOffer`".to_string()
                }
            ),
            "Malformed viewer message: missing field `sdpOffer`"
        );
        assert_eq!(
            format!("{}", BroadcastError::Internal("mailbox closed".to_string())),
            "Internal error: mailbox closed"
        );
    }
}
