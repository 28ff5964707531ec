//! Message types for the coordinator actor.
//!
//! Requests reach the actor over a bounded `tokio::sync::mpsc` mailbox and
//! are answered over `tokio::sync::oneshot`.

use crate::errors::BroadcastError;
use crate::signaling::channel::ChannelHandle;

use common::types::{ChannelId, EndpointId};
use tokio::sync::oneshot;

/// Messages sent to `BroadcastCoordinator`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Register the sender as presenter and negotiate its offer.
    BecomePresenter {
        channel: ChannelHandle,
        sdp_offer: String,
        /// `Err` carries the rejection already sent to the channel.
        respond_to: oneshot::Sender<Result<(), BroadcastError>>,
    },

    /// Register the sender as a viewer of the live presenter.
    BecomeViewer {
        channel: ChannelHandle,
        sdp_offer: String,
        /// `Err` carries the rejection already sent to the channel.
        respond_to: oneshot::Sender<Result<(), BroadcastError>>,
    },

    /// Look up the media endpoint of a channel (presenter first, then viewers).
    ResolveEndpoint {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<Option<EndpointId>>,
    },

    /// Tear down whatever the channel owns.
    Stop {
        channel_id: ChannelId,
        respond_to: oneshot::Sender<StopOutcome>,
    },

    /// Get the current broadcast state (health reporting and tests).
    GetState {
        respond_to: oneshot::Sender<CoordinatorSnapshot>,
    },

    /// The media engine went away: notify viewers and drop all state.
    ///
    /// Answers with the number of viewers notified. The actor keeps running.
    EngineLost { respond_to: oneshot::Sender<usize> },

    /// Release everything and exit the actor loop.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Presenter lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterPhase {
    /// No presenter.
    Idle,
    /// Presenter registered, SDP negotiation in progress.
    Negotiating,
    /// Presenter negotiated; viewers may join.
    Live,
}

/// What a `stop` request tore down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The presenter left; every viewer was told to stop.
    Presenter { viewers_notified: usize },
    /// A viewer left.
    Viewer,
    /// The channel had no role; nothing changed.
    NotRegistered,
}

/// Point-in-time view of the coordinator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSnapshot {
    pub presenter: Option<ChannelId>,
    pub phase: PresenterPhase,
    pub has_pipeline: bool,
    /// Viewer channel ids, unordered.
    pub viewers: Vec<ChannelId>,
    /// Unix timestamp (seconds) at which the presenter went live.
    pub live_since: Option<i64>,
}

impl CoordinatorSnapshot {
    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    #[must_use]
    pub fn is_viewer(&self, channel_id: ChannelId) -> bool {
        self.viewers.contains(&channel_id)
    }
}
