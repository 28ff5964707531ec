//! `BroadcastCoordinator` - the single owner of broadcast state.
//!
//! One actor task owns the pipeline, the presenter session and the viewer
//! map. `become_presenter`, `become_viewer`, `stop` and endpoint resolution
//! are processed one at a time, in mailbox order. Media engine calls are
//! awaited inline, so a slow negotiation delays every other request.
//!
//! # Invariants
//!
//! - `pipeline.is_some() == presenter.is_some()` between messages
//! - `viewers` is empty whenever there is no presenter
//! - the presenter's channel is never a viewer key
//!
//! Every endpoint gets a candidate forwarder task bound to a child of the
//! coordinator's `CancellationToken`. The token is cancelled before the
//! endpoint is released, so no `iceCandidate` follows a release.
//!
//! State is torn down on `Shutdown`, on `EngineLost` and when the last
//! handle is dropped. Only `Shutdown` and the last drop end the actor.

use crate::errors::BroadcastError;
use crate::media::{CandidateStream, IceCandidate, MediaEngine, MediaObject};
use crate::observability::metrics::{record_negotiation_duration, record_rejection};
use crate::signaling::channel::ChannelHandle;
use crate::signaling::messages::{MessageKind, OutboundMessage, Response};

use super::messages::{CoordinatorMessage, CoordinatorSnapshot, PresenterPhase, StopOutcome};
use super::metrics::{BroadcastMetrics, MailboxMonitor};
use super::session::PeerSession;

use common::types::{ChannelId, EndpointId, PipelineId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Coordinator mailbox capacity.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `BroadcastCoordinator`.
///
/// Cheap to clone; every signaling connection holds one.
#[derive(Clone)]
pub struct BroadcastCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    engine: Arc<dyn MediaEngine>,
    mailbox: Arc<MailboxMonitor>,
}

impl BroadcastCoordinatorHandle {
    /// Spawn the coordinator actor and return a handle to it.
    #[must_use]
    pub fn new(engine: Arc<dyn MediaEngine>, metrics: Arc<BroadcastMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let mailbox = MailboxMonitor::new();

        let actor = BroadcastCoordinator::new(
            receiver,
            Arc::clone(&engine),
            Arc::clone(&mailbox),
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            engine,
            mailbox,
        }
    }

    async fn call<T>(
        &self,
        message: CoordinatorMessage,
        reply: oneshot::Receiver<T>,
    ) -> Result<T, BroadcastError> {
        self.mailbox.record_enqueue();
        if let Err(e) = self.sender.send(message).await {
            self.mailbox.record_dequeue();
            return Err(BroadcastError::Internal(format!("channel send failed: {e}")));
        }

        reply
            .await
            .map_err(|e| BroadcastError::Internal(format!("response receive failed: {e}")))
    }

    /// Register `channel` as presenter and negotiate `sdp_offer`.
    ///
    /// The `presenterResponse` is sent to `channel` by the coordinator. The
    /// returned error mirrors a rejection.
    pub async fn become_presenter(
        &self,
        channel: ChannelHandle,
        sdp_offer: String,
    ) -> Result<(), BroadcastError> {
        let (tx, rx) = oneshot::channel();
        self.call(
            CoordinatorMessage::BecomePresenter {
                channel,
                sdp_offer,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Register `channel` as a viewer and negotiate `sdp_offer`.
    ///
    /// The `viewerResponse` is sent to `channel` by the coordinator.
    pub async fn become_viewer(
        &self,
        channel: ChannelHandle,
        sdp_offer: String,
    ) -> Result<(), BroadcastError> {
        let (tx, rx) = oneshot::channel();
        self.call(
            CoordinatorMessage::BecomeViewer {
                channel,
                sdp_offer,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Hand a remote ICE candidate to the endpoint of `channel_id`.
    ///
    /// The endpoint is resolved by the actor; the engine call runs on the
    /// caller's task. Candidates for unknown channels, or channels whose
    /// endpoint is not yet created, are dropped. Engine failures are logged
    /// and not reported to the peer.
    pub async fn add_remote_candidate(
        &self,
        channel_id: ChannelId,
        candidate: IceCandidate,
    ) -> Result<(), BroadcastError> {
        let (tx, rx) = oneshot::channel();
        let endpoint = self
            .call(
                CoordinatorMessage::ResolveEndpoint {
                    channel_id,
                    respond_to: tx,
                },
                rx,
            )
            .await?;

        let Some(endpoint) = endpoint else {
            debug!(
                target: "bs.actor.coordinator",
                channel_id = %channel_id,
                "Dropping ICE candidate for channel without endpoint"
            );
            return Ok(());
        };

        if let Err(e) = self.engine.add_candidate(&endpoint, candidate).await {
            warn!(
                target: "bs.actor.coordinator",
                channel_id = %channel_id,
                endpoint_id = %endpoint,
                error = %e,
                "Failed to add remote ICE candidate"
            );
        }
        Ok(())
    }

    /// Tear down the role of `channel_id`. Idempotent.
    pub async fn stop(&self, channel_id: ChannelId) -> Result<StopOutcome, BroadcastError> {
        let (tx, rx) = oneshot::channel();
        self.call(
            CoordinatorMessage::Stop {
                channel_id,
                respond_to: tx,
            },
            rx,
        )
        .await
    }

    /// Get a snapshot of the broadcast state.
    pub async fn get_state(&self) -> Result<CoordinatorSnapshot, BroadcastError> {
        let (tx, rx) = oneshot::channel();
        self.call(CoordinatorMessage::GetState { respond_to: tx }, rx)
            .await
    }

    /// Release the live pipeline (if any) and stop the actor.
    ///
    /// Waits until the release has been attempted.
    pub async fn shutdown(&self) -> Result<(), BroadcastError> {
        let (tx, rx) = oneshot::channel();
        self.call(CoordinatorMessage::Shutdown { respond_to: tx }, rx)
            .await
    }

    /// Drop all broadcast state after the media engine connection is lost.
    ///
    /// Viewers get `stopCommunication`; the presenter is cleared so a new
    /// one can start once an engine is available again. Returns the number
    /// of viewers notified.
    pub async fn engine_lost(&self) -> Result<usize, BroadcastError> {
        let (tx, rx) = oneshot::channel();
        self.call(CoordinatorMessage::EngineLost { respond_to: tx }, rx)
            .await
    }
}

/// The `BroadcastCoordinator` implementation.
pub struct BroadcastCoordinator {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    engine: Arc<dyn MediaEngine>,
    /// Parent of every candidate forwarder token; cancelled when the actor exits.
    forwarders: CancellationToken,
    pipeline: Option<PipelineId>,
    presenter: Option<PeerSession>,
    phase: PresenterPhase,
    live_since: Option<i64>,
    viewers: HashMap<ChannelId, PeerSession>,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<BroadcastMetrics>,
}

impl BroadcastCoordinator {
    fn new(
        receiver: mpsc::Receiver<CoordinatorMessage>,
        engine: Arc<dyn MediaEngine>,
        mailbox: Arc<MailboxMonitor>,
        metrics: Arc<BroadcastMetrics>,
    ) -> Self {
        Self {
            receiver,
            engine,
            forwarders: CancellationToken::new(),
            pipeline: None,
            presenter: None,
            phase: PresenterPhase::Idle,
            live_since: None,
            viewers: HashMap::new(),
            mailbox,
            metrics,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "bs.actor.coordinator")]
    async fn run(mut self) {
        info!(target: "bs.actor.coordinator", "BroadcastCoordinator started");

        while let Some(message) = self.receiver.recv().await {
            self.mailbox.record_dequeue();
            match message {
                CoordinatorMessage::Shutdown { respond_to } => {
                    self.teardown_presenter().await;
                    let _ = respond_to.send(());
                    break;
                }
                message => self.handle_message(message).await,
            }
        }

        if self.presenter.is_some() {
            info!(
                target: "bs.actor.coordinator",
                "BroadcastCoordinator channel closed, releasing live pipeline"
            );
            self.teardown_presenter().await;
        }
        self.forwarders.cancel();

        info!(
            target: "bs.actor.coordinator",
            messages_processed = self.mailbox.messages_processed(),
            "BroadcastCoordinator stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::BecomePresenter {
                channel,
                sdp_offer,
                respond_to,
            } => {
                let result = self.become_presenter(channel, &sdp_offer).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::BecomeViewer {
                channel,
                sdp_offer,
                respond_to,
            } => {
                let result = self.become_viewer(channel, &sdp_offer).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::ResolveEndpoint {
                channel_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.resolve_endpoint(channel_id));
            }

            CoordinatorMessage::Stop {
                channel_id,
                respond_to,
            } => {
                let outcome = self.stop(channel_id).await;
                let _ = respond_to.send(outcome);
            }

            CoordinatorMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            CoordinatorMessage::EngineLost { respond_to } => {
                let viewers_notified = self.teardown_presenter().await;
                warn!(
                    target: "bs.actor.coordinator",
                    viewers_notified,
                    "Media engine lost, broadcast state cleared"
                );
                let _ = respond_to.send(viewers_notified);
            }

            // Handled in `run`, which exits the loop.
            CoordinatorMessage::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    async fn become_presenter(
        &mut self,
        channel: ChannelHandle,
        sdp_offer: &str,
    ) -> Result<(), BroadcastError> {
        let channel_id = channel.channel_id();

        if self.presenter.is_some() {
            return reject(&channel, MessageKind::Presenter, BroadcastError::PresenterActive);
        }

        let start = Instant::now();
        self.phase = PresenterPhase::Negotiating;

        let pipeline = match self.engine.create_pipeline().await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.phase = PresenterPhase::Idle;
                record_negotiation_duration("presenter", "rejected", start.elapsed());
                return reject(&channel, MessageKind::Presenter, e.into());
            }
        };

        let forwarder = self.forwarders.child_token();
        self.pipeline = Some(pipeline.clone());
        self.presenter = Some(PeerSession::new(channel.clone(), forwarder.clone()));

        match self
            .negotiate_presenter(&channel, &pipeline, forwarder, sdp_offer)
            .await
        {
            Ok((endpoint, sdp_answer)) => {
                self.phase = PresenterPhase::Live;
                self.live_since = Some(chrono::Utc::now().timestamp());
                self.metrics.set_presenter_active(true);
                record_negotiation_duration("presenter", "accepted", start.elapsed());

                info!(
                    target: "bs.actor.coordinator",
                    channel_id = %channel_id,
                    pipeline_id = %pipeline,
                    endpoint_id = %endpoint,
                    "Presenter live"
                );

                channel.send_or_log(OutboundMessage::PresenterResponse(Response::accepted(
                    sdp_answer,
                )));
                self.gather(channel_id, &endpoint).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: "bs.actor.coordinator",
                    channel_id = %channel_id,
                    error = %e,
                    "Presenter negotiation failed"
                );
                if let Some(presenter) = self.presenter.take() {
                    presenter.close();
                }
                if let Some(pipeline) = self.pipeline.take() {
                    self.release(MediaObject::Pipeline(pipeline)).await;
                }
                self.phase = PresenterPhase::Idle;
                record_negotiation_duration("presenter", "rejected", start.elapsed());
                reject(&channel, MessageKind::Presenter, e)
            }
        }
    }

    /// Endpoint setup for the presenter registered in `self.presenter`.
    async fn negotiate_presenter(
        &mut self,
        channel: &ChannelHandle,
        pipeline: &PipelineId,
        forwarder: CancellationToken,
        sdp_offer: &str,
    ) -> Result<(EndpointId, String), BroadcastError> {
        let endpoint = self.engine.create_endpoint(pipeline).await?;

        self.presenter
            .as_mut()
            .ok_or_else(|| BroadcastError::Internal("presenter cleared during setup".to_string()))?
            .set_endpoint(endpoint.clone())?;

        let candidates = self.engine.subscribe_local_candidates(&endpoint).await?;
        spawn_candidate_forwarder(channel.clone(), candidates, forwarder);

        let sdp_answer = self.engine.process_offer(&endpoint, sdp_offer).await?;
        Ok((endpoint, sdp_answer))
    }

    async fn become_viewer(
        &mut self,
        channel: ChannelHandle,
        sdp_offer: &str,
    ) -> Result<(), BroadcastError> {
        let channel_id = channel.channel_id();

        let live = match (&self.pipeline, &self.presenter) {
            (Some(pipeline), Some(presenter)) if self.phase == PresenterPhase::Live => presenter
                .endpoint()
                .map(|endpoint| (pipeline.clone(), endpoint.clone(), presenter.channel_id())),
            _ => None,
        };

        let Some((pipeline, presenter_endpoint, presenter_channel)) = live else {
            return reject(&channel, MessageKind::Viewer, BroadcastError::NoActivePresenter);
        };

        if presenter_channel == channel_id {
            return reject(&channel, MessageKind::Viewer, BroadcastError::AlreadyPresenting);
        }

        if self.viewers.contains_key(&channel_id) {
            return reject(&channel, MessageKind::Viewer, BroadcastError::AlreadyViewing);
        }

        let start = Instant::now();
        let mut session = PeerSession::new(channel.clone(), self.forwarders.child_token());

        match self
            .negotiate_viewer(&mut session, &pipeline, &presenter_endpoint, sdp_offer)
            .await
        {
            Ok((endpoint, sdp_answer)) => {
                self.viewers.insert(channel_id, session);
                self.metrics.set_viewers(self.viewers.len());
                record_negotiation_duration("viewer", "accepted", start.elapsed());

                info!(
                    target: "bs.actor.coordinator",
                    channel_id = %channel_id,
                    endpoint_id = %endpoint,
                    viewers = self.viewers.len(),
                    "Viewer connected"
                );

                channel.send_or_log(OutboundMessage::ViewerResponse(Response::accepted(
                    sdp_answer,
                )));
                self.gather(channel_id, &endpoint).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: "bs.actor.coordinator",
                    channel_id = %channel_id,
                    error = %e,
                    "Viewer negotiation failed"
                );
                if let Some(endpoint) = session.close() {
                    self.release(MediaObject::Endpoint(endpoint)).await;
                }
                record_negotiation_duration("viewer", "rejected", start.elapsed());
                reject(&channel, MessageKind::Viewer, e)
            }
        }
    }

    /// Endpoint setup for a viewer session that is not yet registered.
    async fn negotiate_viewer(
        &self,
        session: &mut PeerSession,
        pipeline: &PipelineId,
        presenter_endpoint: &EndpointId,
        sdp_offer: &str,
    ) -> Result<(EndpointId, String), BroadcastError> {
        let endpoint = self.engine.create_endpoint(pipeline).await?;
        session.set_endpoint(endpoint.clone())?;

        let candidates = self.engine.subscribe_local_candidates(&endpoint).await?;
        spawn_candidate_forwarder(
            session.channel().clone(),
            candidates,
            session.forwarder_token().clone(),
        );

        self.engine.connect(presenter_endpoint, &endpoint).await?;
        let sdp_answer = self.engine.process_offer(&endpoint, sdp_offer).await?;
        Ok((endpoint, sdp_answer))
    }

    fn resolve_endpoint(&self, channel_id: ChannelId) -> Option<EndpointId> {
        let session = match &self.presenter {
            Some(presenter) if presenter.channel_id() == channel_id => Some(presenter),
            _ => self.viewers.get(&channel_id),
        };
        session.and_then(PeerSession::endpoint).cloned()
    }

    async fn stop(&mut self, channel_id: ChannelId) -> StopOutcome {
        let is_presenter = self
            .presenter
            .as_ref()
            .is_some_and(|presenter| presenter.channel_id() == channel_id);

        if is_presenter {
            let viewers_notified = self.teardown_presenter().await;
            info!(
                target: "bs.actor.coordinator",
                channel_id = %channel_id,
                viewers_notified,
                "Presenter stopped"
            );
            return StopOutcome::Presenter { viewers_notified };
        }

        if let Some(viewer) = self.viewers.remove(&channel_id) {
            self.metrics.set_viewers(self.viewers.len());
            if let Some(endpoint) = viewer.close() {
                self.release(MediaObject::Endpoint(endpoint)).await;
            }
            info!(
                target: "bs.actor.coordinator",
                channel_id = %channel_id,
                viewers = self.viewers.len(),
                "Viewer stopped"
            );
            return StopOutcome::Viewer;
        }

        debug!(
            target: "bs.actor.coordinator",
            channel_id = %channel_id,
            "Stop for channel without a role"
        );
        StopOutcome::NotRegistered
    }

    /// Notify and drop every viewer, then release the pipeline.
    ///
    /// Returns the number of viewers notified. No-op without a presenter.
    async fn teardown_presenter(&mut self) -> usize {
        let viewers_notified = self.viewers.len();

        for (_, viewer) in self.viewers.drain() {
            viewer.send(OutboundMessage::StopCommunication);
            viewer.close();
        }

        if let Some(presenter) = self.presenter.take() {
            presenter.close();
        }

        // Releasing the pipeline releases every endpoint in it.
        if let Some(pipeline) = self.pipeline.take() {
            self.release(MediaObject::Pipeline(pipeline)).await;
        }

        self.phase = PresenterPhase::Idle;
        self.live_since = None;
        self.metrics.set_presenter_active(false);
        self.metrics.set_viewers(0);

        viewers_notified
    }

    async fn gather(&self, channel_id: ChannelId, endpoint: &EndpointId) {
        if let Err(e) = self.engine.gather_candidates(endpoint).await {
            warn!(
                target: "bs.actor.coordinator",
                channel_id = %channel_id,
                endpoint_id = %endpoint,
                error = %e,
                "Failed to start ICE candidate gathering"
            );
        }
    }

    async fn release(&self, object: MediaObject) {
        if let Err(e) = self.engine.release(object.clone()).await {
            warn!(
                target: "bs.actor.coordinator",
                object_id = %object.id(),
                error = %e,
                "Failed to release media object"
            );
        }
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            presenter: self.presenter.as_ref().map(PeerSession::channel_id),
            phase: self.phase,
            has_pipeline: self.pipeline.is_some(),
            viewers: self.viewers.keys().copied().collect(),
            live_since: self.live_since,
        }
    }
}

/// Send a rejected `<kind>Response` and return the error.
fn reject(
    channel: &ChannelHandle,
    kind: MessageKind,
    error: BroadcastError,
) -> Result<(), BroadcastError> {
    record_rejection(error.reason_label());
    info!(
        target: "bs.actor.coordinator",
        channel_id = %channel.channel_id(),
        kind = kind.as_str(),
        reason = error.reason_label(),
        "Request rejected"
    );
    channel.send_or_log(OutboundMessage::response_for(
        kind,
        Response::rejected(error.client_message()),
    ));
    Err(error)
}

/// Forward locally gathered candidates to `channel` until `token` is
/// cancelled or the stream ends.
fn spawn_candidate_forwarder(
    channel: ChannelHandle,
    mut candidates: CandidateStream,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                candidate = candidates.recv() => {
                    let Some(candidate) = candidate else { break };
                    if token.is_cancelled() {
                        break;
                    }
                    channel.send_or_log(OutboundMessage::IceCandidate { candidate });
                }
            }
        }
        debug!(
            target: "bs.actor.coordinator",
            channel_id = %channel.channel_id(),
            "Candidate forwarder stopped"
        );
    });
}
