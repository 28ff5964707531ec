//! Test fixtures for signaling tests.
//!
//! - [`TestPeer`] - a signaling channel whose outbound queue the test reads
//! - [`TestBroadcast`] - coordinator + handler wired to a [`MockMediaEngine`]
//! - frame builders for inbound JSON text frames

use crate::mock_engine::MockMediaEngine;

use broadcast_service::actors::{BroadcastCoordinatorHandle, BroadcastMetrics};
use broadcast_service::media::{IceCandidate, MediaEngine};
use broadcast_service::signaling::{ChannelHandle, OutboundMessage, SignalingHandler};
use common::types::ChannelId;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long [`TestPeer::recv`] waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// One signaling connection as seen by a test.
#[derive(Debug)]
pub struct TestPeer {
    channel: ChannelHandle,
    outbound: mpsc::Receiver<OutboundMessage>,
}

impl TestPeer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(64)
    }

    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        let (channel, outbound) = ChannelHandle::new(ChannelId::new(), buffer);
        Self { channel, outbound }
    }

    #[must_use]
    pub fn channel(&self) -> ChannelHandle {
        self.channel.clone()
    }

    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.channel.channel_id()
    }

    /// Next outbound message, failing the test after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> OutboundMessage {
        tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound queue closed")
    }

    /// Next outbound message as JSON, exactly as it goes on the wire.
    pub async fn recv_json(&mut self) -> Value {
        let message = self.recv().await;
        serde_json::from_str(&message.to_text().expect("encode outbound message"))
            .expect("outbound message is JSON")
    }

    /// Next already-queued message, if any.
    pub fn try_recv(&mut self) -> Option<OutboundMessage> {
        self.outbound.try_recv().ok()
    }

    /// Every already-queued message.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Assert nothing is queued.
    pub fn assert_silent(&mut self) {
        let queued = self.drain();
        assert!(queued.is_empty(), "expected no messages, got {queued:?}");
    }
}

impl Default for TestPeer {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator, handler and mock engine wired together.
pub struct TestBroadcast {
    pub engine: Arc<MockMediaEngine>,
    pub coordinator: BroadcastCoordinatorHandle,
    pub handler: SignalingHandler,
    pub metrics: Arc<BroadcastMetrics>,
}

impl TestBroadcast {
    /// Start with an engine that succeeds at everything.
    #[must_use]
    pub fn start() -> Self {
        Self::with_engine(MockMediaEngine::new())
    }

    #[must_use]
    pub fn with_engine(engine: Arc<MockMediaEngine>) -> Self {
        let metrics = BroadcastMetrics::new();
        let media_engine: Arc<dyn MediaEngine> = engine.clone();
        let coordinator = BroadcastCoordinatorHandle::new(media_engine, Arc::clone(&metrics));
        let handler = SignalingHandler::new(coordinator.clone());
        Self {
            engine,
            coordinator,
            handler,
            metrics,
        }
    }

    /// Feed one inbound text frame from `peer`.
    pub async fn send(&self, peer: &TestPeer, frame: &str) {
        self.handler.handle_text(&peer.channel, frame).await;
    }

    /// Simulate `peer`'s transport closing.
    pub async fn close(&self, peer: &TestPeer) {
        self.handler.handle_close(peer.id()).await;
    }
}

/// `presenter` frame.
#[must_use]
pub fn presenter_frame(sdp_offer: &str) -> String {
    json!({ "id": "presenter", "sdpOffer": sdp_offer }).to_string()
}

/// `viewer` frame.
#[must_use]
pub fn viewer_frame(sdp_offer: &str) -> String {
    json!({ "id": "viewer", "sdpOffer": sdp_offer }).to_string()
}

/// `onIceCandidate` frame.
#[must_use]
pub fn ice_frame(candidate: &IceCandidate) -> String {
    json!({ "id": "onIceCandidate", "candidate": candidate }).to_string()
}

/// `stop` frame.
#[must_use]
pub fn stop_frame() -> String {
    json!({ "id": "stop" }).to_string()
}

/// A remote candidate as a browser would send it.
#[must_use]
pub fn remote_candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP 2122194687 192.168.1.{n} 6000{n} typ host"),
        sdp_mid: "0".to_string(),
        sdp_m_line_index: 0,
    }
}
