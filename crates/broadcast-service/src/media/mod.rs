//! Media engine abstraction.
//!
//! The coordinator drives a media server through the [`MediaEngine`] trait
//! and never inspects media itself. Handles are opaque engine identifiers.
//!
//! # Modules
//!
//! - [`kurento`] - Kurento Media Server client over JSON-RPC/WebSocket

pub mod kurento;

pub use kurento::KurentoClient;

use async_trait::async_trait;
use common::types::{EndpointId, PipelineId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Stream of locally gathered ICE candidates for one endpoint.
///
/// Ends when the engine connection closes or the endpoint is released.
pub type CandidateStream = mpsc::UnboundedReceiver<IceCandidate>;

/// An ICE candidate as exchanged with browsers and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
}

/// A releasable engine object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaObject {
    Pipeline(PipelineId),
    Endpoint(EndpointId),
}

impl MediaObject {
    /// Raw engine identifier of the object.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            MediaObject::Pipeline(id) => id.as_str(),
            MediaObject::Endpoint(id) => id.as_str(),
        }
    }
}

/// Media engine errors.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    /// Could not reach the engine.
    #[error("Media engine transport error: {0}")]
    Transport(String),

    /// The engine answered a request with an error.
    #[error("Media engine error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The engine answered with something we could not interpret.
    #[error("Media engine protocol error: {0}")]
    Protocol(String),

    /// The engine connection closed while a request was in flight.
    #[error("Media engine connection closed")]
    Disconnected,
}

/// Control-plane operations the coordinator needs from a media server.
///
/// Calls are awaited inline by the coordinator. Implementations must treat
/// releasing an unknown or already released object as success.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Create a media pipeline.
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError>;

    /// Create a WebRTC endpoint inside `pipeline`.
    async fn create_endpoint(&self, pipeline: &PipelineId) -> Result<EndpointId, MediaError>;

    /// Route media from `source` into `sink`.
    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), MediaError>;

    /// Negotiate an SDP offer, returning the SDP answer.
    async fn process_offer(&self, endpoint: &EndpointId, offer: &str)
        -> Result<String, MediaError>;

    /// Start local ICE candidate gathering.
    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), MediaError>;

    /// Add a candidate received from the remote peer.
    async fn add_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError>;

    /// Subscribe to candidates gathered by `endpoint`.
    async fn subscribe_local_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<CandidateStream, MediaError>;

    /// Release a pipeline (and every endpoint in it) or a single endpoint.
    async fn release(&self, object: MediaObject) -> Result<(), MediaError>;
}
