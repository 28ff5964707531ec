//! Broadcast Signaling Service Library
//!
//! Signaling coordinator for a one-to-many WebRTC broadcast: one presenter,
//! any number of viewers. Peers exchange SDP offers/answers and ICE
//! candidates with this service over a WebSocket; media itself flows
//! through an external media engine (Kurento Media Server) that the
//! coordinator drives over JSON-RPC.
//!
//! # Architecture
//!
//! ```text
//! WebSocket connection (one per peer)
//! └── SignalingHandler (decode, dispatch)
//!     └── BroadcastCoordinator actor (singleton)
//!         ├── pipeline + presenter PeerSession
//!         ├── viewer PeerSessions
//!         └── MediaEngine (KurentoClient)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Coordinator actor, sessions and mailbox monitoring
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types and client-facing rejection texts
//! - [`media`] - Media engine trait and the Kurento client
//! - [`observability`] - Health endpoints and Prometheus metrics
//! - [`signaling`] - Wire messages, outbound queues, inbound dispatch
//! - [`transport`] - WebSocket endpoint

pub mod actors;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod signaling;
pub mod transport;
