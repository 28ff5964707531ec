//! Signaling protocol: wire messages, per-connection outbound queues and
//! inbound dispatch.
//!
//! # Modules
//!
//! - [`messages`] - JSON wire format, discriminated by `id`
//! - [`channel`] - `ChannelHandle`, the non-blocking outbound queue of one connection
//! - [`handler`] - `SignalingHandler`, decodes frames and drives the coordinator

pub mod channel;
pub mod handler;
pub mod messages;

pub use channel::ChannelHandle;
pub use handler::SignalingHandler;
pub use messages::{InboundMessage, MessageKind, OutboundMessage, Response, ResponseStatus};
