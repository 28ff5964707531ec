//! Signaling transports.

pub mod ws;

pub use ws::{signaling_router, SignalingState};
