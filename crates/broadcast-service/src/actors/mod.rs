//! Actor model for the broadcast coordinator.
//!
//! ```text
//! BroadcastCoordinator (singleton)
//! ├── owns the pipeline and the presenter PeerSession
//! ├── owns the viewer map (ChannelId -> PeerSession)
//! └── spawns one candidate forwarder per endpoint
//!     (cancelled through a child CancellationToken on release)
//! ```
//!
//! # Modules
//!
//! - [`coordinator`] - `BroadcastCoordinator` actor and its handle
//! - [`engine_watch`] - Clears broadcast state when the media engine drops
//! - [`messages`] - Message types for the coordinator mailbox
//! - [`metrics`] - Mailbox monitoring and broadcast counters
//! - [`session`] - `PeerSession`, one per presenter or viewer

pub mod coordinator;
pub mod engine_watch;
pub mod messages;
pub mod metrics;
pub mod session;

pub use coordinator::{BroadcastCoordinator, BroadcastCoordinatorHandle};
pub use engine_watch::{watch_engine, EngineWatchOutcome};
pub use messages::*;
pub use metrics::{BroadcastMetrics, BroadcastMetricsSnapshot, MailboxMonitor};
pub use session::PeerSession;
