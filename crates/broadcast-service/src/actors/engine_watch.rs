//! Supervision of the media engine connection.
//!
//! A pipeline does not outlive the engine connection that created it. When
//! the connection drops, the watch clears the coordinator so viewers get
//! `stopCommunication`, then marks the process not live so an orchestrator
//! restarts it against a fresh connection.

use crate::media::KurentoClient;
use crate::observability::HealthState;

use super::coordinator::BroadcastCoordinatorHandle;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// How a [`watch_engine`] task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineWatchOutcome {
    /// The service is shutting down; the engine connection was still up.
    Cancelled,
    /// The engine connection was lost and broadcast state was cleared.
    EngineLost { viewers_notified: usize },
}

/// Wait for the engine connection to close, then clear broadcast state.
///
/// Returns [`EngineWatchOutcome::Cancelled`] if `cancel_token` fires first.
#[instrument(skip_all, name = "bs.actor.engine_watch")]
pub async fn watch_engine(
    engine: KurentoClient,
    coordinator: BroadcastCoordinatorHandle,
    health: Arc<HealthState>,
    cancel_token: CancellationToken,
) -> EngineWatchOutcome {
    tokio::select! {
        biased;
        () = cancel_token.cancelled() => {
            info!(target: "bs.actor.engine_watch", "Engine watch cancelled");
            return EngineWatchOutcome::Cancelled;
        }
        () = engine.closed() => {}
    }

    health.set_engine_disconnected();
    health.set_not_live();
    error!(
        target: "bs.actor.engine_watch",
        "Media engine connection lost, service is no longer live"
    );

    let viewers_notified = match coordinator.engine_lost().await {
        Ok(count) => count,
        Err(e) => {
            warn!(
                target: "bs.actor.engine_watch",
                error = %e,
                "Failed to clear broadcast state after engine loss"
            );
            0
        }
    };

    EngineWatchOutcome::EngineLost { viewers_notified }
}
