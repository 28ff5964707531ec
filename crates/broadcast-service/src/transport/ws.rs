//! WebSocket signaling endpoint.
//!
//! Each accepted WebSocket is one signaling channel with a fresh
//! [`ChannelId`]. Inbound text frames go to the [`SignalingHandler`]; a
//! single writer task drains the channel's outbound queue into the socket.
//! When the socket closes (or the server shuts down) the channel's session
//! is stopped.

use crate::observability::metrics::set_connections_active;
use crate::signaling::{ChannelHandle, SignalingHandler};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use common::types::ChannelId;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Shared state of the signaling endpoint.
#[derive(Clone)]
pub struct SignalingState {
    handler: SignalingHandler,
    channel_buffer: usize,
    max_message_size: usize,
    connections: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl SignalingState {
    /// `shutdown` closes every open connection when cancelled.
    #[must_use]
    pub fn new(
        handler: SignalingHandler,
        channel_buffer: usize,
        max_message_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler,
            channel_buffer,
            max_message_size,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Number of open signaling connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Router serving the signaling WebSocket at `path`.
pub fn signaling_router(path: &str, state: SignalingState) -> Router {
    Router::new()
        .route(path, get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SignalingState>) -> Response {
    let max_message_size = state.max_message_size;
    ws.max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, ChannelId::new(), state))
}

#[instrument(skip_all, name = "bs.transport.ws", fields(channel_id = %channel_id))]
async fn handle_socket(socket: WebSocket, channel_id: ChannelId, state: SignalingState) {
    let open = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    set_connections_active(open);
    info!(target: "bs.transport.ws", connections = open, "Signaling connection opened");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (channel, mut outbound) = ChannelHandle::new(channel_id, state.channel_buffer);

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "bs.transport.ws", error = %e, "Failed to encode outbound message");
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(WsMessage::Text(text)).await {
                debug!(target: "bs.transport.ws", error = %e, "Socket write failed");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        let frame = tokio::select! {
            () = state.shutdown.cancelled() => {
                debug!(target: "bs.transport.ws", "Server shutting down, closing connection");
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => state.handler.handle_text(&channel, &text).await,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(WsMessage::Binary(_))) => {
                debug!(target: "bs.transport.ws", "Ignoring binary frame");
            }
            // Pings are answered by axum.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(target: "bs.transport.ws", error = %e, "Socket read failed");
                break;
            }
        }
    }

    state.handler.handle_close(channel_id).await;

    // Sessions holding clones of the handle were dropped by the stop above,
    // so dropping ours lets the writer flush what is queued and exit.
    drop(channel);
    if let Err(e) = writer.await {
        warn!(target: "bs.transport.ws", error = %e, "Writer task failed");
    }

    let open = state
        .connections
        .fetch_sub(1, Ordering::SeqCst)
        .saturating_sub(1);
    set_connections_active(open);
    info!(target: "bs.transport.ws", connections = open, "Signaling connection closed");
}
