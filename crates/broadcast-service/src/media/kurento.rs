//! Kurento Media Server client.
//!
//! Implements [`MediaEngine`] over the Kurento JSON-RPC 2.0 protocol on a
//! single WebSocket connection:
//!
//! - `create` for `MediaPipeline` and `WebRtcEndpoint`
//! - `invoke` for `connect`, `processOffer`, `gatherCandidates`, `addIceCandidate`
//! - `subscribe` to `IceCandidateFound`, delivered back as `onEvent` notifications
//! - `release` (an "object not found" answer counts as success)
//!
//! Requests are correlated by JSON-RPC id. The `sessionId` returned by the
//! first response is attached to every later request. When the socket
//! closes, in-flight requests fail with [`MediaError::Disconnected`] and
//! every candidate stream ends.

use super::{CandidateStream, IceCandidate, MediaEngine, MediaError, MediaObject};
use crate::observability::metrics::record_engine_request;

use async_trait::async_trait;
use common::types::{EndpointId, PipelineId};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Keepalive ping interval. Kurento drops sessions idle for longer than
/// the interval announced in the ping.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(240);

/// Kurento error code for a missing media object.
const OBJECT_NOT_FOUND: i64 = 40101;

/// Event type carrying locally gathered candidates.
const ICE_CANDIDATE_FOUND: &str = "IceCandidateFound";

type PendingResponse = oneshot::Sender<Result<Value, MediaError>>;

/// State shared between the client handle and the socket reader task.
#[derive(Default)]
struct Shared {
    /// In-flight requests by JSON-RPC id.
    pending: Mutex<HashMap<u64, PendingResponse>>,
    /// Candidate subscribers by endpoint id.
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<IceCandidate>>>,
    /// Owning pipeline of every endpoint created through this client.
    endpoint_pipelines: Mutex<HashMap<String, String>>,
    /// Kurento session id, learned from the first response.
    session_id: Mutex<Option<String>>,
}

impl Shared {
    /// Route one inbound frame to its pending request or subscription.
    async fn dispatch(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(target: "bs.media.kurento", error = %e, "Unparseable frame from media engine");
                return;
            }
        };

        if let Some(id) = frame.get("id").and_then(Value::as_u64) {
            let outcome = match frame.get("error") {
                Some(error) => Err(MediaError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                }),
                None => {
                    let result = frame.get("result").cloned().unwrap_or(Value::Null);
                    if let Some(session_id) = result.get("sessionId").and_then(Value::as_str) {
                        let mut current = self.session_id.lock().await;
                        if current.as_deref() != Some(session_id) {
                            debug!(target: "bs.media.kurento", session_id = %session_id, "Media engine session established");
                            *current = Some(session_id.to_string());
                        }
                    }
                    Ok(result)
                }
            };

            match self.pending.lock().await.remove(&id) {
                Some(respond_to) => {
                    let _ = respond_to.send(outcome);
                }
                None => {
                    debug!(target: "bs.media.kurento", id, "Response for unknown request id");
                }
            }
            return;
        }

        if frame.get("method").and_then(Value::as_str) == Some("onEvent") {
            if let Some(event) = frame.pointer("/params/value") {
                self.dispatch_event(event).await;
            }
        }
    }

    async fn dispatch_event(&self, event: &Value) {
        if event.get("type").and_then(Value::as_str) != Some(ICE_CANDIDATE_FOUND) {
            return;
        }

        let Some(object) = event.get("object").and_then(Value::as_str) else {
            return;
        };

        let candidate = match event
            .pointer("/data/candidate")
            .cloned()
            .map(serde_json::from_value::<IceCandidate>)
        {
            Some(Ok(candidate)) => candidate,
            Some(Err(e)) => {
                warn!(target: "bs.media.kurento", error = %e, "Invalid candidate in IceCandidateFound event");
                return;
            }
            None => return,
        };

        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(sender) = subscriptions.get(object) {
            if sender.send(candidate).is_err() {
                // Subscriber went away; stop routing to it.
                subscriptions.remove(object);
            }
        }
    }

    /// Fail every in-flight request and end every candidate stream.
    async fn close(&self) {
        for (_, respond_to) in self.pending.lock().await.drain() {
            let _ = respond_to.send(Err(MediaError::Disconnected));
        }
        self.subscriptions.lock().await.clear();
    }
}

/// Kurento Media Server client.
///
/// Cheap to clone; all clones share one WebSocket connection.
#[derive(Clone)]
pub struct KurentoClient {
    outbound: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    next_id: Arc<AtomicU64>,
    /// Cancelled when the socket closes or the owner shuts down.
    closed: CancellationToken,
}

impl KurentoClient {
    /// Connect to a Kurento server at `url` (`ws://host:8888/kurento`).
    ///
    /// Spawns the socket reader, writer and keepalive tasks. They stop when
    /// `cancel_token` is cancelled or the server closes the connection.
    ///
    /// # Errors
    ///
    /// Returns `MediaError::Transport` if the WebSocket handshake fails.
    pub async fn connect(url: &str, cancel_token: CancellationToken) -> Result<Self, MediaError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| MediaError::Transport(format!("websocket connect failed: {e}")))?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(Shared::default());
        let closed = cancel_token.child_token();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_closed.cancelled() => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(e) = ws_write.send(message).await {
                            warn!(target: "bs.media.kurento", error = %e, "Media engine write failed");
                            writer_closed.cancel();
                            break;
                        }
                    }
                }
            }
        });

        let reader_shared = Arc::clone(&shared);
        let reader_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    () = reader_closed.cancelled() => break,
                    frame = ws_read.next() => frame,
                };

                match frame {
                    Some(Ok(Message::Text(text))) => reader_shared.dispatch(&text).await,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(target: "bs.media.kurento", "Media engine closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(target: "bs.media.kurento", error = %e, "Media engine read failed");
                        break;
                    }
                }
            }

            // Order matters: mark closed before draining so that a request
            // registered concurrently either sees the flag or gets drained.
            reader_closed.cancel();
            reader_shared.close().await;
        });

        let client = Self {
            outbound,
            shared,
            next_id: Arc::new(AtomicU64::new(1)),
            closed,
        };

        let keepalive = client.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = keepalive.closed.cancelled() => break,
                    _ = ticker.tick() => {
                        let interval_ms = u64::try_from(KEEPALIVE_INTERVAL.as_millis()).unwrap_or(u64::MAX);
                        if let Err(e) = keepalive.request("ping", json!({ "interval": interval_ms })).await {
                            warn!(target: "bs.media.kurento", error = %e, "Media engine keepalive failed");
                        }
                    }
                }
            }
        });

        info!(target: "bs.media.kurento", "Connected to media engine");
        Ok(client)
    }

    /// Whether the engine connection is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Close the connection.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once the connection is closed, from either side.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Send one JSON-RPC request and wait for its result.
    ///
    /// No timeout is applied: a request the engine never answers waits
    /// until the connection closes.
    async fn request(&self, method: &'static str, mut params: Value) -> Result<Value, MediaError> {
        let start = Instant::now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Some(session_id) = self.shared.session_id.lock().await.clone() {
            if let Value::Object(map) = &mut params {
                map.insert("sessionId".to_string(), Value::String(session_id));
            }
        }

        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        if self.closed.is_cancelled()
            || self.outbound.send(Message::Text(frame.to_string())).is_err()
        {
            self.shared.pending.lock().await.remove(&id);
            return Err(MediaError::Disconnected);
        }

        debug!(target: "bs.media.kurento", id, method = %method, "Media engine request sent");

        let outcome = rx.await.map_err(|_| MediaError::Disconnected)?;
        record_engine_request(method, start.elapsed());
        outcome
    }

    async fn invoke(
        &self,
        object: &str,
        operation: &str,
        operation_params: Value,
    ) -> Result<Value, MediaError> {
        self.request(
            "invoke",
            json!({
                "object": object,
                "operation": operation,
                "operationParams": operation_params,
            }),
        )
        .await
    }

    async fn create(&self, object_type: &str, constructor_params: Value) -> Result<String, MediaError> {
        let result = self
            .request(
                "create",
                json!({
                    "type": object_type,
                    "constructorParams": constructor_params,
                    "properties": {},
                }),
            )
            .await?;
        string_value(&result)
    }
}

/// Extract `result.value` as a string.
fn string_value(result: &Value) -> Result<String, MediaError> {
    result
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MediaError::Protocol(format!("expected string value in {result}")))
}

#[async_trait]
impl MediaEngine for KurentoClient {
    #[instrument(skip_all, target = "bs.media.kurento")]
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError> {
        let id = self.create("MediaPipeline", json!({})).await?;
        debug!(target: "bs.media.kurento", pipeline_id = %id, "Pipeline created");
        Ok(PipelineId(id))
    }

    #[instrument(skip_all, target = "bs.media.kurento", fields(pipeline_id = %pipeline))]
    async fn create_endpoint(&self, pipeline: &PipelineId) -> Result<EndpointId, MediaError> {
        let id = self
            .create("WebRtcEndpoint", json!({ "mediaPipeline": pipeline.as_str() }))
            .await?;
        self.shared
            .endpoint_pipelines
            .lock()
            .await
            .insert(id.clone(), pipeline.0.clone());
        debug!(target: "bs.media.kurento", endpoint_id = %id, "Endpoint created");
        Ok(EndpointId(id))
    }

    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), MediaError> {
        self.invoke(source.as_str(), "connect", json!({ "sink": sink.as_str() }))
            .await
            .map(|_| ())
    }

    async fn process_offer(
        &self,
        endpoint: &EndpointId,
        offer: &str,
    ) -> Result<String, MediaError> {
        let result = self
            .invoke(endpoint.as_str(), "processOffer", json!({ "offer": offer }))
            .await?;
        string_value(&result)
    }

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), MediaError> {
        self.invoke(endpoint.as_str(), "gatherCandidates", json!({}))
            .await
            .map(|_| ())
    }

    async fn add_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        self.invoke(
            endpoint.as_str(),
            "addIceCandidate",
            json!({
                "candidate": {
                    "__module__": "kurento",
                    "__type__": "IceCandidate",
                    "candidate": candidate.candidate,
                    "sdpMid": candidate.sdp_mid,
                    "sdpMLineIndex": candidate.sdp_m_line_index,
                }
            }),
        )
        .await
        .map(|_| ())
    }

    async fn subscribe_local_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<CandidateStream, MediaError> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Register before subscribing so no event can slip between the two.
        self.shared
            .subscriptions
            .lock()
            .await
            .insert(endpoint.0.clone(), tx);

        let subscribed = self
            .request(
                "subscribe",
                json!({ "type": ICE_CANDIDATE_FOUND, "object": endpoint.as_str() }),
            )
            .await;

        if let Err(e) = subscribed {
            self.shared.subscriptions.lock().await.remove(endpoint.as_str());
            return Err(e);
        }

        Ok(rx)
    }

    async fn release(&self, object: MediaObject) -> Result<(), MediaError> {
        match &object {
            MediaObject::Endpoint(endpoint) => {
                self.shared
                    .endpoint_pipelines
                    .lock()
                    .await
                    .remove(endpoint.as_str());
                self.shared
                    .subscriptions
                    .lock()
                    .await
                    .remove(endpoint.as_str());
            }
            MediaObject::Pipeline(pipeline) => {
                let mut endpoints = self.shared.endpoint_pipelines.lock().await;
                let released: Vec<String> = endpoints
                    .iter()
                    .filter(|(_, owner)| owner.as_str() == pipeline.as_str())
                    .map(|(endpoint, _)| endpoint.clone())
                    .collect();
                let mut subscriptions = self.shared.subscriptions.lock().await;
                for endpoint in released {
                    endpoints.remove(&endpoint);
                    subscriptions.remove(&endpoint);
                }
            }
        }

        match self.request("release", json!({ "object": object.id() })).await {
            Ok(_) => Ok(()),
            Err(MediaError::Rpc { code, .. }) if code == OBJECT_NOT_FOUND => {
                debug!(target: "bs.media.kurento", object_id = %object.id(), "Release of unknown object ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
