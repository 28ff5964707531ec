//! In-memory media engine for coordinator tests.
//!
//! Records every call, tracks which pipelines and endpoints are live, and
//! can be configured to fail at a given step:
//!
//! ```rust,ignore
//! use bs_test_utils::{FailPoint, MockMediaEngine};
//!
//! let engine = MockMediaEngine::builder()
//!     .fail_once(FailPoint::ProcessOffer)
//!     .candidates_on_gather(2)
//!     .build();
//! ```
//!
//! SDP answers are `answer:<offer>` so tests can match them to offers.

use async_trait::async_trait;
use broadcast_service::media::{
    CandidateStream, IceCandidate, MediaEngine, MediaError, MediaObject,
};
use common::types::{EndpointId, PipelineId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreatePipeline,
    CreateEndpoint,
    Subscribe,
    Connect,
    ProcessOffer,
    GatherCandidates,
    AddCandidate,
    Release,
}

impl FailPoint {
    fn error(self) -> MediaError {
        MediaError::Rpc {
            code: 40000,
            message: format!("{self:?} failed"),
        }
    }
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreatePipeline,
    CreateEndpoint { pipeline: String },
    Subscribe { endpoint: String },
    Connect { source: String, sink: String },
    ProcessOffer { endpoint: String, offer: String },
    GatherCandidates { endpoint: String },
    AddCandidate { endpoint: String, candidate: IceCandidate },
    Release { object: String },
}

#[derive(Debug, Default)]
struct State {
    next_id: u32,
    calls: Vec<EngineCall>,
    pipelines: HashSet<String>,
    /// Live endpoint -> owning pipeline.
    endpoints: HashMap<String, String>,
    connections: Vec<(String, String)>,
    subscribers: HashMap<String, mpsc::UnboundedSender<IceCandidate>>,
    fail_once: HashSet<FailPoint>,
    fail_always: HashSet<FailPoint>,
}

impl State {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn check(&mut self, point: FailPoint) -> Result<(), MediaError> {
        if self.fail_always.contains(&point) || self.fail_once.remove(&point) {
            return Err(point.error());
        }
        Ok(())
    }

    fn drop_endpoint(&mut self, endpoint: &str) {
        self.endpoints.remove(endpoint);
        self.subscribers.remove(endpoint);
    }
}

/// Mock [`MediaEngine`].
#[derive(Debug, Default)]
pub struct MockMediaEngine {
    state: Mutex<State>,
    candidates_on_gather: usize,
}

impl MockMediaEngine {
    /// Engine that succeeds at everything.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    /// Fail the next call at `point`.
    pub fn fail_once(&self, point: FailPoint) {
        self.state.lock().unwrap().fail_once.insert(point);
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }

    /// Ids of every object passed to `release`, in order.
    #[must_use]
    pub fn released(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Release { object } => Some(object.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn live_pipelines(&self) -> Vec<String> {
        self.state.lock().unwrap().pipelines.iter().cloned().collect()
    }

    #[must_use]
    pub fn live_endpoints(&self) -> Vec<String> {
        self.state.lock().unwrap().endpoints.keys().cloned().collect()
    }

    #[must_use]
    pub fn is_live(&self, id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.pipelines.contains(id) || state.endpoints.contains_key(id)
    }

    /// `(source, sink)` pairs passed to `connect`.
    #[must_use]
    pub fn connections(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().connections.clone()
    }

    /// Candidates added for `endpoint`, in order.
    #[must_use]
    pub fn added_candidates(&self, endpoint: &str) -> Vec<IceCandidate> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::AddCandidate {
                    endpoint: target,
                    candidate,
                } if target == endpoint => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    /// Push a locally gathered candidate to `endpoint`'s subscriber.
    ///
    /// Returns false if nobody is subscribed (e.g. after release).
    pub fn emit_candidate(&self, endpoint: &str, candidate: IceCandidate) -> bool {
        let state = self.state.lock().unwrap();
        state
            .subscribers
            .get(endpoint)
            .is_some_and(|subscriber| subscriber.send(candidate).is_ok())
    }

    fn record(&self, call: EngineCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// Candidate the mock emits for `endpoint` (index `n`).
#[must_use]
pub fn local_candidate(endpoint: &str, n: usize) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{endpoint}:{n} 1 UDP 2122260223 10.0.0.9 5000{n} typ host"),
        sdp_mid: "0".to_string(),
        sdp_m_line_index: 0,
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_pipeline(&self) -> Result<PipelineId, MediaError> {
        self.record(EngineCall::CreatePipeline);
        let mut state = self.state.lock().unwrap();
        state.check(FailPoint::CreatePipeline)?;
        let id = state.next("pipeline");
        state.pipelines.insert(id.clone());
        Ok(PipelineId(id))
    }

    async fn create_endpoint(&self, pipeline: &PipelineId) -> Result<EndpointId, MediaError> {
        self.record(EngineCall::CreateEndpoint {
            pipeline: pipeline.0.clone(),
        });
        let mut state = self.state.lock().unwrap();
        state.check(FailPoint::CreateEndpoint)?;
        if !state.pipelines.contains(pipeline.as_str()) {
            return Err(MediaError::Rpc {
                code: 40101,
                message: format!("pipeline {pipeline} not found"),
            });
        }
        let id = state.next("endpoint");
        state.endpoints.insert(id.clone(), pipeline.0.clone());
        Ok(EndpointId(id))
    }

    async fn connect(&self, source: &EndpointId, sink: &EndpointId) -> Result<(), MediaError> {
        self.record(EngineCall::Connect {
            source: source.0.clone(),
            sink: sink.0.clone(),
        });
        let mut state = self.state.lock().unwrap();
        state.check(FailPoint::Connect)?;
        state.connections.push((source.0.clone(), sink.0.clone()));
        Ok(())
    }

    async fn process_offer(&self, endpoint: &EndpointId, offer: &str) -> Result<String, MediaError> {
        self.record(EngineCall::ProcessOffer {
            endpoint: endpoint.0.clone(),
            offer: offer.to_string(),
        });
        self.state
            .lock()
            .unwrap()
            .check(FailPoint::ProcessOffer)?;
        Ok(format!("answer:{offer}"))
    }

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), MediaError> {
        self.record(EngineCall::GatherCandidates {
            endpoint: endpoint.0.clone(),
        });
        let mut state = self.state.lock().unwrap();
        state.check(FailPoint::GatherCandidates)?;
        if let Some(subscriber) = state.subscribers.get(endpoint.as_str()) {
            for n in 0..self.candidates_on_gather {
                let _ = subscriber.send(local_candidate(endpoint.as_str(), n));
            }
        }
        Ok(())
    }

    async fn add_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: IceCandidate,
    ) -> Result<(), MediaError> {
        self.record(EngineCall::AddCandidate {
            endpoint: endpoint.0.clone(),
            candidate,
        });
        self.state
            .lock()
            .unwrap()
            .check(FailPoint::AddCandidate)
    }

    async fn subscribe_local_candidates(
        &self,
        endpoint: &EndpointId,
    ) -> Result<CandidateStream, MediaError> {
        self.record(EngineCall::Subscribe {
            endpoint: endpoint.0.clone(),
        });
        let mut state = self.state.lock().unwrap();
        state.check(FailPoint::Subscribe)?;
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.insert(endpoint.0.clone(), tx);
        Ok(rx)
    }

    async fn release(&self, object: MediaObject) -> Result<(), MediaError> {
        self.record(EngineCall::Release {
            object: object.id().to_string(),
        });
        let mut state = self.state.lock().unwrap();
        state.check(FailPoint::Release)?;
        match object {
            MediaObject::Pipeline(pipeline) => {
                state.pipelines.remove(pipeline.as_str());
                let owned: Vec<String> = state
                    .endpoints
                    .iter()
                    .filter(|(_, owner)| owner.as_str() == pipeline.as_str())
                    .map(|(endpoint, _)| endpoint.clone())
                    .collect();
                for endpoint in owned {
                    state.drop_endpoint(&endpoint);
                }
            }
            MediaObject::Endpoint(endpoint) => state.drop_endpoint(endpoint.as_str()),
        }
        // Unknown objects release successfully.
        Ok(())
    }
}

/// Builder for [`MockMediaEngine`].
#[derive(Debug, Default)]
pub struct MockMediaEngineBuilder {
    fail_once: HashSet<FailPoint>,
    fail_always: HashSet<FailPoint>,
    candidates_on_gather: usize,
}

impl MockMediaEngineBuilder {
    /// Fail the first call at `point`.
    #[must_use]
    pub fn fail_once(mut self, point: FailPoint) -> Self {
        self.fail_once.insert(point);
        self
    }

    /// Fail every call at `point`.
    #[must_use]
    pub fn fail_always(mut self, point: FailPoint) -> Self {
        self.fail_always.insert(point);
        self
    }

    /// Emit `count` local candidates whenever gathering starts.
    #[must_use]
    pub fn candidates_on_gather(mut self, count: usize) -> Self {
        self.candidates_on_gather = count;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockMediaEngine> {
        Arc::new(MockMediaEngine {
            state: Mutex::new(State {
                fail_once: self.fail_once,
                fail_always: self.fail_always,
                ..State::default()
            }),
            candidates_on_gather: self.candidates_on_gather,
        })
    }
}
