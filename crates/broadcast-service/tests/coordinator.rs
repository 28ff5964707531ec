//! Coordinator behavior through the signaling handler, against the mock
//! media engine.
//!
//! Covers presenter exclusivity, viewer gating, negotiation failure
//! cleanup, ICE relay in both directions and teardown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use broadcast_service::actors::{
    BroadcastCoordinatorHandle, BroadcastMetrics, PresenterPhase, StopOutcome,
};
use broadcast_service::media::MediaEngine;
use broadcast_service::signaling::OutboundMessage;
use bs_test_utils::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Endpoint the mock created for the peer that sent `offer`.
fn endpoint_for_offer(engine: &MockMediaEngine, offer: &str) -> String {
    engine
        .calls()
        .into_iter()
        .find_map(|call| match call {
            EngineCall::ProcessOffer {
                endpoint,
                offer: sent,
            } if sent == offer => Some(endpoint),
            _ => None,
        })
        .expect("no processOffer call for offer")
}

async fn start_presenter(broadcast: &TestBroadcast, offer: &str) -> TestPeer {
    let mut presenter = TestPeer::new();
    broadcast.send(&presenter, &presenter_frame(offer)).await;
    let response = presenter.recv_json().await;
    assert_eq!(response["response"], "accepted", "presenter rejected: {response}");
    presenter
}

async fn join_viewer(broadcast: &TestBroadcast, offer: &str) -> TestPeer {
    let mut viewer = TestPeer::new();
    broadcast.send(&viewer, &viewer_frame(offer)).await;
    let response = viewer.recv_json().await;
    assert_eq!(response["response"], "accepted", "viewer rejected: {response}");
    viewer
}

// ============================================================================
// Presenter
// ============================================================================

#[tokio::test]
async fn test_presenter_accepted_with_answer() {
    let broadcast = TestBroadcast::start();
    let mut presenter = TestPeer::new();

    broadcast.send(&presenter, &presenter_frame("O1")).await;

    assert_eq!(
        presenter.recv_json().await,
        json!({"id": "presenterResponse", "response": "accepted", "sdpAnswer": "answer:O1"})
    );

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert_eq!(state.presenter, Some(presenter.id()));
    assert_eq!(state.phase, PresenterPhase::Live);
    assert!(state.has_pipeline);
    assert!(state.live_since.is_some());
    assert!(broadcast.metrics.snapshot().presenter_active);
    assert_eq!(broadcast.engine.live_pipelines().len(), 1);
}

#[tokio::test]
async fn test_presenter_setup_order() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;

    let calls = broadcast.engine.calls();
    assert!(matches!(calls.first(), Some(EngineCall::CreatePipeline)));
    assert!(matches!(calls.get(1), Some(EngineCall::CreateEndpoint { .. })));
    assert!(matches!(calls.get(2), Some(EngineCall::Subscribe { .. })));
    assert!(matches!(calls.get(3), Some(EngineCall::ProcessOffer { .. })));
    assert!(matches!(calls.get(4), Some(EngineCall::GatherCandidates { .. })));
}

#[tokio::test]
async fn test_second_presenter_rejected_without_state_change() {
    let broadcast = TestBroadcast::start();
    let presenter = start_presenter(&broadcast, "O1").await;
    let calls_before = broadcast.engine.calls().len();

    let mut intruder = TestPeer::new();
    broadcast.send(&intruder, &presenter_frame("O2")).await;

    assert_eq!(
        intruder.recv_json().await,
        json!({
            "id": "presenterResponse",
            "response": "rejected",
            "message": "another presenter active"
        })
    );
    assert_eq!(broadcast.engine.calls().len(), calls_before);

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert_eq!(state.presenter, Some(presenter.id()));
}

#[tokio::test]
async fn test_concurrent_presenters_exactly_one_accepted() {
    let broadcast = TestBroadcast::start();
    let mut first = TestPeer::new();
    let mut second = TestPeer::new();

    let (a, b) = tokio::join!(
        broadcast.coordinator.become_presenter(first.channel(), "O1".to_string()),
        broadcast.coordinator.become_presenter(second.channel(), "O2".to_string()),
    );
    assert!(a.is_ok() ^ b.is_ok(), "exactly one presenter must win");

    let responses = [first.recv_json().await, second.recv_json().await];
    let accepted = responses
        .iter()
        .filter(|r| r["response"] == "accepted")
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(broadcast.engine.count_calls(|c| *c == EngineCall::CreatePipeline), 1);
}

#[tokio::test]
async fn test_presenter_negotiation_failure_releases_pipeline() {
    let engine = MockMediaEngine::builder()
        .fail_once(FailPoint::ProcessOffer)
        .build();
    let broadcast = TestBroadcast::with_engine(Arc::clone(&engine));
    let mut presenter = TestPeer::new();

    broadcast.send(&presenter, &presenter_frame("O1")).await;

    let response = presenter.recv_json().await;
    assert_eq!(response["id"], "presenterResponse");
    assert_eq!(response["response"], "rejected");
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("ProcessOffer failed"));

    assert!(engine.live_pipelines().is_empty(), "partial pipeline must be released");
    assert!(engine.live_endpoints().is_empty());

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert_eq!(state.presenter, None);
    assert_eq!(state.phase, PresenterPhase::Idle);
    assert!(!state.has_pipeline);

    // A fresh attempt succeeds.
    let _presenter = start_presenter(&broadcast, "O1b").await;
}

#[tokio::test]
async fn test_presenter_pipeline_failure_needs_no_release() {
    let engine = MockMediaEngine::builder()
        .fail_once(FailPoint::CreatePipeline)
        .build();
    let broadcast = TestBroadcast::with_engine(Arc::clone(&engine));
    let mut presenter = TestPeer::new();

    broadcast.send(&presenter, &presenter_frame("O1")).await;

    assert_eq!(presenter.recv_json().await["response"], "rejected");
    assert!(engine.released().is_empty());
    assert_eq!(
        broadcast.coordinator.get_state().await.unwrap().phase,
        PresenterPhase::Idle
    );
}

#[tokio::test]
async fn test_presenter_candidates_follow_response() {
    let engine = MockMediaEngine::builder().candidates_on_gather(2).build();
    let broadcast = TestBroadcast::with_engine(Arc::clone(&engine));
    let mut presenter = start_presenter(&broadcast, "O1").await;
    let endpoint = endpoint_for_offer(&engine, "O1");

    for n in 0..2 {
        match presenter.recv().await {
            OutboundMessage::IceCandidate { candidate } => {
                assert_eq!(candidate, local_candidate(&endpoint, n));
            }
            other => panic!("expected iceCandidate, got {other:?}"),
        }
    }
}

// ============================================================================
// Viewers
// ============================================================================

#[tokio::test]
async fn test_viewer_without_presenter_rejected() {
    let broadcast = TestBroadcast::start();
    let mut viewer = TestPeer::new();

    broadcast.send(&viewer, &viewer_frame("V")).await;

    assert_eq!(
        viewer.recv_json().await,
        json!({
            "id": "viewerResponse",
            "response": "rejected",
            "message": "no active presenter"
        })
    );
    assert!(broadcast.engine.calls().is_empty());

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert!(state.viewers.is_empty());
    assert_eq!(state.phase, PresenterPhase::Idle);
}

#[tokio::test]
async fn test_viewer_connected_to_presenter_endpoint() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let mut viewer = TestPeer::new();

    broadcast.send(&viewer, &viewer_frame("OV")).await;

    assert_eq!(
        viewer.recv_json().await,
        json!({"id": "viewerResponse", "response": "accepted", "sdpAnswer": "answer:OV"})
    );

    let presenter_endpoint = endpoint_for_offer(&broadcast.engine, "O1");
    let viewer_endpoint = endpoint_for_offer(&broadcast.engine, "OV");
    assert_eq!(
        broadcast.engine.connections(),
        vec![(presenter_endpoint, viewer_endpoint)]
    );

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert!(state.is_viewer(viewer.id()));
    assert_eq!(broadcast.metrics.snapshot().viewers, 1);
}

#[tokio::test]
async fn test_viewer_twice_rejected() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let mut viewer = join_viewer(&broadcast, "OV").await;
    let endpoints_before = broadcast.engine.live_endpoints().len();

    broadcast.send(&viewer, &viewer_frame("OV2")).await;

    let response = viewer.recv_json().await;
    assert_eq!(response["response"], "rejected");
    assert_eq!(response["message"], "already viewing");
    assert_eq!(broadcast.engine.live_endpoints().len(), endpoints_before);
}

#[tokio::test]
async fn test_presenter_cannot_view_itself() {
    let broadcast = TestBroadcast::start();
    let mut presenter = start_presenter(&broadcast, "O1").await;

    broadcast.send(&presenter, &viewer_frame("OV")).await;

    let response = presenter.recv_json().await;
    assert_eq!(response["id"], "viewerResponse");
    assert_eq!(response["message"], "already presenting");

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert!(state.viewers.is_empty());
}

#[tokio::test]
async fn test_viewer_failure_releases_endpoint_and_keeps_broadcast() {
    let engine = MockMediaEngine::builder().fail_once(FailPoint::Connect).build();
    let broadcast = TestBroadcast::with_engine(Arc::clone(&engine));
    let _presenter = start_presenter(&broadcast, "O1").await;
    let mut viewer = TestPeer::new();

    broadcast.send(&viewer, &viewer_frame("OV")).await;

    let response = viewer.recv_json().await;
    assert_eq!(response["response"], "rejected");

    // Only the presenter endpoint is left.
    assert_eq!(engine.live_endpoints().len(), 1);
    let state = broadcast.coordinator.get_state().await.unwrap();
    assert!(state.viewers.is_empty());
    assert_eq!(state.phase, PresenterPhase::Live);

    // Retrying works.
    broadcast.send(&viewer, &viewer_frame("OV-retry")).await;
    assert_eq!(viewer.recv_json().await["response"], "accepted");
}

/// Fail the next viewer negotiation at `point`, after its endpoint exists.
async fn assert_viewer_failure_releases_endpoint(point: FailPoint) {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let presenter_endpoint = endpoint_for_offer(&broadcast.engine, "O1");
    let mut viewer = TestPeer::new();
    broadcast.engine.fail_once(point);

    broadcast.send(&viewer, &viewer_frame("OV")).await;

    let response = viewer.recv_json().await;
    assert_eq!(response["id"], "viewerResponse");
    assert_eq!(response["response"], "rejected");

    let viewer_endpoint = broadcast
        .engine
        .calls()
        .into_iter()
        .find_map(|call| match call {
            EngineCall::Subscribe { endpoint } if endpoint != presenter_endpoint => Some(endpoint),
            _ => None,
        })
        .expect("viewer endpoint was never subscribed");
    assert_eq!(broadcast.engine.released(), vec![viewer_endpoint.clone()]);
    assert!(!broadcast.engine.is_live(&viewer_endpoint));
    assert_eq!(broadcast.engine.live_endpoints(), vec![presenter_endpoint]);

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert!(!state.is_viewer(viewer.id()));
    assert_eq!(state.phase, PresenterPhase::Live);
    assert_eq!(broadcast.metrics.snapshot().viewers, 0);
}

#[tokio::test]
async fn test_viewer_offer_failure_releases_endpoint() {
    assert_viewer_failure_releases_endpoint(FailPoint::ProcessOffer).await;
}

#[tokio::test]
async fn test_viewer_subscribe_failure_releases_endpoint() {
    assert_viewer_failure_releases_endpoint(FailPoint::Subscribe).await;
}

// ============================================================================
// ICE relay
// ============================================================================

#[tokio::test]
async fn test_remote_candidates_reach_sender_endpoint() {
    let broadcast = TestBroadcast::start();
    let presenter = start_presenter(&broadcast, "O1").await;
    let viewer = join_viewer(&broadcast, "OV").await;

    broadcast.send(&presenter, &ice_frame(&remote_candidate(1))).await;
    broadcast.send(&viewer, &ice_frame(&remote_candidate(2))).await;

    let presenter_endpoint = endpoint_for_offer(&broadcast.engine, "O1");
    let viewer_endpoint = endpoint_for_offer(&broadcast.engine, "OV");
    assert_eq!(
        broadcast.engine.added_candidates(&presenter_endpoint),
        vec![remote_candidate(1)]
    );
    assert_eq!(
        broadcast.engine.added_candidates(&viewer_endpoint),
        vec![remote_candidate(2)]
    );
}

#[tokio::test]
async fn test_candidate_from_unknown_channel_dropped() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let mut stranger = TestPeer::new();

    broadcast.send(&stranger, &ice_frame(&remote_candidate(1))).await;

    assert_eq!(
        broadcast
            .engine
            .count_calls(|c| matches!(c, EngineCall::AddCandidate { .. })),
        0
    );
    stranger.assert_silent();
}

#[tokio::test]
async fn test_add_candidate_failure_not_reported() {
    let engine = MockMediaEngine::builder()
        .fail_always(FailPoint::AddCandidate)
        .build();
    let broadcast = TestBroadcast::with_engine(engine);
    let mut presenter = start_presenter(&broadcast, "O1").await;

    broadcast.send(&presenter, &ice_frame(&remote_candidate(1))).await;

    presenter.assert_silent();
    assert_eq!(
        broadcast.coordinator.get_state().await.unwrap().phase,
        PresenterPhase::Live
    );
}

#[tokio::test]
async fn test_local_candidates_routed_to_owner() {
    let broadcast = TestBroadcast::start();
    let mut presenter = start_presenter(&broadcast, "O1").await;
    let mut viewer = join_viewer(&broadcast, "OV").await;
    let viewer_endpoint = endpoint_for_offer(&broadcast.engine, "OV");

    assert!(broadcast
        .engine
        .emit_candidate(&viewer_endpoint, local_candidate(&viewer_endpoint, 7)));

    assert_eq!(
        viewer.recv().await,
        OutboundMessage::IceCandidate {
            candidate: local_candidate(&viewer_endpoint, 7)
        }
    );
    presenter.assert_silent();
}

// ============================================================================
// Stop and teardown
// ============================================================================

#[tokio::test]
async fn test_presenter_viewer_viewer_scenario() {
    let broadcast = TestBroadcast::start();
    let mut presenter = TestPeer::new();
    let mut v1 = TestPeer::new();
    let mut v2 = TestPeer::new();

    broadcast.send(&presenter, &presenter_frame("O1")).await;
    assert_eq!(presenter.recv_json().await["sdpAnswer"], "answer:O1");

    broadcast.send(&v1, &viewer_frame("O2")).await;
    assert_eq!(v1.recv_json().await["sdpAnswer"], "answer:O2");

    broadcast.send(&v2, &viewer_frame("O3")).await;
    assert_eq!(v2.recv_json().await["sdpAnswer"], "answer:O3");

    let presenter_endpoint = endpoint_for_offer(&broadcast.engine, "O1");
    let connections = broadcast.engine.connections();
    assert_eq!(connections.len(), 2);
    assert!(connections.iter().all(|(source, _)| *source == presenter_endpoint));

    broadcast.send(&presenter, &stop_frame()).await;

    assert_eq!(v1.recv_json().await, json!({"id": "stopCommunication"}));
    assert_eq!(v2.recv_json().await, json!({"id": "stopCommunication"}));
    presenter.assert_silent();

    assert!(broadcast.engine.live_pipelines().is_empty());
    assert!(broadcast.engine.live_endpoints().is_empty());

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert_eq!(state.presenter, None);
    assert!(state.viewers.is_empty());
    assert!(!state.has_pipeline);
    assert_eq!(broadcast.metrics.snapshot().viewers, 0);
    assert!(!broadcast.metrics.snapshot().presenter_active);

    // V1 is no longer a viewer and nobody is presenting.
    broadcast.send(&v1, &viewer_frame("O4")).await;
    assert_eq!(v1.recv_json().await["message"], "no active presenter");
}

#[tokio::test]
async fn test_viewer_stop_releases_only_its_endpoint() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let mut v1 = join_viewer(&broadcast, "O2").await;
    let _v2 = join_viewer(&broadcast, "O3").await;
    let v1_endpoint = endpoint_for_offer(&broadcast.engine, "O2");

    broadcast.send(&v1, &stop_frame()).await;

    assert_eq!(broadcast.engine.released(), vec![v1_endpoint.clone()]);
    assert!(!broadcast.engine.is_live(&v1_endpoint));
    assert_eq!(broadcast.engine.live_endpoints().len(), 2);
    v1.assert_silent();

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert_eq!(state.viewer_count(), 1);
    assert!(!state.is_viewer(v1.id()));
}

#[tokio::test]
async fn test_no_candidates_after_release() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let mut viewer = join_viewer(&broadcast, "OV").await;
    let viewer_endpoint = endpoint_for_offer(&broadcast.engine, "OV");

    broadcast.send(&viewer, &stop_frame()).await;

    assert!(!broadcast
        .engine
        .emit_candidate(&viewer_endpoint, local_candidate(&viewer_endpoint, 0)));
    viewer.assert_silent();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let broadcast = TestBroadcast::start();
    let presenter = start_presenter(&broadcast, "O1").await;

    let first = broadcast.coordinator.stop(presenter.id()).await.unwrap();
    let second = broadcast.coordinator.stop(presenter.id()).await.unwrap();

    assert_eq!(first, StopOutcome::Presenter { viewers_notified: 0 });
    assert_eq!(second, StopOutcome::NotRegistered);
    assert_eq!(broadcast.engine.released().len(), 1);
}

#[tokio::test]
async fn test_viewer_stop_is_idempotent() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let viewer = join_viewer(&broadcast, "OV").await;
    let viewer_endpoint = endpoint_for_offer(&broadcast.engine, "OV");

    let first = broadcast.coordinator.stop(viewer.id()).await.unwrap();
    let second = broadcast.coordinator.stop(viewer.id()).await.unwrap();

    assert_eq!(first, StopOutcome::Viewer);
    assert_eq!(second, StopOutcome::NotRegistered);
    assert_eq!(broadcast.engine.released(), vec![viewer_endpoint]);

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert!(state.viewers.is_empty());
    assert_eq!(state.phase, PresenterPhase::Live);
}

#[tokio::test]
async fn test_stop_for_unregistered_channel_is_noop() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let mut stranger = TestPeer::new();

    broadcast.send(&stranger, &stop_frame()).await;

    stranger.assert_silent();
    assert!(broadcast.engine.released().is_empty());
    assert_eq!(
        broadcast.coordinator.get_state().await.unwrap().phase,
        PresenterPhase::Live
    );
}

#[tokio::test]
async fn test_transport_close_stops_presenter() {
    let broadcast = TestBroadcast::start();
    let presenter = start_presenter(&broadcast, "O1").await;
    let mut viewer = join_viewer(&broadcast, "OV").await;

    broadcast.close(&presenter).await;

    assert_eq!(viewer.recv().await, OutboundMessage::StopCommunication);
    assert!(broadcast.engine.live_pipelines().is_empty());
}

#[tokio::test]
async fn test_new_presenter_after_stop() {
    let broadcast = TestBroadcast::start();
    let first = start_presenter(&broadcast, "O1").await;
    broadcast.close(&first).await;

    let second = start_presenter(&broadcast, "O2").await;

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert_eq!(state.presenter, Some(second.id()));
    assert_eq!(broadcast.engine.live_pipelines().len(), 1);
}

#[tokio::test]
async fn test_shutdown_releases_live_pipeline() {
    let broadcast = TestBroadcast::start();
    let _presenter = start_presenter(&broadcast, "O1").await;
    let mut viewer = join_viewer(&broadcast, "OV").await;

    broadcast.coordinator.shutdown().await.unwrap();

    assert_eq!(viewer.recv().await, OutboundMessage::StopCommunication);
    assert!(broadcast.engine.live_pipelines().is_empty());

    // The actor is gone; further requests fail instead of hanging.
    assert!(broadcast.coordinator.get_state().await.is_err());
}

#[tokio::test]
async fn test_engine_lost_notifies_viewers_and_clears_state() {
    let broadcast = TestBroadcast::start();
    let mut presenter = start_presenter(&broadcast, "O1").await;
    let mut v1 = join_viewer(&broadcast, "O2").await;
    let mut v2 = join_viewer(&broadcast, "O3").await;
    presenter.drain();

    let notified = broadcast.coordinator.engine_lost().await.unwrap();

    assert_eq!(notified, 2);
    assert_eq!(v1.recv().await, OutboundMessage::StopCommunication);
    assert_eq!(v2.recv().await, OutboundMessage::StopCommunication);
    presenter.assert_silent();

    let state = broadcast.coordinator.get_state().await.unwrap();
    assert_eq!(state.presenter, None);
    assert_eq!(state.phase, PresenterPhase::Idle);
    assert!(state.viewers.is_empty());
    assert!(!state.has_pipeline);
    assert!(!broadcast.metrics.snapshot().presenter_active);

    // The actor keeps serving requests.
    let _next = start_presenter(&broadcast, "O4").await;
}

#[tokio::test]
async fn test_dropping_every_handle_releases_live_pipeline() {
    let engine = MockMediaEngine::new();
    let media_engine: Arc<dyn MediaEngine> = engine.clone();
    let coordinator = BroadcastCoordinatorHandle::new(media_engine, BroadcastMetrics::new());
    let mut presenter = TestPeer::new();
    coordinator
        .become_presenter(presenter.channel(), "O1".to_string())
        .await
        .unwrap();
    presenter.drain();

    drop(coordinator);

    tokio::time::timeout(Duration::from_secs(2), async {
        while !engine.live_pipelines().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipeline was never released");
    assert_eq!(engine.released().len(), 1);
}
