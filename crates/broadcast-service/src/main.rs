//! Broadcast Signaling Service
//!
//! One presenter, many viewers; media is relayed by Kurento Media Server.
//!
//! # Servers
//!
//! - WebSocket signaling server (default: 0.0.0.0:8443, path `/call`)
//! - HTTP server for health and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Connect to the media engine; readiness follows this connection
//! 6. Spawn the `BroadcastCoordinator` actor
//! 7. Watch the media engine connection; losing it ends the broadcast
//! 8. Start the signaling server
//! 9. Wait for a shutdown signal or engine loss, then release the live
//!    pipeline. Engine loss exits with an error so the process is restarted.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use broadcast_service::actors::{
    watch_engine, BroadcastCoordinatorHandle, BroadcastMetrics, EngineWatchOutcome,
};
use broadcast_service::config::Config;
use broadcast_service::media::{KurentoClient, MediaEngine};
use broadcast_service::observability::{health_router, init_metrics_recorder, HealthState};
use broadcast_service::signaling::SignalingHandler;
use broadcast_service::transport::{signaling_router, SignalingState};
use common::config::LoggingConfig;
use common::secret::ExposeSecret;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to open connections to flush and stop before the pipeline is
/// released.
const DRAIN_PERIOD: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let env_vars: HashMap<String, String> = std::env::vars().collect();
    let logging = LoggingConfig::from_vars("BS", &env_vars);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| logging.default_filter.clone().into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Broadcast Signaling Service");

    // Load configuration
    let config = Config::from_vars(&env_vars).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        signaling_path = %config.signaling_path,
        max_message_size = config.max_message_size,
        channel_buffer = config.channel_buffer,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let root_token = CancellationToken::new();
    let shutdown_token = root_token.child_token();

    // Start health HTTP server first so liveness answers while the engine connects
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Connect to the media engine
    info!("Connecting to media engine...");
    let engine = KurentoClient::connect(config.kms_url.expose_secret(), root_token.child_token())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to media engine");
            e
        })?;
    health_state.set_engine_connected();
    info!("Media engine connection established");

    // Initialize coordinator actor
    let media_engine: Arc<dyn MediaEngine> = Arc::new(engine.clone());
    let coordinator = BroadcastCoordinatorHandle::new(media_engine, BroadcastMetrics::new());
    info!("Broadcast coordinator started");

    // Clear the broadcast and stop if the media engine goes away
    let mut watch_task = tokio::spawn(watch_engine(
        engine.clone(),
        coordinator.clone(),
        Arc::clone(&health_state),
        shutdown_token.child_token(),
    ));

    // Start signaling server
    let bind_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid signaling bind address");
        format!("Invalid signaling bind address: {e}")
    })?;

    let signaling_state = SignalingState::new(
        SignalingHandler::new(coordinator.clone()),
        config.channel_buffer,
        config.max_message_size,
        shutdown_token.child_token(),
    );
    let signaling_app =
        signaling_router(&config.signaling_path, signaling_state).layer(TraceLayer::new_for_http());

    let signaling_listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %bind_addr, "Failed to bind signaling server");
            format!("Failed to bind signaling server to {bind_addr}: {e}")
        })?;

    let signaling_shutdown_token = shutdown_token.child_token();
    let signaling_path = config.signaling_path.clone();
    let signaling_task = tokio::spawn(async move {
        info!(addr = %bind_addr, path = %signaling_path, "Signaling server starting");
        let server = axum::serve(signaling_listener, signaling_app).with_graceful_shutdown(
            async move {
                signaling_shutdown_token.cancelled().await;
                info!("Signaling server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    // Wait for a shutdown signal or the loss of the media engine
    info!("Broadcast Signaling Service running - press Ctrl+C to shutdown");
    let engine_lost = tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
            false
        }
        outcome = &mut watch_task => {
            if let Ok(EngineWatchOutcome::EngineLost { viewers_notified }) = outcome {
                error!(viewers_notified, "Media engine lost, shutting down for restart");
            }
            true
        }
    };

    // Mark as not ready immediately so load balancers stop sending traffic
    health_state.set_draining();

    // Closes open connections; each one stops its session on the way out
    shutdown_token.cancel();

    if tokio::time::timeout(DRAIN_PERIOD, signaling_task).await.is_err() {
        warn!("Signaling server did not stop within the drain period");
    }

    // Release the live pipeline, if any
    if let Err(e) = coordinator.shutdown().await {
        warn!(error = %e, "Coordinator shutdown error");
    }

    engine.close();
    root_token.cancel();
    let _ = health_task.await;

    if engine_lost {
        return Err("Media engine connection lost".into());
    }

    info!("Broadcast Signaling Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
