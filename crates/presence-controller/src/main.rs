//! Presence Controller
//!
//! Stateful WebSocket coordination server for real-time meeting presence.
//!
//! # Servers
//!
//! A single HTTP listener (default: 0.0.0.0:8080) serves:
//! - `GET /ws` - WebSocket upgrade for client presence traffic
//! - `GET /health`, `GET /ready` - Kubernetes probes
//! - `GET /metrics` - Prometheus text format
//!
//! # Architecture
//!
//! Uses an actor model hierarchy:
//! - `PresenceCoordinatorActor` (singleton): Supervises rooms and connections
//! - `RoomActor` (per meeting): Owns the roster
//! - `ConnectionActor` (per connection): Delivers events to one client
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Initialize Redis-backed meeting directory
//! 4. Initialize actor system (`PresenceCoordinatorActorHandle`)
//! 5. Bind the listener, then mark ready
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::secret::ExposeSecret;
use metrics_exporter_prometheus::PrometheusBuilder;
use presence_controller::actors::{CoordinatorMetrics, PresenceCoordinatorActorHandle};
use presence_controller::config::Config;
use presence_controller::directory::RedisMeetingDirectory;
use presence_controller::gateway;
use presence_controller::observability::{health_router, HealthState};
use presence_controller::service::PresenceService;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "presence_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Presence Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        pc_id = %config.pc_id,
        bind_address = %config.bind_address,
        default_max_participants = config.default_max_participants,
        shutdown_deadline_seconds = config.shutdown_deadline_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Initialize the Redis-backed meeting directory
    info!("Connecting to Redis...");
    let directory = RedisMeetingDirectory::new(
        config.redis_url.expose_secret(),
        config.default_max_participants,
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to connect to Redis");
        e
    })?;
    let directory = Arc::new(directory);
    info!("Redis connection established");

    // Initialize actor system
    info!("Initializing actor system...");
    let coordinator_metrics = CoordinatorMetrics::new();
    let coordinator = PresenceCoordinatorActorHandle::new(
        config.pc_id.clone(),
        directory.clone(),
        Arc::clone(&coordinator_metrics),
    );
    info!("Actor system initialized");

    let service = PresenceService::new(coordinator.clone(), directory);

    // Build the combined router: WebSocket gateway, probes, metrics
    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    // TraceLayer - log request details
    let app = gateway::router(service)
        .merge(health_router(Arc::clone(&health_state), coordinator.clone()))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE marking ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        format!("Failed to bind listener to {addr}: {e}")
    })?;
    info!(addr = %addr, "Listener bound successfully");

    health_state.set_ready();

    let server_shutdown_token = coordinator.child_token();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown_token.cancelled().await;
        info!("Server shutting down");
    });

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(error = %e, "Server failed");
        }
    });
    info!(addr = %addr, "Presence Controller running - press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    // Shutdown actor system; its root token also stops the server
    if let Err(e) = coordinator
        .shutdown(Duration::from_secs(config.shutdown_deadline_seconds))
        .await
    {
        warn!(error = %e, "Actor system shutdown error");
    }

    if let Err(e) = server_task.await {
        warn!(error = %e, "Server task join error");
    }

    info!("Presence Controller shutdown complete");
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
