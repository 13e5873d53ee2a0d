//! Concord server library.
//!
//! Provides a reusable serve function wiring storage, provider adapters,
//! the tool registry, the consensus engine and the realtime layer into one
//! axum application, for the binary and for integration tests.

mod api;
mod auth;
mod coordinator;
mod delivery;
mod error;
mod ws;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::anyhow;
use axum::{Json, Router, routing::get, routing::post};
use config::Config;
use consensus::{ConsensusEngine, ContextBuilder, EngineOptions, ToolLoop};
use llm::{ModelCatalog, ProviderSet};
use storage::SharedRepository;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tools::ToolRegistry;
use tower_http::cors::CorsLayer;

pub use auth::TokenAuthority;
pub use coordinator::{APOLOGY, DriveConnector, PostMessage, SessionCoordinator, parse_session_id};
pub use delivery::{DeliveryHub, EventPayload, ProcessingPhase, SessionEvent};
pub use error::ApiError;

/// Shared application state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// The session coordinator.
    pub coordinator: Arc<SessionCoordinator>,
    /// The repository.
    pub repository: SharedRepository,
    /// Token signing and validation.
    pub auth: TokenAuthority,
    /// Realtime delivery hub.
    pub delivery: Arc<DeliveryHub>,
    /// Drive facade factory, when installed.
    pub drive: Option<Arc<dyn DriveConnector>>,
    /// Whether Google OAuth credentials are configured.
    pub google_configured: bool,
}

/// Configuration for serving Concord.
pub struct ServeConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,
    /// The deserialized configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Optional oneshot sender for the bound address (useful with port 0).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
    /// Drive facade factory; `None` leaves Drive tools returning
    /// an authorization error until a connector is installed.
    pub drive: Option<Arc<dyn DriveConnector>>,
}

/// Build application state from configuration and a repository.
///
/// Exposed separately so tests can assemble a server around an in-memory
/// repository and fake providers.
pub fn build_state(
    config: &Config,
    repository: SharedRepository,
    drive: Option<Arc<dyn DriveConnector>>,
) -> anyhow::Result<AppState> {
    let providers = Arc::new(ProviderSet::from_config(&config.llm));
    build_state_with_providers(config, repository, drive, providers)
}

/// [`build_state`] with an explicit provider set, for tests installing
/// fakes.
pub fn build_state_with_providers(
    config: &Config,
    repository: SharedRepository,
    drive: Option<Arc<dyn DriveConnector>>,
    providers: Arc<ProviderSet>,
) -> anyhow::Result<AppState> {
    let secret = config
        .auth
        .jwt_secret
        .as_ref()
        .ok_or_else(|| anyhow!("JWT_SECRET_KEY is required"))?;

    let auth = TokenAuthority::new(secret, config.auth.token_ttl_secs);

    let catalog = Arc::new(ModelCatalog::for_config(&config.llm));

    let tool_deadline = Duration::from_secs(config.llm.tool_loop.call_deadline_secs);
    let mut registry = ToolRegistry::with_limits(4, tool_deadline);
    for tool in tools::drive_tools() {
        registry.register(tool);
    }
    let registry = Arc::new(registry);

    let tool_loop = ToolLoop::new(registry.clone(), config.llm.tool_loop.max_iterations, tool_deadline);

    let engine = Arc::new(ConsensusEngine::new(
        providers,
        catalog,
        registry,
        tool_loop,
        EngineOptions::from_config(config),
    ));

    let delivery = Arc::new(DeliveryHub::new());

    let coordinator = SessionCoordinator::new(
        repository.clone(),
        engine,
        ContextBuilder::new(config.context.clone()),
        delivery.clone(),
        drive.clone(),
        config.google.require_approval,
        Duration::from_secs(config.google.approval_ttl_secs),
    );

    Ok(AppState {
        coordinator,
        repository,
        auth,
        delivery,
        drive,
        google_configured: config.google.is_configured(),
    })
}

/// The complete application router.
pub fn router(state: AppState, config: &Config) -> Router {
    let mut router = Router::new()
        .route("/api/auth/login", post(api::login))
        .route("/api/chat/message", post(api::post_chat_message))
        .route("/api/chat/sessions", get(api::list_sessions))
        .route("/api/chat/sessions/{id}/messages", get(api::session_messages))
        .route("/api/chat/sessions/{id}/cancel", post(api::cancel_session))
        .route("/api/models", get(api::list_models))
        .route("/api/files", get(api::list_files))
        .route("/api/files/{id}/content", get(api::file_content))
        .route("/api/google/status", get(api::google_status))
        .route("/api/approvals", get(api::list_approvals))
        .route("/api/approvals/{id}/decide", post(api::decide_approval))
        .route("/ws", get(ws::ws_handler));

    if config.server.health.enabled {
        router = router.route(&config.server.health.path, get(health));
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Starts and runs the Concord server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        bound_addr_sender,
        drive,
    }: ServeConfig,
) -> anyhow::Result<()> {
    config.validate()?;

    let repository = storage::open(&config.storage.database())
        .map_err(|e| anyhow!("failed to open storage: {e}"))?;

    let state = build_state(&config, repository, drive)?;

    let active_models = state.coordinator.catalog().active().count();
    log::info!("serving {active_models} active models");

    let app = router(state, &config);

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("failed to bind to {listen_address}: {e}"))?;

    let bound = listener.local_addr()?;

    if let Some(sender) = bound_addr_sender {
        sender.send(bound).map_err(|_| anyhow!("bound address receiver dropped"))?;
    }

    log::info!("HTTP endpoint: http://{bound}/api");
    log::info!("WebSocket endpoint: ws://{bound}/ws");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.map_err(|e| anyhow!("server failed: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}
