//! Gateway HTTP server: session management API over the registry.

use crate::config::{self, Config, RelaySettings};
use crate::gateway::protocol::{ApiError, CreateSessionRequest, CreatedView, SendRequest, SessionView};
use crate::init;
use crate::sessions::{validate_session_id, SessionRegistry};
use crate::transport::{BridgeConnector, Connector};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: SessionRegistry,
    /// Port reported by the health endpoint.
    pub port: u16,
    /// When Some, every /api request must carry `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
}

/// When auth mode is token and a token is configured, returns it for request validation.
fn require_api_token(config: &Config) -> Option<String> {
    if config.gateway.auth.mode == config::GatewayAuthMode::Token {
        config::resolve_gateway_token(config)
    } else {
        None
    }
}

/// Build the HTTP router: `GET /` health plus the `/api` session routes.
pub fn router(state: GatewayState) -> Router {
    let api = Router::new()
        .route("/sessions", get(list_sessions))
        .route(
            "/session/:id",
            post(create_session).get(get_session).delete(delete_session),
        )
        .route("/session/:id/send", post(send_message))
        .route("/session/:id/qr", get(pairing_code))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/", get(health_http))
        .nest("/api", api)
        .with_state(state)
}

/// Run the gateway against the WebSocket bridge configured under `bridge`.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let connector = BridgeConnector::new(
        config::resolve_bridge_url(&config),
        config::resolve_bridge_token(&config),
    );
    run_gateway_with(config, config_path, Arc::new(connector)).await
}

/// Run the gateway with an explicit transport connector.
/// When bind is not loopback, a gateway token must be configured or startup fails.
/// Requires the configuration directory to be initialized (`relay init`).
pub async fn run_gateway_with(
    config: Config,
    config_path: PathBuf,
    connector: Arc<dyn Connector>,
) -> Result<()> {
    init::require_initialized(&config_path, &config)?;
    let bind = config.gateway.bind.trim();
    if !config::is_loopback_bind(bind) {
        let token = config::resolve_gateway_token(&config);
        if token.is_none() || config.gateway.auth.mode != config::GatewayAuthMode::Token {
            anyhow::bail!(
                "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or RELAY_GATEWAY_TOKEN)",
                bind
            );
        }
    }

    let settings = RelaySettings::from_config(&config);
    log::info!(
        "relaying to {} by default, state under {}",
        settings.default_endpoint,
        config::resolve_data_dir(&config).display()
    );
    let registry = SessionRegistry::new(settings, connector);
    let state = GatewayState {
        registry: registry.clone(),
        port: config.gateway.port,
        required_token: require_api_token(&config),
    };
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Cancels reconnect timers and closes every transport; persisted state is kept.
async fn shutdown_signal(registry: SessionRegistry) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, closing sessions");
    registry.shutdown().await;
}

async fn require_token(State(state): State<GatewayState>, req: Request, next: Next) -> Response {
    if let Some(ref expected) = state.required_token {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or("");
        if provided != expected.as_str() {
            return ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid bearer token")
                .into_response();
        }
    }
    next.run(req).await
}

/// GET / returns a simple health JSON.
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
        "sessions": state.registry.list().await.len(),
    }))
}

/// GET /api/sessions
async fn list_sessions(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({ "sessions": state.registry.list().await }))
}

/// POST /api/session/:id: store the routing config (if any) and create the session.
async fn create_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<CreatedView>, ApiError> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?
    };
    let session = state
        .registry
        .create_session(&id, request.into_config())
        .await?;
    Ok(Json(CreatedView {
        message: "session created".to_string(),
        id: session.id().to_string(),
        status: session.status().await,
    }))
}

/// GET /api/session/:id
async fn get_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    validate_session_id(&id)?;
    let session = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("session not found: {}", id)))?;
    Ok(Json(SessionView {
        id: session.id().to_string(),
        status: session.status().await,
        endpoint: session.endpoint().to_string(),
    }))
}

/// DELETE /api/session/:id
async fn delete_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = state.registry.delete(&id).await?;
    Ok(Json(json!({ "removed": removed })))
}

/// POST /api/session/:id/send
async fn send_message(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request: SendRequest = serde_json::from_slice(&body).unwrap_or_default();
    let (Some(to), Some(message)) = (
        request.to.filter(|s| !s.trim().is_empty()),
        request.message.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::bad_request("to and message are required"));
    };
    validate_session_id(&id)?;
    state.registry.send_text(&id, &to, &message).await?;
    Ok(Json(json!({ "sent": true })))
}

/// GET /api/session/:id/qr
async fn pairing_code(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_session_id(&id)?;
    match state.registry.pairing_code(&id).await {
        Some(qr) => Ok(Json(json!({ "qr": qr }))),
        None => Err(ApiError::not_found("qr code not found or already scanned")),
    }
}
