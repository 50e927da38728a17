//! `ChorusServer`: Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chorus_store::{IdentityLookup, ListenerStore};
use futures::StreamExt;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_UPGRADES_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::ConnectionRegistry;
use crate::websocket::gateway::ListenerGateway;
use crate::websocket::handler::MessageHandler;
use crate::websocket::session::{SessionContext, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Per-connection dependencies.
    pub session: Arc<SessionContext>,
    /// Upgrade authentication.
    pub auth: Arc<dyn Authenticator>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum inbound message size.
    pub max_message_size: usize,
}

/// The main chorus server.
pub struct ChorusServer {
    config: ServerConfig,
    session: Arc<SessionContext>,
    auth: Arc<dyn Authenticator>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl ChorusServer {
    /// Create a new server over the given collaborators.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ListenerStore>,
        identity: Arc<dyn IdentityLookup>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(ListenerGateway::new(store, registry.clone()));
        let handler = Arc::new(MessageHandler::new(gateway, identity, registry.clone()));
        let session = Arc::new(SessionContext {
            registry,
            handler,
            config: config.session_config(),
            shutdown: shutdown.token(),
        });
        Self {
            config,
            session,
            auth,
            metrics: None,
            shutdown,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: self.session.clone(),
            auth: self.auth.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in a background task until shutdown.
    ///
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%local_addr, "chorus server listening");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server terminated with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.session.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = &state.session.registry;
    let connections = registry.connection_count().await;
    let active_tracks = registry.active_tracks().await;
    let draining = state.session.shutdown.is_cancelled();
    Json(health::health_check(
        state.start_time,
        connections,
        active_tracks,
        draining,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(ref handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws: authenticate, then upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let query_token = query
        .as_ref()
        .ok()
        .and_then(|q| q.get("token"))
        .map(String::as_str);
    let username = match state.auth.authenticate(&headers, query_token) {
        Ok(username) => username,
        Err(e) => {
            debug!(error = %e, "rejecting unauthenticated upgrade");
            counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "unauthorized").increment(1);
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"}))).into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    if state.session.registry.connection_count().await >= state.max_connections
        && state.session.registry.get(&username).await.is_none()
    {
        warn!(username, max = state.max_connections, "connection limit reached");
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "too many connections"})),
        )
            .into_response();
    }

    let session = state.session.clone();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            run_ws_session(sink, stream, username, session).await;
        })
}
