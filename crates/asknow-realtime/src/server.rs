//! `RealtimeServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use asknow_directory::{IdentityResolver, PendingItems};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::RealtimeConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::ingress::notify_handler;
use crate::registry::ConnectionRegistry;
use crate::router::NotificationRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::lifecycle::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Unicast and broadcast over `registry`.
    pub notifier: Arc<NotificationRouter>,
    /// Resolves user ids at handshake.
    pub identities: Arc<dyn IdentityResolver>,
    /// Pending items replayed to responders on connect.
    pub pending: Arc<dyn PendingItems>,
    /// Server configuration.
    pub config: Arc<RealtimeConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The realtime notification server.
pub struct RealtimeServer {
    config: Arc<RealtimeConfig>,
    registry: Arc<ConnectionRegistry>,
    notifier: Arc<NotificationRouter>,
    identities: Arc<dyn IdentityResolver>,
    pending: Arc<dyn PendingItems>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl RealtimeServer {
    /// Create a new server.
    pub fn new(
        config: RealtimeConfig,
        identities: Arc<dyn IdentityResolver>,
        pending: Arc<dyn PendingItems>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            config: Arc::new(config),
            notifier: Arc::new(NotificationRouter::new(registry.clone())),
            registry,
            identities,
            pending,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    fn state(&self) -> AppState {
        AppState {
            registry: self.registry.clone(),
            notifier: self.notifier.clone(),
            identities: self.identities.clone(),
            pending: self.pending.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/{user_id}", get(ws_handler))
            .route("/api/notify", post(notify_handler))
            .with_state(self.state())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and start serving in the background.
    ///
    /// Returns the bound address and the serve task. The task finishes once
    /// the shutdown token fires and in-flight HTTP requests complete.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "realtime server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
                token.cancelled().await;
            });
            if let Err(e) = serve.await {
                error!(error = %e, "server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the notification router, for in-process event sources.
    pub fn notifier(&self) -> &Arc<NotificationRouter> {
        &self.notifier
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, &state.registry))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
