//! HTTP Handlers
//!
//! JSON command surface over the panel core.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use wgpanel_core::{
    CredentialVault, DaemonReporter, ErrorKind, ExportOptions, MetricsFeed, NewPeer, PanelError,
    Peer, PeerRegistry, ProtonVpnCredentials, Relay, ServiceController, ServiceState,
    ServiceStatus, TunnelHealth, render_client_config,
};

use crate::storage::StateStore;

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<PeerRegistry>,
    pub controller: Arc<ServiceController>,
    pub vault: Arc<CredentialVault>,
    pub metrics: MetricsFeed,
    pub reporter: DaemonReporter,
    pub export: ExportOptions,
    /// `None` keeps everything in memory
    pub store: Option<Arc<StateStore>>,
}

impl AppState {
    /// Write current state to disk. Failures are logged; the in-memory
    /// state stays authoritative.
    async fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_all(&self.registry, &self.vault).await {
                tracing::error!("Failed to persist state: {}", e);
            }
        }
    }
}

/// Build the router with all routes and layers
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/peers", get(list_peers_handler).post(add_peer_handler))
        .route("/peers/{id}", get(get_peer_handler).delete(remove_peer_handler))
        .route("/peers/{id}/config", get(peer_config_handler))
        .route("/service/start", post(start_handler))
        .route("/service/stop", post(stop_handler))
        .route("/service/restart", post(restart_handler))
        .route(
            "/credentials",
            get(get_credentials_handler)
                .put(save_credentials_handler)
                .delete(clear_credentials_handler),
        )
        .route("/relays/fetch", post(fetch_relays_handler))
        .route("/daemon/activity", post(daemon_activity_handler))
        .route("/daemon/health", post(daemon_health_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
}

/// Panel error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(PanelError);

impl<E> From<E> for ApiError
where
    E: Into<PanelError>,
{
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::DuplicateId | ErrorKind::DuplicatePublicKey | ErrorKind::DuplicateAddress => {
            StatusCode::CONFLICT
        }
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidId | ErrorKind::InvalidPublicKey | ErrorKind::InvalidAllowedIps => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::ServiceStartFailed | ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        ErrorKind::NoCredentials => StatusCode::PRECONDITION_FAILED,
        ErrorKind::Interrupted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);

        if status.is_server_error() {
            tracing::warn!("{:?} failed: {}", kind, self.0);
        } else {
            tracing::debug!("Rejected request ({:?}): {}", kind, self.0);
        }

        let body = ErrorResponse {
            error: self.0.to_string(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}

/// Service command response
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub state: ServiceState,
}

/// What the settings form gets back; never the password
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsView {
    pub username: Option<String>,
    pub has_password: bool,
}

/// Activity report from the tunnel daemon
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityReport {
    pub peer_id: String,
    pub bytes: u64,
}

/// Health report from the tunnel daemon
#[derive(Debug, Deserialize)]
pub struct HealthReport {
    pub health: TunnelHealth,
}

/// GET /health - Liveness probe
pub async fn health_handler() -> &'static str {
    "OK"
}

/// GET /status - Computed service status
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(state.metrics.status().await)
}

/// GET /peers
pub async fn list_peers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Peer>> {
    Json(state.registry.list().await)
}

/// POST /peers - Register a peer
///
/// An empty or missing `publicKey` is replaced with a generated one.
pub async fn add_peer_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewPeer>,
) -> Result<impl IntoResponse, ApiError> {
    let peer = state.registry.add(request.with_generated_key()).await?;
    state.persist().await;

    Ok((StatusCode::CREATED, Json(peer)))
}

/// GET /peers/{id}
pub async fn get_peer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Peer>, ApiError> {
    Ok(Json(state.registry.get(&id).await?))
}

/// DELETE /peers/{id}
pub async fn remove_peer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.remove(&id).await?;
    state.persist().await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /peers/{id}/config - Client configuration as plain text
pub async fn peer_config_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let peer = state.registry.get(&id).await?;
    let config = render_client_config(&peer, &state.export);

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.conf\"", config_file_stem(&peer.id)),
            ),
        ],
        config,
    )
        .into_response())
}

/// File name for an exported config: header-safe characters only
fn config_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();

    if stem.trim_matches('.').is_empty() {
        "peer".to_string()
    } else {
        stem
    }
}

/// POST /service/start
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ServiceResponse>, ApiError> {
    let current = state.controller.start().await?;
    Ok(Json(ServiceResponse { state: current }))
}

/// POST /service/stop
pub async fn stop_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ServiceResponse>, ApiError> {
    let current = state.controller.stop().await?;
    Ok(Json(ServiceResponse { state: current }))
}

/// POST /service/restart
pub async fn restart_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ServiceResponse>, ApiError> {
    let current = state.controller.restart().await?;
    Ok(Json(ServiceResponse { state: current }))
}

/// GET /credentials
pub async fn get_credentials_handler(State(state): State<Arc<AppState>>) -> Json<CredentialsView> {
    let stored = state.vault.get().await;

    Json(CredentialsView {
        has_password: stored.as_ref().is_some_and(|c| !c.password.is_empty()),
        username: stored.map(|c| c.username),
    })
}

/// PUT /credentials - Replace the provider credentials
pub async fn save_credentials_handler(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<ProtonVpnCredentials>,
) -> StatusCode {
    state.vault.save(credentials).await;
    state.persist().await;

    StatusCode::NO_CONTENT
}

/// DELETE /credentials
pub async fn clear_credentials_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.vault.clear().await {
        tracing::info!("Cleared provider credentials");
        state.persist().await;
    }

    StatusCode::NO_CONTENT
}

/// POST /relays/fetch - Discover and rank upstream relays
pub async fn fetch_relays_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Relay>>, ApiError> {
    Ok(Json(state.vault.fetch_relays().await?))
}

/// POST /daemon/activity
///
/// Queued for the adapter task; 503 when the queue is full.
pub async fn daemon_activity_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<ActivityReport>,
) -> StatusCode {
    if state.reporter.activity(report.peer_id, report.bytes) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// POST /daemon/health
pub async fn daemon_health_handler(
    State(state): State<Arc<AppState>>,
    Json(report): Json<HealthReport>,
) -> StatusCode {
    if state.reporter.health(report.health) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
