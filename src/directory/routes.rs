//! Directory HTTP route definitions

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::debug;

use super::service::{Directory, DirectorySummary};
use crate::protocol::{
    Ack, ConnectReply, ConnectRequest, KvGetReply, KvGetRequest, KvPutReply, KvPutRequest,
    NodesReply, PeerIdRequest, PeerNetSettings, RegisterRequest, Rejection,
};
use crate::util::time::uptime_secs;

/// Build the directory router
///
/// `request_timeout` bounds whole requests; KV calls may try several holders
/// so it should exceed the per-call RPC timeout.
pub fn build_router(directory: Arc<Directory>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/register", post(register_handler))
        .route("/connect", post(connect_handler))
        .route("/disconnect", post(disconnect_handler))
        .route("/nodes", post(nodes_handler))
        .route("/failure", post(failure_handler))
        .route("/recovery", post(recovery_handler))
        .route("/kv/get", post(kv_get_handler))
        .route("/kv/put", post(kv_put_handler))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(directory)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    #[serde(flatten)]
    peers: DirectorySummary,
}

async fn health_handler(State(directory): State<Arc<Directory>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        peers: directory.summary(),
    })
}

// ============================================================================
// Session membership endpoints
// ============================================================================

async fn register_handler(
    State(directory): State<Arc<Directory>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<PeerNetSettings>, Rejection> {
    directory
        .register(&req.display_name, req.peer_id)
        .map(Json)
}

async fn connect_handler(
    State(directory): State<Arc<Directory>>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ConnectReply>, Rejection> {
    directory.connect(req).map(Json)
}

async fn disconnect_handler(
    State(directory): State<Arc<Directory>>,
    Json(req): Json<PeerIdRequest>,
) -> Result<Json<Ack>, Rejection> {
    directory.disconnect(req.peer_id)?;
    Ok(Json(Ack::OK))
}

async fn nodes_handler(
    State(directory): State<Arc<Directory>>,
    Json(req): Json<PeerIdRequest>,
) -> Result<Json<NodesReply>, Rejection> {
    let peers = directory.get_nodes(req.peer_id)?;
    debug!(peer_id = req.peer_id, count = peers.len(), "Served node list");
    Ok(Json(NodesReply { peers }))
}

async fn failure_handler(
    State(directory): State<Arc<Directory>>,
    Json(req): Json<PeerIdRequest>,
) -> Result<Json<Ack>, Rejection> {
    directory.notify_failure(req.peer_id)?;
    Ok(Json(Ack::OK))
}

async fn recovery_handler(
    State(directory): State<Arc<Directory>>,
    Json(req): Json<PeerIdRequest>,
) -> Result<Json<Ack>, Rejection> {
    directory.notify_recovery(req.peer_id).await?;
    Ok(Json(Ack::OK))
}

// ============================================================================
// Stats endpoints
// ============================================================================

async fn kv_get_handler(
    State(directory): State<Arc<Directory>>,
    Json(req): Json<KvGetRequest>,
) -> Result<Json<KvGetReply>, Rejection> {
    directory.kv_get(req.key, req.requester).await.map(Json)
}

async fn kv_put_handler(
    State(directory): State<Arc<Directory>>,
    Json(req): Json<KvPutRequest>,
) -> Result<Json<KvPutReply>, Rejection> {
    directory.kv_put(req.key, req.value).await.map(Json)
}
