//! Peer HTTP route definitions

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::handlers::PeerService;
use crate::protocol::{
    Ack, FailureNotice, HeartbeatRequest, KvClientGetRequest, KvPutRequest, PeerInfo, Rejection,
    SetOffsetRequest, Stats, TimeReply,
};
use crate::util::time::nanos_to_duration;

/// Build the router serving a peer's RPC surface
pub fn build_router(service: Arc<PeerService>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/time", get(time_handler))
        .route("/ping", get(ping_handler))
        .route("/offset", post(offset_handler))
        .route("/heartbeat", post(heartbeat_handler))
        .route("/peers", post(register_peer_handler))
        .route("/failure", post(failure_handler))
        .route("/kv/get", post(kv_get_handler))
        .route("/kv/put", post(kv_put_handler))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

// ============================================================================
// Clock and liveness
// ============================================================================

async fn time_handler(State(service): State<Arc<PeerService>>) -> Json<TimeReply> {
    Json(service.time())
}

async fn ping_handler() -> Json<Ack> {
    Json(Ack::OK)
}

async fn offset_handler(
    State(service): State<Arc<PeerService>>,
    Json(req): Json<SetOffsetRequest>,
) -> Json<Ack> {
    service.set_offset(nanos_to_duration(req.offset_nanos));
    Json(Ack::OK)
}

async fn heartbeat_handler(
    State(service): State<Arc<PeerService>>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<Ack> {
    service.heartbeat(req.from);
    Json(Ack::OK)
}

// ============================================================================
// Membership
// ============================================================================

async fn register_peer_handler(
    State(service): State<Arc<PeerService>>,
    Json(peer): Json<PeerInfo>,
) -> Result<Json<Ack>, Rejection> {
    service.register_peer(&peer)?;
    Ok(Json(Ack::OK))
}

async fn failure_handler(
    State(service): State<Arc<PeerService>>,
    Json(notice): Json<FailureNotice>,
) -> Json<Ack> {
    service.notify_failure(notice).await;
    Json(Ack::OK)
}

// ============================================================================
// Stats replicas
// ============================================================================

async fn kv_get_handler(
    State(service): State<Arc<PeerService>>,
    Json(req): Json<KvClientGetRequest>,
) -> Result<Json<Stats>, Rejection> {
    service.kv_get(req.key).map(Json)
}

async fn kv_put_handler(
    State(service): State<Arc<PeerService>>,
    Json(req): Json<KvPutRequest>,
) -> Result<Json<Ack>, Rejection> {
    service.kv_put(req.key, req.value)?;
    Ok(Json(Ack::OK))
}
