//! Router assembly and the inactive-node gate.

use std::sync::Arc;

use axum::extract::{Extension, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use super::client::HttpTransport;
use super::handlers;
use super::protocol::{
    ENDPOINT_JOIN, ENDPOINT_LEAVE, ENDPOINT_NETWORK, ENDPOINT_NODE_INFO, ENDPOINT_PING,
    ENDPOINT_PREDECESSOR, ENDPOINT_SIM_CRASH, ENDPOINT_SIM_RECOVER, ENDPOINT_STORAGE,
    ENDPOINT_SUCCESSOR,
};
use crate::node::Node;

/// Builds the full HTTP surface for one node: the client-facing storage and
/// control endpoints plus the peer RPC endpoints, all behind the
/// inactive-node gate.
pub fn router(node: Arc<Node>, transport: Arc<HttpTransport>) -> Router {
    Router::new()
        .route(
            &format!("{ENDPOINT_STORAGE}/:key"),
            get(handlers::handle_storage_get).put(handlers::handle_storage_put),
        )
        .route(
            ENDPOINT_NETWORK,
            get(handlers::handle_network_walk).put(handlers::handle_network_bootstrap),
        )
        .route(ENDPOINT_NODE_INFO, get(handlers::handle_node_info))
        .route(ENDPOINT_JOIN, post(handlers::handle_join))
        .route(ENDPOINT_LEAVE, post(handlers::handle_leave))
        .route(ENDPOINT_SIM_CRASH, post(handlers::handle_sim_crash))
        .route(ENDPOINT_SIM_RECOVER, post(handlers::handle_sim_recover))
        .route(ENDPOINT_PING, get(handlers::handle_ping))
        .route(
            ENDPOINT_PREDECESSOR,
            get(handlers::handle_predecessor_get)
                .put(handlers::handle_predecessor_notify)
                .post(handlers::handle_predecessor_set),
        )
        .route(
            ENDPOINT_SUCCESSOR,
            get(handlers::handle_successor_get).put(handlers::handle_successor_set),
        )
        .layer(middleware::from_fn(inactive_gate))
        .layer(Extension(node))
        .layer(Extension(transport))
}

/// Refuses every request with 503 while the node is in its simulated-crash
/// state. Only the recovery endpoint passes through.
async fn inactive_gate(
    Extension(node): Extension<Arc<Node>>,
    request: Request,
    next: Next,
) -> Response {
    if !node.is_active() && request.uri().path() != ENDPOINT_SIM_RECOVER {
        return (StatusCode::SERVICE_UNAVAILABLE, "service unavailable").into_response();
    }
    next.run(request).await
}
