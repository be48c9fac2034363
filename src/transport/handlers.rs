//! HTTP Handlers
//!
//! Translates the client and peer endpoints into node operations. Storage
//! requests that belong to another node are forwarded verbatim and the
//! peer's response is relayed unchanged, so forwarding stays invisible to
//! the client.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::Method;
use tracing::{error, info, warn};

use super::client::HttpTransport;
use super::protocol::{JoinQuery, NetworkQuery, NodeInfo, SuccessorQuery};
use crate::node::{self, GetOutcome, Node, PutOutcome};

/// Relays a forwarded peer response, mapping transport failure to a 5xx.
fn relay(result: anyhow::Result<(reqwest::StatusCode, Vec<u8>)>, target: &str) -> Response {
    match result {
        Ok((status, body)) => {
            let status = StatusCode::from_u16(status.as_u16())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, body).into_response()
        }
        Err(e) => {
            error!("failed to forward storage request to '{target}': {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to forward request: {e}"),
            )
                .into_response()
        }
    }
}

pub async fn handle_storage_get(
    Extension(node): Extension<Arc<Node>>,
    Extension(transport): Extension<Arc<HttpTransport>>,
    Path(key): Path<String>,
) -> Response {
    match node.get(&key) {
        GetOutcome::Value(value) => (StatusCode::OK, value).into_response(),
        GetOutcome::NotFound => (StatusCode::NOT_FOUND, "key not found").into_response(),
        GetOutcome::Forward(next) => {
            info!("forwarding GET /storage/{key} to '{next}'");
            relay(
                transport.forward_storage(&next, &key, Method::GET, None).await,
                &next,
            )
        }
    }
}

pub async fn handle_storage_put(
    Extension(node): Extension<Arc<Node>>,
    Extension(transport): Extension<Arc<HttpTransport>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    match node.put(&key, body.to_vec()) {
        PutOutcome::Stored => StatusCode::OK.into_response(),
        PutOutcome::Forward(next) => {
            info!("forwarding PUT /storage/{key} to '{next}'");
            relay(
                transport
                    .forward_storage(&next, &key, Method::PUT, Some(body.to_vec()))
                    .await,
                &next,
            )
        }
    }
}

/// Walks the ring clockwise, collecting every member address. Each node adds
/// itself and asks its successor to continue until the walk reaches the
/// origin again.
pub async fn handle_network_walk(
    Extension(node): Extension<Arc<Node>>,
    Extension(transport): Extension<Arc<HttpTransport>>,
    Query(params): Query<NetworkQuery>,
) -> Response {
    let origin = params.origin.unwrap_or_else(|| node.addr());
    let mut members = vec![node.addr()];

    let successor = node.successor();
    if successor.addr != origin && successor.addr != node.addr() {
        match transport.fetch_network(&successor.addr, &origin).await {
            Ok(rest) => members.extend(rest),
            Err(e) => warn!("network walk stopped at '{}': {e}", successor.addr),
        }
    }

    Json(members).into_response()
}

/// Bootstrap: installs the given membership list as the initial topology.
pub async fn handle_network_bootstrap(
    Extension(node): Extension<Arc<Node>>,
    Query(params): Query<NetworkQuery>,
) -> Response {
    let members: Vec<String> = params
        .network
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .collect();

    if members.is_empty() {
        return (StatusCode::BAD_REQUEST, "network list is required").into_response();
    }

    node.set_network(&members);
    StatusCode::OK.into_response()
}

pub async fn handle_node_info(Extension(node): Extension<Arc<Node>>) -> Json<NodeInfo> {
    Json(NodeInfo {
        node_hash: node.id().to_string(),
        successor: node.successor().addr,
        predecessor: node.predecessor().map(|p| p.addr).unwrap_or_default(),
        others: node.finger_addrs(),
    })
}

pub async fn handle_join(
    Extension(node): Extension<Arc<Node>>,
    Extension(transport): Extension<Arc<HttpTransport>>,
    Query(params): Query<JoinQuery>,
) -> Response {
    let Some(nprime) = params.nprime.filter(|addr| !addr.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "nprime is required").into_response();
    };

    match node::join(&node, transport.as_ref(), &nprime).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!("join via '{nprime}' failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to join: {e}")).into_response()
        }
    }
}

pub async fn handle_leave(
    Extension(node): Extension<Arc<Node>>,
    Extension(transport): Extension<Arc<HttpTransport>>,
) -> Response {
    node::leave(&node, transport.as_ref()).await;
    StatusCode::OK.into_response()
}

pub async fn handle_sim_crash(Extension(node): Extension<Arc<Node>>) -> Response {
    info!("simulated crash requested");
    node.set_active(false);
    StatusCode::OK.into_response()
}

pub async fn handle_sim_recover(Extension(node): Extension<Arc<Node>>) -> Response {
    info!("recovering from simulated crash");
    node.set_active(true);
    StatusCode::OK.into_response()
}

pub async fn handle_ping(Extension(node): Extension<Arc<Node>>) -> String {
    node.addr()
}

pub async fn handle_predecessor_get(Extension(node): Extension<Arc<Node>>) -> Json<String> {
    Json(node.predecessor().map(|p| p.addr).unwrap_or_default())
}

/// PUT /predecessor is notify: a hint, gated by the interval check.
pub async fn handle_predecessor_notify(
    Extension(node): Extension<Arc<Node>>,
    Json(predecessor): Json<String>,
) -> Response {
    node.notify(&predecessor);
    StatusCode::OK.into_response()
}

/// POST /predecessor is the authoritative update used during leave.
pub async fn handle_predecessor_set(
    Extension(node): Extension<Arc<Node>>,
    Json(predecessor): Json<String>,
) -> Response {
    node.set_predecessor(&predecessor);
    StatusCode::OK.into_response()
}

pub async fn handle_successor_get(
    Extension(node): Extension<Arc<Node>>,
    Extension(transport): Extension<Arc<HttpTransport>>,
    Query(params): Query<SuccessorQuery>,
) -> Response {
    let Some(key) = params.key else {
        return (StatusCode::BAD_REQUEST, "key is required").into_response();
    };
    let key_id: u64 = match key.parse() {
        Ok(id) => id,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid key format").into_response(),
    };

    Json(node.find_successor(transport.as_ref(), key_id).await).into_response()
}

pub async fn handle_successor_set(
    Extension(node): Extension<Arc<Node>>,
    Json(successor): Json<String>,
) -> Response {
    if successor.is_empty() {
        return (StatusCode::BAD_REQUEST, "successor address is required").into_response();
    }
    node.set_successor(&successor);
    StatusCode::OK.into_response()
}
