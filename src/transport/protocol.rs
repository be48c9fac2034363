//! Wire Protocol
//!
//! Endpoint paths and the JSON payloads exchanged between nodes and with
//! diagnostic clients. Storage bodies are opaque bytes and deliberately have
//! no DTO; every other payload is plain JSON.

use serde::{Deserialize, Serialize};

/// Client storage surface; the key is the remainder of the path.
pub const ENDPOINT_STORAGE: &str = "/storage";
/// Membership walk (GET) and bootstrap (PUT).
pub const ENDPOINT_NETWORK: &str = "/network";
/// Routing state snapshot for diagnostics.
pub const ENDPOINT_NODE_INFO: &str = "/node-info";
/// Liveness probe; answers with the node's own `host:port`.
pub const ENDPOINT_PING: &str = "/ping";
/// Join the ring via a peer given in the `nprime` query parameter.
pub const ENDPOINT_JOIN: &str = "/join";
/// Graceful departure.
pub const ENDPOINT_LEAVE: &str = "/leave";
/// Flip the node into its simulated-crash state.
pub const ENDPOINT_SIM_CRASH: &str = "/sim-crash";
/// The only endpoint served while crashed; reactivates the node.
pub const ENDPOINT_SIM_RECOVER: &str = "/sim-recover";
/// Peer RPC: GET reads, PUT is notify, POST is the authoritative set.
pub const ENDPOINT_PREDECESSOR: &str = "/predecessor";
/// Peer RPC: GET resolves a key id, PUT is the authoritative set.
pub const ENDPOINT_SUCCESSOR: &str = "/successor";

/// Routing state snapshot returned by `/node-info`.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The node's ring id, as a decimal string.
    pub node_hash: String,
    /// Current successor address.
    pub successor: String,
    /// Current predecessor address; empty when unknown.
    pub predecessor: String,
    /// Finger table targets, in slot order.
    pub others: Vec<String>,
}

/// Query parameters accepted by `/network`.
#[derive(Debug, Deserialize)]
pub struct NetworkQuery {
    /// Comma-separated membership list for the bootstrap PUT.
    pub network: Option<String>,
    /// Walk cutoff for the traversal GET; defaults to the first node.
    pub origin: Option<String>,
}

/// Query parameters accepted by `GET /successor`.
#[derive(Debug, Deserialize)]
pub struct SuccessorQuery {
    pub key: Option<String>,
}

/// Query parameters accepted by `POST /join`.
#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    pub nprime: Option<String>,
}
