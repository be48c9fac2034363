//! Peer Transport
//!
//! The narrow set of typed RPCs nodes use against each other, the HTTP
//! implementation of both sides, and the client-facing storage surface.
//!
//! ## Core Concepts
//! - **Trait seam**: routing and maintenance only see the [`Transport`]
//!   trait, so tests can run an entire ring in one process on an in-memory
//!   implementation and advance time deterministically.
//! - **Timeout classes**: liveness and lookup RPCs use a fast deadline
//!   (a dead peer must not stall a maintenance tick); the authoritative
//!   set-successor / set-predecessor calls get a slower one.
//! - **Transparent forwarding**: a storage request that lands on the wrong
//!   node is replayed verbatim against the next hop and the peer's response
//!   is streamed back; clients never see a redirect.

pub mod client;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use client::HttpTransport;
pub use server::router;

use anyhow::Result;
use async_trait::async_trait;

/// Peer-to-peer operations, addressed by `host:port`. An empty predecessor
/// string means "none" on the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Liveness probe. A timeout means the target is treated as dead.
    async fn check_alive(&self, target: &str) -> Result<bool>;

    /// Reads the target's current predecessor address.
    async fn get_predecessor(&self, target: &str) -> Result<String>;

    /// Hints to the target that `predecessor` may be its new predecessor.
    async fn notify(&self, target: &str, predecessor: &str) -> Result<()>;

    /// Asks the target to resolve the successor of a key id.
    async fn find_successor(&self, target: &str, key_id: u64) -> Result<String>;

    /// Authoritatively overwrites the target's predecessor (used on leave).
    async fn set_predecessor(&self, target: &str, predecessor: &str) -> Result<()>;

    /// Authoritatively overwrites the target's successor (used on leave).
    async fn set_successor(&self, target: &str, successor: &str) -> Result<()>;
}
