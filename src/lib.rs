//! Chord-style Distributed Hash Table
//!
//! This library crate defines the core of a DHT node. Clients issue GET and
//! PUT requests against any node; the ring routes each key to the unique
//! node responsible for it and self-heals as members join, leave, or fail.
//!
//! ## Architecture Modules
//! - **`ring`**: the identifier space. Hashes addresses and keys onto a
//!   `2^M`-slot circle and provides the wrap-around interval predicates.
//! - **`node`**: per-process state (successor, predecessor, finger table,
//!   local data) plus the routing decisions and the background maintenance
//!   protocol (stabilize, fix-fingers, check-predecessor, join, leave).
//! - **`transport`**: the typed peer RPC surface, its HTTP implementation
//!   on both the client and serving side, and the storage forwarding path.
//! - **`config`**: command-line configuration for the binary.

pub mod config;
pub mod node;
pub mod ring;
pub mod transport;
