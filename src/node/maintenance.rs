//! Background ring repair.
//!
//! One ticker per node runs three tasks in order each tick: check the
//! predecessor's liveness, stabilize the successor link, and fix one finger
//! table entry. The finger index advances round-robin so the whole table is
//! repaired within `M` ticks. Sequencing the tasks keeps the routing
//! invariants simple; convergence time is dominated by network round-trips,
//! not by local parallelism.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::state::Node;
use crate::ring::{in_open, key_to_ring_id, M};
use crate::transport::Transport;

/// Retry budget for the authoritative unlink RPCs during a graceful leave.
const LEAVE_RETRIES: usize = 3;
const LEAVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The periodic maintenance driver for one node.
pub struct Maintenance {
    node: Arc<Node>,
    transport: Arc<dyn Transport>,
    next_finger: AtomicUsize,
}

impl Maintenance {
    pub fn new(node: Arc<Node>, transport: Arc<dyn Transport>) -> Self {
        Self {
            node,
            transport,
            next_finger: AtomicUsize::new(0),
        }
    }

    /// Runs the ticker until the shutdown signal fires. The period is
    /// randomized per process so a cluster's nodes do not stabilize in
    /// lockstep.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis(100 + rand::thread_rng().gen_range(0..400));
        info!("maintenance ticker running every {period:?}");
        let mut ticker = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.node.is_active() {
                        self.tick().await;
                    }
                }
                _ = shutdown.changed() => {
                    info!("maintenance ticker stopping");
                    return;
                }
            }
        }
    }

    /// One maintenance step: check-predecessor, stabilize, fix one finger.
    pub async fn tick(&self) {
        self.check_predecessor().await;
        self.stabilize().await;
        let index = self.next_finger.fetch_add(1, Ordering::Relaxed) % M;
        self.fix_finger(index).await;
    }

    /// Pings the predecessor and clears it when unreachable. The ownership
    /// interval widens again once the ring re-stabilizes.
    async fn check_predecessor(&self) {
        let Some(pred) = self.node.predecessor() else {
            return;
        };

        match self.transport.check_alive(&pred.addr).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("predecessor {pred} is not alive, clearing it");
                self.node.set_predecessor("");
            }
            Err(e) => {
                warn!("predecessor {pred} is unreachable ({e}), clearing it");
                self.node.set_predecessor("");
            }
        }
    }

    /// Verifies and refines the successor link, then notifies the successor
    /// of our existence. This is how new nodes become visible to the ring.
    async fn stabilize(&self) {
        let node = &self.node;
        let successor = node.successor();

        if successor.addr == node.addr() {
            // One-node view: our own predecessor, if any, is a better
            // successor candidate (this is how the second node in a ring
            // discovers the first).
            if let Some(pred) = node.predecessor() {
                if pred.addr != node.addr() && in_open(pred.id, node.id(), successor.id) {
                    info!("stabilize: adopting own predecessor {pred} as successor");
                    node.set_successor(&pred.addr);
                }
            }
        } else {
            let candidates = node.successor_candidates();
            let mut live_candidate = false;
            let mut successor_unreachable = false;

            for candidate in &candidates {
                let pred_addr = match self.transport.get_predecessor(candidate).await {
                    Ok(addr) => addr,
                    Err(e) => {
                        warn!("stabilize: successor candidate '{candidate}' unreachable: {e}");
                        if *candidate == successor.addr {
                            successor_unreachable = true;
                        }
                        continue;
                    }
                };

                live_candidate = true;

                if successor_unreachable {
                    // The recorded successor is dead. Adopt the first live
                    // candidate; the following ticks walk it back to the true
                    // neighbor through its predecessor chain.
                    warn!("stabilize: successor {} is dead, adopting '{candidate}'", successor);
                    node.set_successor(candidate);
                    break;
                }

                if pred_addr == node.addr() {
                    // The link is already mutual.
                    break;
                }

                if pred_addr.is_empty() {
                    debug!("stabilize: candidate '{candidate}' has no predecessor, adopting it");
                    node.set_successor(candidate);
                    break;
                }

                let pred_id = key_to_ring_id(&pred_addr);
                let current = node.successor();
                if in_open(pred_id, node.id(), current.id) {
                    info!(
                        "stabilize: successor's predecessor '{pred_addr}' (id {pred_id}) is closer, adopting it"
                    );
                    node.set_successor(&pred_addr);
                    break;
                }
            }

            if !live_candidate {
                warn!("stabilize: no live successor candidate, falling back to self");
                node.set_successor(&node.addr());
            }
        }

        let successor = node.successor();
        if successor.addr == node.addr() {
            return;
        }
        if let Err(e) = self.transport.notify(&successor.addr, &node.addr()).await {
            // Not retried here; the next tick notifies again.
            warn!("stabilize: failed to notify successor {successor}: {e}");
        }
    }

    /// Re-resolves one finger slot. A lookup that reaches a live node
    /// replaces the entry; a lookup whose candidates all fail evicts the
    /// current target from the whole table.
    async fn fix_finger(&self, index: usize) {
        let (start, current) = self.node.finger_slot(index);

        match self.node.locate_successor(self.transport.as_ref(), start).await {
            Ok(addr) => {
                if addr != self.node.addr() && addr != current {
                    self.node.install_finger(index, &addr);
                }
            }
            Err(e) => {
                warn!("fix-finger {index} lookup failed ({e}), evicting '{current}'");
                self.node.evict_finger(&current);
            }
        }

        if index == M - 1 {
            debug!("routing state after a full finger sweep:\n{}", self.node);
        }
    }
}

/// Joins the ring through a seed node: the predecessor becomes unknown and
/// the successor is whatever the seed resolves for our own id. No keys move;
/// the maintenance loop takes it from here.
pub async fn join(node: &Node, transport: &dyn Transport, seed: &str) -> Result<()> {
    node.set_predecessor("");
    let successor = transport
        .find_successor(seed, node.id())
        .await
        .with_context(|| format!("join via '{seed}' failed"))?;
    info!("joining ring via '{seed}', successor is '{successor}'");
    node.set_successor(&successor);
    Ok(())
}

/// Graceful departure: link predecessor and successor to each other, reset
/// to a single-node ring, and stop serving. Keys stored here are lost, which
/// is the documented trade-off.
pub async fn leave(node: &Node, transport: &dyn Transport) {
    let successor = node.successor();
    let predecessor = node.predecessor();
    let pred_addr = predecessor.as_ref().map(|p| p.addr.clone()).unwrap_or_default();

    info!(
        "leaving ring, linking predecessor '{}' to successor '{}'",
        pred_addr, successor.addr
    );

    if successor.addr != node.addr() {
        retry_rpc(LEAVE_RETRIES, || {
            transport.set_predecessor(&successor.addr, &pred_addr)
        })
        .await
        .unwrap_or_else(|e| warn!("leave: failed to update successor '{}': {e}", successor.addr));
    }

    if let Some(pred) = &predecessor {
        if pred.addr != node.addr() {
            retry_rpc(LEAVE_RETRIES, || {
                transport.set_successor(&pred.addr, &successor.addr)
            })
            .await
            .unwrap_or_else(|e| warn!("leave: failed to update predecessor '{}': {e}", pred.addr));
        }
    }

    node.reset_to_single_node();
    node.set_active(false);
}

async fn retry_rpc<F, Fut>(attempts: usize, mut call: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut last_err = None;
    for attempt in 0..attempts {
        match call().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(LEAVE_RETRY_DELAY).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
}
