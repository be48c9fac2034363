use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::types::{FingerEntry, GetOutcome, NodeRef, PutOutcome};
use crate::ring::{in_half_open_right, in_open, key_to_ring_id, M, RING_SIZE};
use crate::transport::Transport;

/// Routing fields guarded together by one lock. Critical sections are short
/// and never span a network call.
struct RoutingTable {
    successor: NodeRef,
    predecessor: Option<NodeRef>,
    finger: Vec<FingerEntry>,
}

/// A ring member. Created once per process; mutated only by the RPC handlers
/// and the maintenance loop.
pub struct Node {
    self_ref: NodeRef,
    routing: RwLock<RoutingTable>,
    data: DashMap<String, Vec<u8>>,
    active: AtomicBool,
}

impl Node {
    /// Creates a single-node ring: successor is self, predecessor is unknown,
    /// every finger targets self.
    pub fn new(addr: &str) -> Self {
        let self_ref = NodeRef::from_addr(addr);
        let finger = (0..M)
            .map(|i| FingerEntry {
                start: (self_ref.id + (1 << i)) % RING_SIZE,
                target: self_ref.clone(),
            })
            .collect();

        info!("node created at {} with ring id {}", addr, self_ref.id);

        Self {
            routing: RwLock::new(RoutingTable {
                successor: self_ref.clone(),
                predecessor: None,
                finger,
            }),
            self_ref,
            data: DashMap::new(),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.self_ref.id
    }

    pub fn addr(&self) -> String {
        self.self_ref.addr.clone()
    }

    pub fn successor(&self) -> NodeRef {
        self.routing.read().successor.clone()
    }

    pub fn predecessor(&self) -> Option<NodeRef> {
        self.routing.read().predecessor.clone()
    }

    /// Addresses currently targeted by the finger table, in slot order.
    pub fn finger_addrs(&self) -> Vec<String> {
        self.routing
            .read()
            .finger
            .iter()
            .map(|entry| entry.target.addr.clone())
            .collect()
    }

    /// The `start` and current target address of one finger slot.
    pub fn finger_slot(&self, index: usize) -> (u64, String) {
        let routing = self.routing.read();
        let entry = &routing.finger[index];
        (entry.start, entry.target.addr.clone())
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Unconditionally adopts a new successor. Callers are responsible for
    /// having validated the candidate.
    pub fn set_successor(&self, addr: &str) {
        let successor = NodeRef::from_addr(addr);
        debug!("successor set to {successor}");
        self.routing.write().successor = successor;
    }

    /// Authoritative predecessor update. An empty address clears it;
    /// otherwise the update is accepted when no predecessor is known or the
    /// suggested id differs from our own.
    pub fn set_predecessor(&self, addr: &str) {
        let mut routing = self.routing.write();
        if addr.is_empty() {
            debug!("predecessor cleared");
            routing.predecessor = None;
            return;
        }

        let candidate = NodeRef::from_addr(addr);
        if routing.predecessor.is_none() || candidate.id != self.self_ref.id {
            debug!("predecessor set to {candidate}");
            routing.predecessor = Some(candidate);
        }
    }

    /// Hint from a peer claiming to be our predecessor. Accepted when no
    /// predecessor is known or the suggested id lies in `(predecessor, self]`.
    pub fn notify(&self, addr: &str) {
        if addr.is_empty() || addr == self.self_ref.addr {
            return;
        }

        let suggested = NodeRef::from_addr(addr);
        let mut routing = self.routing.write();
        let accept = match &routing.predecessor {
            None => true,
            Some(pred) => in_half_open_right(suggested.id, pred.id, self.self_ref.id),
        };
        if accept {
            debug!("notify accepted new predecessor {suggested}");
            routing.predecessor = Some(suggested);
        }
    }

    /// True when this node owns the key's interval. With no predecessor the
    /// interval is undefined, so ownership is only claimed on a one-node
    /// ring; otherwise the request is routed onward conservatively.
    pub fn owns_key(&self, key_id: u64) -> bool {
        let routing = self.routing.read();
        match &routing.predecessor {
            Some(pred) => in_half_open_right(key_id, pred.id, self.self_ref.id),
            None => routing.successor.id == self.self_ref.id,
        }
    }

    /// Scans the finger table top-down for the closest node preceding
    /// `key_id`, falling back to the successor when no finger qualifies.
    pub fn closest_preceding_node(&self, key_id: u64) -> NodeRef {
        let routing = self.routing.read();
        for entry in routing.finger.iter().rev() {
            if in_open(entry.target.id, self.self_ref.id, key_id) {
                return entry.target.clone();
            }
        }
        routing.successor.clone()
    }

    /// Same scan, but keeps every qualifying finger (best first) and appends
    /// the successor, so a lookup can fall through dead nodes.
    pub fn closest_preceding_candidates(&self, key_id: u64) -> Vec<String> {
        let routing = self.routing.read();
        let mut candidates: Vec<String> = Vec::new();
        for entry in routing.finger.iter().rev() {
            if in_open(entry.target.id, self.self_ref.id, key_id)
                && !candidates.contains(&entry.target.addr)
            {
                candidates.push(entry.target.addr.clone());
            }
        }
        if !candidates.contains(&routing.successor.addr) {
            candidates.push(routing.successor.addr.clone());
        }
        candidates
    }

    /// Deduplicated successor candidates: the immediate successor first, then
    /// every distinct finger target, with self excluded throughout.
    pub fn successor_candidates(&self) -> Vec<String> {
        let routing = self.routing.read();
        let mut candidates: Vec<String> = Vec::new();
        if routing.successor.addr != self.self_ref.addr {
            candidates.push(routing.successor.addr.clone());
        }
        for entry in &routing.finger {
            let addr = &entry.target.addr;
            if addr != &self.self_ref.addr && !candidates.contains(addr) {
                candidates.push(addr.clone());
            }
        }
        candidates
    }

    /// Installs a new target in one finger slot.
    pub fn install_finger(&self, index: usize, addr: &str) {
        let target = NodeRef::from_addr(addr);
        debug!("finger {index} set to {target}");
        self.routing.write().finger[index].target = target;
    }

    /// Removes a dead node from every finger slot that references it,
    /// substituting the next available successor candidate, or self when no
    /// live candidate remains. This is how failed nodes leak out of finger
    /// tables.
    pub fn evict_finger(&self, failed_addr: &str) {
        let replacement = self
            .successor_candidates()
            .into_iter()
            .find(|candidate| candidate != failed_addr)
            .unwrap_or_else(|| self.self_ref.addr.clone());
        let replacement = NodeRef::from_addr(&replacement);

        let mut routing = self.routing.write();
        for entry in routing.finger.iter_mut() {
            if entry.target.addr == failed_addr {
                entry.target = replacement.clone();
            }
        }
        warn!(
            "evicted '{}' from finger table, substituted {}",
            failed_addr, replacement
        );
    }

    /// Installs a full initial topology from a membership list: sorts the
    /// addresses by ring id, then derives successor, predecessor, and every
    /// finger from the sorted ring. Used by the bootstrap endpoint.
    pub fn set_network(&self, network: &[String]) {
        let mut members: Vec<NodeRef> = network.iter().map(|addr| NodeRef::from_addr(addr)).collect();
        if !members.iter().any(|member| member.id == self.self_ref.id) {
            warn!("bootstrap membership omits the local node, adding it");
            members.push(self.self_ref.clone());
        }
        members.sort_by_key(|member| member.id);

        let finger = (0..M)
            .map(|i| {
                let start = (self.self_ref.id + (1 << i)) % RING_SIZE;
                // First member at or after the start point, wrapping to the
                // lowest id.
                let target = members
                    .iter()
                    .find(|member| member.id >= start)
                    .unwrap_or(&members[0])
                    .clone();
                FingerEntry { start, target }
            })
            .collect();

        let self_index = members
            .iter()
            .position(|member| member.id == self.self_ref.id)
            .unwrap_or(0);
        let successor = members[(self_index + 1) % members.len()].clone();
        let predecessor = members[(self_index + members.len() - 1) % members.len()].clone();

        info!(
            "bootstrap topology installed: {} members, successor {successor}, predecessor {predecessor}",
            members.len()
        );

        let mut routing = self.routing.write();
        routing.finger = finger;
        routing.successor = successor;
        routing.predecessor = if members.len() == 1 { None } else { Some(predecessor) };
    }

    /// Resets routing to a fresh single-node ring. The data map is left
    /// alone; keys stored here are unreachable until re-put elsewhere.
    pub fn reset_to_single_node(&self) {
        let mut routing = self.routing.write();
        routing.successor = self.self_ref.clone();
        routing.predecessor = None;
        for entry in routing.finger.iter_mut() {
            entry.target = self.self_ref.clone();
        }
        info!("routing state reset to a single-node ring");
    }

    /// Local GET decision: a value, a confirmed miss, or a forwarding hop.
    pub fn get(&self, key: &str) -> GetOutcome {
        let key_id = key_to_ring_id(key);
        if self.owns_key(key_id) {
            return match self.data.get(key) {
                Some(value) => {
                    debug!("retrieved key '{key}' (id {key_id}), {} bytes", value.len());
                    GetOutcome::Value(value.clone())
                }
                None => GetOutcome::NotFound,
            };
        }
        GetOutcome::Forward(self.closest_preceding_node(key_id).addr)
    }

    /// Local PUT decision: store when owner, otherwise a forwarding hop.
    pub fn put(&self, key: &str, value: Vec<u8>) -> PutOutcome {
        let key_id = key_to_ring_id(key);
        if self.owns_key(key_id) {
            debug!("stored key '{key}' (id {key_id}), {} bytes", value.len());
            self.data.insert(key.to_string(), value);
            return PutOutcome::Stored;
        }
        PutOutcome::Forward(self.closest_preceding_node(key_id).addr)
    }

    /// Locates the node responsible for `key_id`, degrading to the local
    /// successor when no routing candidate can be reached.
    pub async fn find_successor(&self, transport: &dyn Transport, key_id: u64) -> String {
        match self.locate_successor(transport, key_id).await {
            Ok(addr) => addr,
            Err(e) => {
                let successor = self.successor();
                warn!("lookup for key {key_id} failed ({e}), falling back to own successor {successor}");
                successor.addr
            }
        }
    }

    /// The same lookup, surfacing total candidate failure to the caller.
    /// fix-fingers uses the error to evict dead targets.
    pub(crate) async fn locate_successor(
        &self,
        transport: &dyn Transport,
        key_id: u64,
    ) -> Result<String> {
        let successor = self.successor();
        if in_half_open_right(key_id, self.self_ref.id, successor.id) {
            return Ok(successor.addr);
        }

        for candidate in self.closest_preceding_candidates(key_id) {
            match transport.find_successor(&candidate, key_id).await {
                Ok(addr) => return Ok(addr),
                Err(e) => warn!("lookup candidate '{candidate}' failed for key {key_id}: {e}"),
            }
        }
        Err(anyhow!("no routing candidate answered the lookup for key {key_id}"))
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routing = self.routing.read();
        writeln!(f, "{}", self.self_ref)?;
        writeln!(f, "  successor: {}", routing.successor)?;
        match &routing.predecessor {
            Some(pred) => writeln!(f, "  predecessor: {pred}")?,
            None => writeln!(f, "  predecessor: none")?,
        }
        writeln!(f, "  finger table:")?;
        for (i, entry) in routing.finger.iter().enumerate() {
            writeln!(f, "    [{i}] start={} --> {}", entry.start, entry.target)?;
        }
        Ok(())
    }
}
