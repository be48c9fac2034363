use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;

use super::maintenance::{join, leave, Maintenance};
use super::state::Node;
use super::types::{GetOutcome, NodeRef, PutOutcome};
use crate::ring::key_to_ring_id;
use crate::transport::Transport;

/// An in-memory transport that runs a whole ring in one process. RPCs are
/// direct method calls on the target node; marking an address "down" makes
/// every RPC against it fail, which is how crashes are injected.
struct TestRing {
    nodes: DashMap<String, Arc<Node>>,
    down: DashMap<String, ()>,
}

impl TestRing {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: DashMap::new(),
            down: DashMap::new(),
        })
    }

    fn add(&self, addr: &str) -> Arc<Node> {
        let node = Arc::new(Node::new(addr));
        self.nodes.insert(addr.to_string(), node.clone());
        node
    }

    fn set_down(&self, addr: &str, down: bool) {
        if down {
            self.down.insert(addr.to_string(), ());
        } else {
            self.down.remove(addr);
        }
    }

    fn reach(&self, target: &str) -> Result<Arc<Node>> {
        if self.down.contains_key(target) {
            return Err(anyhow!("node '{target}' is unreachable"));
        }
        self.nodes
            .get(target)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow!("unknown node '{target}'"))
    }
}

#[async_trait]
impl Transport for TestRing {
    async fn check_alive(&self, target: &str) -> Result<bool> {
        Ok(self.reach(target).is_ok())
    }

    async fn get_predecessor(&self, target: &str) -> Result<String> {
        Ok(self
            .reach(target)?
            .predecessor()
            .map(|p| p.addr)
            .unwrap_or_default())
    }

    async fn notify(&self, target: &str, predecessor: &str) -> Result<()> {
        self.reach(target)?.notify(predecessor);
        Ok(())
    }

    async fn find_successor(&self, target: &str, key_id: u64) -> Result<String> {
        let node = self.reach(target)?;
        Ok(node.find_successor(self, key_id).await)
    }

    async fn set_predecessor(&self, target: &str, predecessor: &str) -> Result<()> {
        self.reach(target)?.set_predecessor(predecessor);
        Ok(())
    }

    async fn set_successor(&self, target: &str, successor: &str) -> Result<()> {
        self.reach(target)?.set_successor(successor);
        Ok(())
    }
}

async fn converge(services: &[Maintenance], rounds: usize) {
    for _ in 0..rounds {
        for service in services {
            service.tick().await;
        }
    }
}

/// Follows the forwarding chain exactly as the HTTP layer would, counting
/// hops. Fails if routing reaches an unreachable or unknown node.
fn ring_put(ring: &TestRing, entry: &str, key: &str, value: &[u8]) -> usize {
    let mut addr = entry.to_string();
    for hops in 0..=ring.nodes.len() {
        let node = ring.reach(&addr).expect("routing reached a dead node");
        match node.put(key, value.to_vec()) {
            PutOutcome::Stored => return hops,
            PutOutcome::Forward(next) => addr = next,
        }
    }
    panic!("put for '{key}' did not terminate");
}

fn ring_get(ring: &TestRing, entry: &str, key: &str) -> Option<Vec<u8>> {
    let mut addr = entry.to_string();
    for _ in 0..=ring.nodes.len() {
        let node = ring.reach(&addr).expect("routing reached a dead node");
        match node.get(key) {
            GetOutcome::Value(value) => return Some(value),
            GetOutcome::NotFound => return None,
            GetOutcome::Forward(next) => addr = next,
        }
    }
    panic!("get for '{key}' did not terminate");
}

/// Brute-force key owner: the member with the smallest id at or after the
/// key, wrapping to the lowest id.
fn expected_owner(addrs: &[&str], key: &str) -> String {
    let mut members: Vec<NodeRef> = addrs.iter().map(|a| NodeRef::from_addr(a)).collect();
    members.sort_by_key(|m| m.id);
    let key_id = key_to_ring_id(key);
    members
        .iter()
        .find(|m| m.id >= key_id)
        .unwrap_or(&members[0])
        .addr
        .clone()
}

fn assert_mutually_linked(nodes: &[&Arc<Node>]) {
    for node in nodes {
        let successor = node.successor();
        let peer = nodes
            .iter()
            .find(|n| n.addr() == successor.addr)
            .unwrap_or_else(|| panic!("successor {} not in ring", successor.addr));
        let back = peer.predecessor().expect("successor has no predecessor");
        assert_eq!(
            back.addr,
            node.addr(),
            "successor of {} does not point back",
            node.addr()
        );
    }
}

const FIVE: [&str; 5] = [
    "n1.cluster:4000",
    "n2.cluster:4000",
    "n3.cluster:4000",
    "n4.cluster:4000",
    "n5.cluster:4000",
];

fn bootstrap_five(ring: &TestRing) -> Vec<Arc<Node>> {
    let members: Vec<String> = FIVE.iter().map(|a| a.to_string()).collect();
    FIVE.iter()
        .map(|addr| {
            let node = ring.add(addr);
            node.set_network(&members);
            node
        })
        .collect()
}

// ============================================================
// SINGLE-NODE RING
// ============================================================

#[test]
fn single_node_owns_everything() {
    let node = Node::new("alone:4000");
    assert_eq!(node.put("foo", b"bar".to_vec()), PutOutcome::Stored);
    assert_eq!(node.get("foo"), GetOutcome::Value(b"bar".to_vec()));
    assert_eq!(node.get("missing"), GetOutcome::NotFound);
    for key_id in [0, 1, 12345, crate::ring::RING_SIZE - 1] {
        assert!(node.owns_key(key_id), "one-node ring must own id {key_id}");
    }
}

#[test]
fn unknown_predecessor_routes_conservatively() {
    let node = Node::new("a.cluster:4000");
    node.set_successor("b.cluster:4000");
    // Predecessor unknown and the ring is not one-node: ownership is
    // undefined, so every operation must forward.
    assert!(!node.owns_key(node.id()));
    assert!(matches!(node.get("anything"), GetOutcome::Forward(_)));
    assert!(matches!(
        node.put("anything", b"v".to_vec()),
        PutOutcome::Forward(_)
    ));
}

// ============================================================
// STATE TRANSITIONS
// ============================================================

#[test]
fn notify_respects_the_interval_gate() {
    // Find three addresses with p < q < s on the ring so the gate outcome
    // is unambiguous.
    let pool: Vec<String> = (0..64).map(|i| format!("host-{i}:5000")).collect();
    let mut refs: Vec<NodeRef> = pool.iter().map(|a| NodeRef::from_addr(a)).collect();
    refs.sort_by_key(|r| r.id);
    refs.dedup_by_key(|r| r.id);
    let (p, q, s) = (&refs[10], &refs[30], &refs[50]);

    let node = Node::new(&s.addr);

    // Empty predecessor accepts any suggestion.
    node.notify(&p.addr);
    assert_eq!(node.predecessor().unwrap().addr, p.addr);

    // q lies in (p, s], so it displaces p.
    node.notify(&q.addr);
    assert_eq!(node.predecessor().unwrap().addr, q.addr);

    // p is now outside (q, s] and must be rejected.
    node.notify(&p.addr);
    assert_eq!(node.predecessor().unwrap().addr, q.addr);

    // Self and empty suggestions are ignored.
    node.notify(&s.addr);
    node.notify("");
    assert_eq!(node.predecessor().unwrap().addr, q.addr);
}

#[test]
fn set_predecessor_clears_on_empty() {
    let node = Node::new("a.cluster:4000");
    node.set_predecessor("b.cluster:4000");
    assert!(node.predecessor().is_some());
    node.set_predecessor("");
    assert!(node.predecessor().is_none());
}

#[test]
fn bootstrap_installs_sorted_topology() {
    let ring = TestRing::new();
    let nodes = bootstrap_five(&ring);

    let mut sorted: Vec<NodeRef> = FIVE.iter().map(|a| NodeRef::from_addr(a)).collect();
    sorted.sort_by_key(|r| r.id);

    for node in &nodes {
        let position = sorted.iter().position(|r| r.id == node.id()).unwrap();
        let next = &sorted[(position + 1) % sorted.len()];
        let prev = &sorted[(position + sorted.len() - 1) % sorted.len()];
        assert_eq!(node.successor().addr, next.addr);
        assert_eq!(node.predecessor().unwrap().addr, prev.addr);

        // Every finger targets the first member at or after its start.
        let addrs = node.finger_addrs();
        for (i, addr) in addrs.iter().enumerate() {
            let (start, _) = node.finger_slot(i);
            let expected = sorted
                .iter()
                .find(|r| r.id >= start)
                .unwrap_or(&sorted[0]);
            assert_eq!(addr, &expected.addr, "finger {i} of {}", node.addr());
        }
    }
}

#[test]
fn evict_finger_purges_every_slot() {
    let ring = TestRing::new();
    let nodes = bootstrap_five(&ring);
    let victim = nodes[0].successor().addr;

    nodes[0].evict_finger(&victim);

    for addr in nodes[0].finger_addrs() {
        assert_ne!(addr, victim, "evicted address still referenced");
    }
}

// ============================================================
// LOOKUPS
// ============================================================

#[tokio::test]
async fn find_successor_matches_brute_force() {
    let ring = TestRing::new();
    let nodes = bootstrap_five(&ring);

    for i in 0..100 {
        let key = format!("lookup-key-{i}");
        let key_id = key_to_ring_id(&key);
        let expected = expected_owner(&FIVE, &key);
        for entry in [&nodes[0], &nodes[3]] {
            let resolved = entry.find_successor(ring.as_ref(), key_id).await;
            assert_eq!(resolved, expected, "key '{key}' from {}", entry.addr());
        }
    }
}

#[test]
fn lookup_hops_are_bounded() {
    let ring = TestRing::new();
    let nodes = bootstrap_five(&ring);

    // Strict clockwise progress bounds any forwarding chain by the member
    // count.
    for i in 0..100 {
        let key = format!("hop-key-{i}");
        for entry in &nodes {
            let hops = ring_put(&ring, &entry.addr(), &key, b"x");
            assert!(hops <= FIVE.len(), "key '{key}' took {hops} hops");
        }
    }
}

// ============================================================
// CONVERGENCE
// ============================================================

#[tokio::test]
async fn second_node_join_converges() {
    let ring = TestRing::new();
    let a = ring.add("pair-a:4000");
    let b = ring.add("pair-b:4000");
    let transport: Arc<dyn Transport> = ring.clone();
    let services = [
        Maintenance::new(a.clone(), transport.clone()),
        Maintenance::new(b.clone(), transport.clone()),
    ];

    join(&b, ring.as_ref(), &a.addr()).await.unwrap();
    converge(&services, 6).await;

    assert_eq!(a.successor().addr, b.addr());
    assert_eq!(b.successor().addr, a.addr());
    assert_eq!(a.predecessor().unwrap().addr, b.addr());
    assert_eq!(b.predecessor().unwrap().addr, a.addr());
}

#[tokio::test]
async fn sequential_joins_build_a_consistent_ring() {
    let ring = TestRing::new();
    let transport: Arc<dyn Transport> = ring.clone();

    let seed = ring.add(FIVE[0]);
    let mut nodes = vec![seed.clone()];
    let mut services = vec![Maintenance::new(seed, transport.clone())];

    for addr in &FIVE[1..] {
        let node = ring.add(addr);
        join(&node, ring.as_ref(), FIVE[0]).await.unwrap();
        services.push(Maintenance::new(node.clone(), transport.clone()));
        nodes.push(node);
        converge(&services, 10).await;
    }

    // Enough extra rounds for every finger slot to be revisited.
    converge(&services, 40).await;

    let refs: Vec<&Arc<Node>> = nodes.iter().collect();
    assert_mutually_linked(&refs);

    // Exactly one owner per key once quiesced.
    for i in 0..50 {
        let key = format!("owner-key-{i}");
        let key_id = key_to_ring_id(&key);
        let owners = nodes.iter().filter(|n| n.owns_key(key_id)).count();
        assert_eq!(owners, 1, "key '{key}' has {owners} owners");
    }

    // A value is retrievable from every entry node, and re-putting it is
    // idempotent.
    for i in 0..20 {
        let key = format!("data-key-{i}");
        let value = key.as_bytes();
        ring_put(&ring, FIVE[i % 5], &key, value);
        ring_put(&ring, FIVE[(i + 1) % 5], &key, value);
        for entry in FIVE {
            assert_eq!(ring_get(&ring, entry, &key).as_deref(), Some(value));
        }
    }
}

#[tokio::test]
async fn graceful_leave_repairs_the_ring() {
    let ring = TestRing::new();
    let nodes = bootstrap_five(&ring);
    let transport: Arc<dyn Transport> = ring.clone();

    let leaver = &nodes[2];
    let leaver_addr = leaver.addr();
    leave(leaver, ring.as_ref()).await;
    assert!(!leaver.is_active());
    ring.set_down(&leaver_addr, true);

    let remaining: Vec<&Arc<Node>> = nodes.iter().filter(|n| n.addr() != leaver_addr).collect();
    let services: Vec<Maintenance> = remaining
        .iter()
        .map(|n| Maintenance::new((*n).clone(), transport.clone()))
        .collect();
    converge(&services, 40).await;

    assert_mutually_linked(&remaining);

    // A successor walk from any survivor visits exactly the survivors.
    for start in &remaining {
        let mut seen = vec![start.addr()];
        let mut current = start.successor().addr;
        while current != start.addr() {
            assert!(!seen.contains(&current), "walk revisited {current}");
            seen.push(current.clone());
            let node = ring.reach(&current).expect("walk reached a dead node");
            current = node.successor().addr;
        }
        seen.sort();
        let mut expected: Vec<String> =
            remaining.iter().map(|n| n.addr()).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }
}

#[tokio::test]
async fn crash_is_detected_and_routed_around() {
    let ring = TestRing::new();
    let nodes = bootstrap_five(&ring);
    let transport: Arc<dyn Transport> = ring.clone();

    let dead_addr = nodes[1].addr();
    ring.set_down(&dead_addr, true);

    let live: Vec<&Arc<Node>> = nodes.iter().filter(|n| n.addr() != dead_addr).collect();
    let services: Vec<Maintenance> = live
        .iter()
        .map(|n| Maintenance::new((*n).clone(), transport.clone()))
        .collect();
    converge(&services, 40).await;

    for node in &live {
        assert_ne!(node.successor().addr, dead_addr, "{} still points at the dead node", node.addr());
        if let Some(pred) = node.predecessor() {
            assert_ne!(pred.addr, dead_addr, "{} kept the dead predecessor", node.addr());
        }
    }
    assert_mutually_linked(&live);

    // Keys previously owned by the dead node now land on its successor.
    for i in 0..20 {
        let key = format!("after-crash-{i}");
        let value = key.as_bytes();
        for entry in &live {
            ring_put(&ring, &entry.addr(), &key, value);
        }
        for entry in &live {
            assert_eq!(ring_get(&ring, &entry.addr(), &key).as_deref(), Some(value));
        }
    }
}

#[tokio::test]
async fn recovered_node_rejoins_the_ring() {
    let ring = TestRing::new();
    let nodes = bootstrap_five(&ring);
    let transport: Arc<dyn Transport> = ring.clone();

    let dead_addr = nodes[1].addr();
    ring.set_down(&dead_addr, true);

    let live_services: Vec<Maintenance> = nodes
        .iter()
        .filter(|n| n.addr() != dead_addr)
        .map(|n| Maintenance::new(n.clone(), transport.clone()))
        .collect();
    converge(&live_services, 40).await;

    // Recovery keeps the crashed node's routing state; notify and stabilize
    // weave it back in.
    ring.set_down(&dead_addr, false);
    let all_services: Vec<Maintenance> = nodes
        .iter()
        .map(|n| Maintenance::new(n.clone(), transport.clone()))
        .collect();
    converge(&all_services, 40).await;

    let refs: Vec<&Arc<Node>> = nodes.iter().collect();
    assert_mutually_linked(&refs);
}
