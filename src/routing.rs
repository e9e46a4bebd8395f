//! Versioned consistent-hash ring with virtual replicas.
//!
//! A [`RoutingTable`] tracks the cluster's physical nodes and the virtual
//! replicas each contributes to the ring. `version` and `uid` together let
//! two independently mutated tables converge deterministically: version
//! orders causally related edits, `uid` discriminates concurrent ones that
//! happen to share a version (see [`RoutingTable::merge_with`]).

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::ring_hash;

/// Errors specific to routing-table lookups.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoutingError {
    /// `get_responsible_node` was called on a ring with no virtual nodes.
    #[error("routing table has no virtual nodes")]
    EmptyRing,
}

/// Identity of a physical node. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub host: String,
    pub port: u16,
    pub node_id: String,
}

impl NodeMeta {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let node_id = format!("{host}:{port}");
        Self { host, port, node_id }
    }
}

/// A synthetic replica of a physical node placed on the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNode {
    pub vnode_id: String,
    pub physical_node_id: String,
    pub hash: u64,
}

impl VirtualNode {
    fn new(physical_node_id: &str, replica_index: usize) -> Self {
        let vnode_id = format!("{physical_node_id}#{replica_index}");
        let hash = ring_hash(&vnode_id);
        Self {
            vnode_id,
            physical_node_id: physical_node_id.to_string(),
            hash,
        }
    }

    /// Ordering key used for ring placement: hash ascending, lexicographic
    /// `vnode_id` as the tie-break for the (astronomically rare) hash
    /// collision.
    fn sort_key(&self) -> (u64, &str) {
        (self.hash, self.vnode_id.as_str())
    }
}

/// Wire representation of a [`RoutingTable`], as returned by
/// `GET /routing_table` and carried inside gossip payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingTableSnapshot {
    pub version: u64,
    pub uid: String,
    pub nodes: Vec<NodeMeta>,
}

/// The versioned, UID-stamped consistent-hash ring.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    version: u64,
    uid: String,
    replica_factor: usize,
    node_map: HashMap<String, NodeMeta>,
    virtual_nodes: Vec<VirtualNode>,
}

impl RoutingTable {
    /// Construct a table seeded with a single self node. Mirrors the
    /// reference implementation: `version` starts at 1 and the constructor
    /// performs one `add_node`, so a fresh table observes `version == 2`.
    pub fn new(self_host: impl Into<String>, self_port: u16, replica_factor: usize) -> Self {
        let mut table = Self {
            version: 1,
            uid: Uuid::new_v4().to_string(),
            replica_factor,
            node_map: HashMap::new(),
            virtual_nodes: Vec::new(),
        };
        table.add_node(self_host.into(), self_port);
        table
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn replica_factor(&self) -> usize {
        self.replica_factor
    }

    pub fn node_count(&self) -> usize {
        self.node_map.len()
    }

    pub fn virtual_node_count(&self) -> usize {
        self.virtual_nodes.len()
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.node_map.contains_key(node_id)
    }

    pub fn virtual_nodes(&self) -> &[VirtualNode] {
        &self.virtual_nodes
    }

    /// IDs of every physical node currently on the ring, self included.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.node_map.keys().map(String::as_str)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeMeta> {
        self.node_map.values()
    }

    /// Add a physical node and its virtual replicas. No-op if already
    /// present. Bumps `version` and regenerates `uid` on an actual change.
    pub fn add_node(&mut self, host: impl Into<String>, port: u16) {
        let meta = NodeMeta::new(host, port);
        if self.node_map.contains_key(&meta.node_id) {
            return;
        }

        for i in 0..self.replica_factor {
            let vnode = VirtualNode::new(&meta.node_id, i);
            self.sorted_insert(vnode);
        }
        self.node_map.insert(meta.node_id.clone(), meta);

        self.version += 1;
        self.uid = Uuid::new_v4().to_string();
    }

    /// Remove a physical node and every virtual replica it contributed.
    /// No-op if absent.
    pub fn remove_node(&mut self, host: &str, port: u16) {
        let node_id = format!("{host}:{port}");
        if self.node_map.remove(&node_id).is_none() {
            return;
        }
        self.virtual_nodes.retain(|v| v.physical_node_id != node_id);

        self.version += 1;
        self.uid = Uuid::new_v4().to_string();
    }

    fn sorted_insert(&mut self, vnode: VirtualNode) {
        let idx = self
            .virtual_nodes
            .binary_search_by(|existing| existing.sort_key().cmp(&vnode.sort_key()))
            .unwrap_or_else(|idx| idx);
        self.virtual_nodes.insert(idx, vnode);
    }

    /// Find the node responsible for `key`: the first virtual node whose
    /// hash strictly exceeds `H(key)`, wrapping to index 0 past the end.
    pub fn get_responsible_node(&self, key: &str) -> Result<NodeMeta, RoutingError> {
        if self.virtual_nodes.is_empty() {
            return Err(RoutingError::EmptyRing);
        }
        let key_hash = ring_hash(key);
        let idx = self
            .virtual_nodes
            .partition_point(|v| v.hash <= key_hash);
        let idx = if idx == self.virtual_nodes.len() { 0 } else { idx };
        let vnode = &self.virtual_nodes[idx];
        Ok(self.node_map[&vnode.physical_node_id].clone())
    }

    /// Ship the physical node list; receivers reconstruct virtual nodes
    /// locally from `(host, port, i)`, so `replica_factor` must be a
    /// cluster-wide constant.
    pub fn serialize(&self) -> RoutingTableSnapshot {
        RoutingTableSnapshot {
            version: self.version,
            uid: self.uid.clone(),
            nodes: self.node_map.values().cloned().collect(),
        }
    }

    /// Rebuild local state from a higher-version remote table, then adopt
    /// its `(version, uid)` verbatim. The intermediate `add_node` calls are
    /// only ever observed while the caller holds whatever lock also guards
    /// this table (see the gossip manager).
    pub fn replace_with(&mut self, remote: &RoutingTableSnapshot) {
        self.node_map.clear();
        self.virtual_nodes.clear();
        for node in &remote.nodes {
            self.add_node(node.host.clone(), node.port);
        }
        self.version = remote.version;
        self.uid = remote.uid.clone();
    }

    /// Union in any node from `remote` not already known locally. Version
    /// bumps happen naturally, once per newly added node, via `add_node`.
    /// Idempotent and commutative: safe to reapply on duplicate gossip.
    pub fn merge_with(&mut self, remote: &RoutingTableSnapshot) {
        for node in &remote.nodes {
            if !self.node_map.contains_key(&node.node_id) {
                self.add_node(node.host.clone(), node.port);
            }
        }
    }
}

/// Compare `(version, uid)` pairs the way gossip acceptance does, without
/// mutating anything. Exposed for tests and for callers that want to
/// decide before committing to a lock.
pub fn compare_versions(local_version: u64, local_uid: &str, remote_version: u64, remote_uid: &str) -> VersionDecision {
    match remote_version.cmp(&local_version) {
        Ordering::Greater => VersionDecision::Replace,
        Ordering::Equal if remote_uid != local_uid => VersionDecision::Merge,
        _ => VersionDecision::Ignore,
    }
}

/// Outcome of comparing a remote `(version, uid)` against the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionDecision {
    Replace,
    Merge,
    Ignore,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_add_remove_sequence() {
        let mut rt = RoutingTable::new("127.0.0.1", 8000, 100);
        assert_eq!(rt.version(), 2);
        assert_eq!(rt.virtual_node_count(), 100);

        rt.add_node("127.0.0.1", 8001);
        assert_eq!(rt.version(), 3);
        assert_eq!(rt.virtual_node_count(), 200);

        rt.add_node("127.0.0.1", 8001);
        assert_eq!(rt.version(), 3);
        assert_eq!(rt.virtual_node_count(), 200);

        rt.remove_node("127.0.0.1", 8001);
        assert_eq!(rt.version(), 4);
        assert_eq!(rt.virtual_node_count(), 100);
    }

    #[test]
    fn ring_size_invariant_holds_across_mutations() {
        let mut rt = RoutingTable::new("127.0.0.1", 8000, 10);
        rt.add_node("127.0.0.1", 8001);
        rt.add_node("127.0.0.1", 8002);
        rt.remove_node("127.0.0.1", 8001);
        assert_eq!(rt.virtual_node_count(), rt.replica_factor() * rt.node_count());
        for v in rt.virtual_nodes() {
            assert!(rt.contains_node(&v.physical_node_id));
        }
    }

    #[test]
    fn virtual_nodes_stay_sorted_by_hash() {
        let mut rt = RoutingTable::new("127.0.0.1", 8000, 20);
        rt.add_node("127.0.0.1", 8001);
        rt.add_node("127.0.0.1", 8002);
        let hashes: Vec<u64> = rt.virtual_nodes().iter().map(|v| v.hash).collect();
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn s2_routing_is_deterministic_across_independent_tables() {
        let mut a = RoutingTable::new("127.0.0.1", 8000, 50);
        a.add_node("127.0.0.1", 8001);

        let mut b = RoutingTable::new("127.0.0.1", 8000, 50);
        b.add_node("127.0.0.1", 8001);

        assert_eq!(
            a.get_responsible_node("foo").unwrap().node_id,
            b.get_responsible_node("foo").unwrap().node_id
        );
    }

    #[test]
    fn s3_lookup_wraps_around_to_first_vnode() {
        let mut rt = RoutingTable::new("127.0.0.1", 8000, 5);
        rt.add_node("127.0.0.1", 8001);

        let max_hash = rt.virtual_nodes().last().unwrap().hash;
        // Find a key whose hash exceeds every vnode hash by scanning; SHA-256
        // is effectively uniform so a handful of probes will find one.
        let key = (0..10_000u64)
            .map(|i| format!("probe-{i}"))
            .find(|k| ring_hash(k) > max_hash)
            .expect("a key hashing past the ring end should exist");

        let expected = rt.virtual_nodes()[0].physical_node_id.clone();
        assert_eq!(rt.get_responsible_node(&key).unwrap().node_id, expected);
    }

    #[test]
    fn lookup_on_empty_ring_fails() {
        let rt = RoutingTable {
            version: 1,
            uid: Uuid::new_v4().to_string(),
            replica_factor: 10,
            node_map: HashMap::new(),
            virtual_nodes: Vec::new(),
        };
        assert_eq!(rt.get_responsible_node("x"), Err(RoutingError::EmptyRing));
    }

    #[test]
    fn serialize_round_trips_physical_nodes() {
        let mut rt = RoutingTable::new("127.0.0.1", 8000, 5);
        rt.add_node("127.0.0.1", 8001);
        let snap = rt.serialize();
        assert_eq!(snap.version, rt.version());
        assert_eq!(snap.uid, rt.uid());
        assert_eq!(snap.nodes.len(), rt.node_count());
    }

    #[test]
    fn s4_replace_with_adopts_remote_state() {
        let mut local = RoutingTable::new("127.0.0.1", 8000, 10);
        let remote = RoutingTableSnapshot {
            version: local.version() + 1,
            uid: "remote-uid".to_string(),
            nodes: vec![
                NodeMeta::new("127.0.0.1", 8000),
                NodeMeta::new("127.0.0.1", 8001),
                NodeMeta::new("127.0.0.1", 8002),
            ],
        };
        local.replace_with(&remote);
        assert_eq!(local.version(), remote.version);
        assert_eq!(local.uid(), remote.uid);
        assert_eq!(local.node_count(), 3);
    }

    #[test]
    fn s5_merge_with_unions_node_sets_and_bumps_version() {
        let mut local = RoutingTable::new("127.0.0.1", 8000, 10);
        let before = local.version();
        let remote = RoutingTableSnapshot {
            version: before,
            uid: "different-uid".to_string(),
            nodes: vec![
                NodeMeta::new("127.0.0.1", 8000),
                NodeMeta::new("127.0.0.1", 9000),
            ],
        };
        local.merge_with(&remote);
        assert!(local.contains_node("127.0.0.1:8000"));
        assert!(local.contains_node("127.0.0.1:9000"));
        assert!(local.version() > before);
    }

    #[test]
    fn merge_with_is_idempotent() {
        let mut local = RoutingTable::new("127.0.0.1", 8000, 10);
        let remote = local.serialize();
        let before_version = local.version();
        local.merge_with(&remote);
        assert_eq!(local.version(), before_version);
        assert_eq!(local.node_count(), 1);
    }

    #[test]
    fn version_comparison_decision_table() {
        assert_eq!(compare_versions(2, "a", 3, "b"), VersionDecision::Replace);
        assert_eq!(compare_versions(5, "a", 5, "b"), VersionDecision::Merge);
        assert_eq!(compare_versions(5, "a", 5, "a"), VersionDecision::Ignore);
        assert_eq!(compare_versions(5, "a", 4, "b"), VersionDecision::Ignore);
    }
}
