//! Heartbeat, fanout gossip, and the binary failure detector.
//!
//! One [`Mutex`] guards both the gossip bookkeeping (`heartbeat_map`,
//! `last_seen`, `status_map`) and the shared [`RoutingTable`] — any local
//! mutation of either, whether triggered by a background loop or by a
//! `/join` request handler, goes through this lock so `replace_with` can
//! never interleave with a concurrent `add_node`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::config::{
    split_host_port, FAILURE_DETECT_INTERVAL, FAILURE_HARD_DEAD, FAILURE_TIMEOUT, GOSSIP_FANOUT,
    GOSSIP_INTERVAL, GOSSIP_SEND_TIMEOUT, HEARTBEAT_INTERVAL,
};
use crate::routing::{compare_versions, NodeMeta, RoutingError, RoutingTable, RoutingTableSnapshot, VersionDecision};

/// Liveness as tracked by the failure detector. `Suspect` is derived
/// on the fly for observability (crossing [`FAILURE_TIMEOUT`]); it is
/// never persisted and never drives routing decisions — only crossing
/// [`FAILURE_HARD_DEAD`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Alive,
    Dead,
}

/// Payload exchanged between `/gossip` peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipPayload {
    pub sender: String,
    pub heartbeat_map: HashMap<String, u64>,
    pub routing_table: RoutingTableSnapshot,
}

struct GossipState {
    routing_table: RoutingTable,
    heartbeat_map: HashMap<String, u64>,
    last_seen: HashMap<String, Instant>,
    status_map: HashMap<String, PeerStatus>,
}

/// Owns the routing table and drives the three background loops that keep
/// cluster membership eventually consistent.
pub struct GossipManager {
    self_node_id: String,
    state: Mutex<GossipState>,
    running: AtomicBool,
    http: reqwest::Client,
}

impl GossipManager {
    pub fn new(self_node_id: impl Into<String>, routing_table: RoutingTable) -> Self {
        let self_node_id = self_node_id.into();
        let now = Instant::now();
        let heartbeat_map = HashMap::from([(self_node_id.clone(), 0u64)]);
        let last_seen = HashMap::from([(self_node_id.clone(), now)]);
        let status_map = HashMap::from([(self_node_id.clone(), PeerStatus::Alive)]);

        let http = reqwest::Client::builder()
            .timeout(GOSSIP_SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            self_node_id,
            state: Mutex::new(GossipState {
                routing_table,
                heartbeat_map,
                last_seen,
                status_map,
            }),
            running: AtomicBool::new(false),
            http,
        }
    }

    /// Spawn the heartbeat, gossip, and failure-detector loops. Idempotent
    /// in the sense that calling it twice just spawns a second set of
    /// loops racing the `running` flag; callers should call it once.
    pub fn start(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let heartbeat = Arc::clone(&self);
        tokio::spawn(async move { heartbeat.heartbeat_loop().await });

        let gossip = Arc::clone(&self);
        tokio::spawn(async move { gossip.gossip_loop().await });

        let detector = Arc::clone(&self);
        tokio::spawn(async move { detector.failure_detector_loop().await });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            {
                let mut state = self.state.lock();
                let counter = state.heartbeat_map.entry(self.self_node_id.clone()).or_insert(0);
                *counter += 1;
                state.last_seen.insert(self.self_node_id.clone(), Instant::now());
            }
            tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        }
    }

    async fn gossip_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            self.gossip_once().await;
            tokio::time::sleep(GOSSIP_INTERVAL).await;
        }
    }

    /// Push the current heartbeat map and routing table to a random
    /// fanout-sized sample of peers right now, outside the periodic
    /// schedule. Used after a local membership change (e.g. `/join`).
    pub async fn force_gossip_once(&self) {
        self.gossip_once().await;
    }

    async fn gossip_once(&self) {
        let (targets, payload) = {
            let state = self.state.lock();
            let peers: Vec<String> = state
                .routing_table
                .node_ids()
                .filter(|id| *id != self.self_node_id)
                .map(str::to_string)
                .collect();
            if peers.is_empty() {
                return;
            }
            let mut rng = rand::thread_rng();
            let fanout = GOSSIP_FANOUT.min(peers.len());
            let targets: Vec<String> = peers
                .choose_multiple(&mut rng, fanout)
                .cloned()
                .collect();
            let payload = GossipPayload {
                sender: self.self_node_id.clone(),
                heartbeat_map: state.heartbeat_map.clone(),
                routing_table: state.routing_table.serialize(),
            };
            (targets, payload)
        };

        for target in targets {
            self.send_gossip(&target, &payload).await;
        }
    }

    async fn send_gossip(&self, target: &str, payload: &GossipPayload) {
        let Ok((host, port)) = split_host_port(target) else {
            return;
        };
        let url = format!("http://{host}:{port}/gossip");
        // Send failures are transient and silently absorbed; the failure
        // detector is what declares a peer unreachable.
        if let Err(err) = self.http.post(&url).json(payload).send().await {
            tracing::debug!(peer = %target, error = %err, "gossip send failed");
        }
    }

    async fn failure_detector_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(FAILURE_DETECT_INTERVAL).await;
            self.detect_failures();
        }
    }

    fn detect_failures(&self) {
        let newly_dead = {
            let mut state = self.state.lock();
            let now = Instant::now();

            let mut newly_dead = Vec::new();
            for (node_id, last_seen) in &state.last_seen {
                if node_id == &self.self_node_id {
                    continue;
                }
                let is_already_dead = state.status_map.get(node_id) == Some(&PeerStatus::Dead);
                if now.duration_since(*last_seen) > FAILURE_HARD_DEAD && !is_already_dead {
                    newly_dead.push(node_id.clone());
                }
            }

            for node_id in &newly_dead {
                state.status_map.insert(node_id.clone(), PeerStatus::Dead);
                if let Ok((host, port)) = split_host_port(node_id) {
                    state.routing_table.remove_node(&host, port);
                }
                state.heartbeat_map.remove(node_id);
                state.last_seen.remove(node_id);
                state.status_map.remove(node_id);
            }
            newly_dead
        };

        for node_id in &newly_dead {
            tracing::warn!(peer = %node_id, "peer marked dead, evicted from routing table");
        }
    }

    /// Validate and apply an inbound gossip payload: CRDT-merge the
    /// heartbeat counters (monotonic max), then apply the version/UID
    /// acceptance rule to the routing table.
    pub fn receive_gossip(&self, payload: GossipPayload) {
        let mut state = self.state.lock();
        let now = Instant::now();

        for (node_id, &hb) in &payload.heartbeat_map {
            let is_newer = match state.heartbeat_map.get(node_id) {
                Some(&local_hb) => hb > local_hb,
                None => true,
            };
            if is_newer {
                state.heartbeat_map.insert(node_id.clone(), hb);
                state.last_seen.insert(node_id.clone(), now);
                state.status_map.insert(node_id.clone(), PeerStatus::Alive);
            }
        }

        let remote = &payload.routing_table;
        let decision = compare_versions(
            state.routing_table.version(),
            state.routing_table.uid(),
            remote.version,
            &remote.uid,
        );
        match decision {
            VersionDecision::Replace => {
                state.routing_table.replace_with(remote);
                tracing::info!(sender = %payload.sender, version = remote.version, "replaced routing table from gossip");
            }
            VersionDecision::Merge => {
                tracing::info!(sender = %payload.sender, "version match but uid conflict: merging routing tables");
                state.routing_table.merge_with(remote);
            }
            VersionDecision::Ignore => {}
        }
    }

    /// Add a node under the shared lock and immediately fan out the
    /// updated table. Used by the `/join` handler.
    pub async fn admit_node(&self, host: &str, port: u16) {
        {
            let mut state = self.state.lock();
            state.routing_table.add_node(host.to_string(), port);
        }
        self.force_gossip_once().await;
    }

    pub fn routing_version(&self) -> u64 {
        self.state.lock().routing_table.version()
    }

    pub fn snapshot_routing_table(&self) -> RoutingTableSnapshot {
        self.state.lock().routing_table.serialize()
    }

    pub fn get_responsible_node(&self, key: &str) -> Result<NodeMeta, RoutingError> {
        self.state.lock().routing_table.get_responsible_node(key)
    }

    pub fn peer_statuses(&self) -> HashMap<String, PeerStatus> {
        self.state.lock().status_map.clone()
    }

    /// Peers whose last heartbeat crossed the soft [`FAILURE_TIMEOUT`] but
    /// not yet [`FAILURE_HARD_DEAD`]. Observability only.
    pub fn suspect_peers(&self) -> Vec<String> {
        let state = self.state.lock();
        let now = Instant::now();
        state
            .last_seen
            .iter()
            .filter(|(node_id, last_seen)| {
                *node_id != &self.self_node_id
                    && now.duration_since(**last_seen) > FAILURE_TIMEOUT
                    && now.duration_since(**last_seen) <= FAILURE_HARD_DEAD
            })
            .map(|(node_id, _)| node_id.clone())
            .collect()
    }
}
