//! Per-process glue binding storage, the gossip manager, and the migrator
//! behind the identity of one cluster member.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{NodeConfig, BOOTSTRAP_TIMEOUT, VIRTUAL_NODE_REPLICAS};
use crate::error::NodeError;
use crate::gossip::GossipManager;
use crate::migrator::DataMigrator;
use crate::routing::RoutingTable;
use crate::storage::Storage;

/// A cluster member: its own identity, storage, and the subsystems that
/// keep it converged with the rest of the ring.
pub struct Node {
    pub host: String,
    pub port: u16,
    pub node_id: String,
    storage: Arc<Storage>,
    gossip: Arc<GossipManager>,
    migrator: Arc<DataMigrator>,
    http: reqwest::Client,
}

/// Wire shape for `PUT /kv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: String,
}

impl Node {
    pub fn new(config: &NodeConfig) -> Arc<Self> {
        let node_id = config.node_id();
        let routing_table = RoutingTable::new(config.host.clone(), config.port, VIRTUAL_NODE_REPLICAS);
        let storage = Arc::new(Storage::new());
        let gossip = Arc::new(GossipManager::new(node_id.clone(), routing_table));
        let migrator = Arc::new(DataMigrator::new(node_id.clone(), Arc::clone(&storage), Arc::clone(&gossip)));

        Arc::new(Self {
            host: config.host.clone(),
            port: config.port,
            node_id,
            storage,
            gossip,
            migrator,
            http: reqwest::Client::builder()
                .timeout(BOOTSTRAP_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        })
    }

    /// Start the background gossip loops and the migrator. Call once after
    /// construction (and after `bootstrap_join`, if joining). Takes the
    /// `Arc` by value; pass `Arc::clone(&node)` to keep using `node`
    /// afterwards.
    pub fn start_background_tasks(self: Arc<Self>) {
        Arc::clone(&self.gossip).start();
        Arc::clone(&self.migrator).spawn();
    }

    pub fn is_responsible(&self, key: &str) -> Result<bool, NodeError> {
        let owner = self
            .gossip
            .get_responsible_node(key)
            .map_err(|_| NodeError::EmptyRing)?;
        Ok(owner.node_id == self.node_id)
    }

    pub fn put(&self, key: String, value: String) -> Result<(), NodeError> {
        if !self.is_responsible(&key)? {
            return Err(NodeError::NotOwner);
        }
        self.storage.put(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String, NodeError> {
        if !self.is_responsible(key)? {
            return Err(NodeError::NotOwner);
        }
        self.storage.get(key).ok_or(NodeError::NotFound)
    }

    pub fn routing_version(&self) -> u64 {
        self.gossip.routing_version()
    }

    pub fn routing_table_snapshot(&self) -> crate::routing::RoutingTableSnapshot {
        self.gossip.snapshot_routing_table()
    }

    /// Best-effort lookup of a key's current owner, for handing a
    /// misdirected caller a redirect target. `None` only on an empty ring.
    pub fn gossip_owner_or_empty(&self, key: &str) -> Option<crate::routing::NodeMeta> {
        self.gossip.get_responsible_node(key).ok()
    }

    /// Handle an inbound `/gossip` payload.
    pub fn receive_gossip(&self, payload: crate::gossip::GossipPayload) {
        self.gossip.receive_gossip(payload);
    }

    /// Handle an inbound `/join`: admit the new peer and fan the updated
    /// table out immediately instead of waiting for the next gossip tick.
    pub async fn admit_peer(&self, host: &str, port: u16) {
        self.gossip.admit_node(host, port).await;
    }

    /// Given the caller's last-known routing version (from the
    /// `Routing-Version` request header), return a fresh snapshot if ours
    /// is newer, or `None` if the caller is already current.
    pub fn refresh_if_stale(&self, client_version: Option<u64>) -> Option<crate::routing::RoutingTableSnapshot> {
        let current = self.routing_version();
        match client_version {
            Some(v) if v >= current => None,
            _ => Some(self.routing_table_snapshot()),
        }
    }

    /// Contact the configured bootstrap node, fetch its routing table, and
    /// join the ring through it. A bootstrap node joining against itself
    /// (first node in the cluster) is a no-op.
    pub async fn bootstrap_join(&self, bootstrap_host: &str, bootstrap_port: u16) -> Result<(), NodeError> {
        if bootstrap_host == self.host && bootstrap_port == self.port {
            return Ok(());
        }

        let join_url = format!("http://{bootstrap_host}:{bootstrap_port}/join");
        let resp = self
            .http
            .post(&join_url)
            .json(&serde_json::json!({ "host": self.host, "port": self.port }))
            .send()
            .await
            .map_err(|e| NodeError::BootstrapFailure(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NodeError::BootstrapFailure(format!(
                "bootstrap node returned {}",
                resp.status()
            )));
        }

        let snapshot: crate::routing::RoutingTableSnapshot = resp
            .json()
            .await
            .map_err(|e| NodeError::BootstrapFailure(e.to_string()))?;

        // The bootstrap node's `/join` handler already admitted us before
        // returning this snapshot, so a plain replace/merge is enough.
        self.gossip.receive_gossip(crate::gossip::GossipPayload {
            sender: format!("{bootstrap_host}:{bootstrap_port}"),
            heartbeat_map: std::collections::HashMap::new(),
            routing_table: snapshot,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(port: u16) -> NodeConfig {
        NodeConfig {
            host: "127.0.0.1".to_string(),
            port,
            bootstrap_host: "127.0.0.1".to_string(),
            bootstrap_port: port,
        }
    }

    #[test]
    fn single_node_owns_every_key() {
        let node = Node::new(&test_config(9100));
        assert!(node.is_responsible("anything").unwrap());
        node.put("k".to_string(), "v".to_string()).unwrap();
        assert_eq!(node.get("k").unwrap(), "v");
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let node = Node::new(&test_config(9101));
        assert!(matches!(node.get("missing"), Err(NodeError::NotFound)));
    }

    #[test]
    fn refresh_if_stale_reports_none_when_caller_is_current() {
        let node = Node::new(&test_config(9102));
        let current = node.routing_version();
        assert!(node.refresh_if_stale(Some(current)).is_none());
        assert!(node.refresh_if_stale(Some(current - 1)).is_some());
        assert!(node.refresh_if_stale(None).is_some());
    }
}
