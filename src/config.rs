//! Cluster-wide constants and per-process node configuration.

use std::time::Duration;

/// Number of peers a node gossips to per round.
pub const GOSSIP_FANOUT: usize = 3;

/// Interval between local heartbeat counter advances.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Interval between gossip rounds.
pub const GOSSIP_INTERVAL: Duration = Duration::from_secs(2);

/// Interval between failure-detector sweeps. The source disagreed on a
/// hardcoded 3s vs. a configurable interval; this crate commits to
/// configurable, defaulted to 3s.
pub const FAILURE_DETECT_INTERVAL: Duration = Duration::from_secs(3);

/// Soft-suspect threshold. Surfaced for observability only; does not evict.
pub const FAILURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard-dead threshold. Crossing this evicts the peer from the routing
/// table and clears its gossip bookkeeping.
pub const FAILURE_HARD_DEAD: Duration = Duration::from_secs(15);

/// Virtual replicas created per physical node.
pub const VIRTUAL_NODE_REPLICAS: usize = 100;

/// Interval between data-migrator passes.
pub const MIGRATION_INTERVAL: Duration = Duration::from_secs(5);

/// Send timeout for a single gossip POST.
pub const GOSSIP_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for the bootstrap GET against `/routing_table`.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Default single hardcoded bootstrap address, overridable via
/// `RINGSTORE_BOOTSTRAP` (`host:port`).
pub const DEFAULT_BOOTSTRAP: &str = "127.0.0.1:8000";

/// Per-process configuration for a `ringstore-node` instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub bootstrap_host: String,
    pub bootstrap_port: u16,
}

impl NodeConfig {
    /// Build configuration from CLI args (`host port`) and the
    /// `RINGSTORE_BOOTSTRAP` environment variable, loading a `.env` file
    /// first if present.
    pub fn from_args(host: String, port: u16) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let bootstrap =
            std::env::var("RINGSTORE_BOOTSTRAP").unwrap_or_else(|_| DEFAULT_BOOTSTRAP.to_string());
        let (bootstrap_host, bootstrap_port) = split_host_port(&bootstrap)?;

        Ok(Self {
            host,
            port,
            bootstrap_host,
            bootstrap_port,
        })
    }

    pub fn node_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Split a `"host:port"` string, matching `utils.get_host_port` semantics.
pub fn split_host_port(node_id: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = node_id
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("invalid node ID: {node_id}"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid node ID: {node_id}"))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_valid_node_id() {
        let (host, port) = split_host_port("127.0.0.1:8000").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 8000);
    }

    #[test]
    fn rejects_malformed_node_id() {
        assert!(split_host_port("not-a-node-id").is_err());
    }
}
