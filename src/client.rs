//! `SmartClient`: a routing-aware client that keeps a local copy of the
//! ring and talks directly to the owning node instead of round-tripping
//! through an arbitrary member.

use std::io::{self, Write};

use crate::config::split_host_port;
use crate::routing::{NodeMeta, RoutingTable, RoutingTableSnapshot};

/// Thin reqwest wrapper that caches a routing table and refreshes it on
/// demand (or when a request comes back redirecting to a different owner).
pub struct SmartClient {
    http: reqwest::Client,
    known_nodes: Vec<String>,
    cached_table: Option<RoutingTableSnapshot>,
    replica_factor: usize,
    /// The version of the routing table we last saw, piggybacked on every
    /// request so a node can tell us whether we're behind.
    version: u64,
}

impl SmartClient {
    pub fn new(seed_nodes: Vec<String>, replica_factor: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            known_nodes: seed_nodes,
            cached_table: None,
            replica_factor,
            version: 0,
        }
    }

    /// Fetch the routing table from the first reachable seed node.
    pub async fn refresh(&mut self) -> anyhow::Result<()> {
        for node_id in self.known_nodes.clone() {
            let (host, port) = split_host_port(&node_id)?;
            let url = format!("http://{host}:{port}/routing_table");
            if let Ok(resp) = self.http.get(&url).send().await {
                if let Ok(snapshot) = resp.json::<RoutingTableSnapshot>().await {
                    self.version = snapshot.version;
                    self.cached_table = Some(snapshot);
                    return Ok(());
                }
            }
        }
        anyhow::bail!("no seed node was reachable")
    }

    /// Mirror of `client.py`'s `_check_routing_update`: a response body may
    /// carry a fresher `routing_table` than the one we cached, piggybacked
    /// by the node that answered us. Adopt it only if it is strictly newer,
    /// so a stale reply from a slow node can't clobber a fresher table.
    fn check_routing_update(&mut self, body: &serde_json::Value) {
        let Some(table) = body.get("routing_table") else {
            return;
        };
        let Ok(snapshot) = serde_json::from_value::<RoutingTableSnapshot>(table.clone()) else {
            return;
        };
        if snapshot.version > self.version {
            self.version = snapshot.version;
            self.cached_table = Some(snapshot);
        }
    }

    fn owner_for(&self, key: &str) -> anyhow::Result<NodeMeta> {
        let snapshot = self
            .cached_table
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("routing table not loaded; call refresh() first"))?;

        // Reconstruct a local RoutingTable from the cached snapshot so we
        // can reuse the real ring-walk instead of duplicating the logic.
        let mut nodes = snapshot.nodes.iter();
        let first = nodes
            .next()
            .ok_or_else(|| anyhow::anyhow!("cached routing table is empty"))?;
        let mut table = RoutingTable::new(first.host.clone(), first.port, self.replica_factor);
        for node in nodes {
            table.add_node(node.host.clone(), node.port);
        }
        Ok(table.get_responsible_node(key)?)
    }

    pub async fn put(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.cached_table.is_none() {
            self.refresh().await?;
        }
        let owner = self.owner_for(key)?;
        let url = format!("http://{}:{}/kv", owner.host, owner.port);
        let resp = self
            .http
            .put(&url)
            .header("Routing-Version", self.version.to_string())
            .json(&serde_json::json!({ "key": key, "value": value }))
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("put failed: {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await?;
        self.check_routing_update(&body);
        Ok(())
    }

    pub async fn get(&mut self, key: &str) -> anyhow::Result<Option<String>> {
        if self.cached_table.is_none() {
            self.refresh().await?;
        }
        let owner = self.owner_for(key)?;
        let url = format!("http://{}:{}/kv?key={key}", owner.host, owner.port);
        let resp = self
            .http
            .get(&url)
            .header("Routing-Version", self.version.to_string())
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("get failed: {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await?;
        self.check_routing_update(&body);
        Ok(body.get("value").and_then(|v| v.as_str()).map(str::to_string))
    }

    pub fn show_ring(&self) -> String {
        match &self.cached_table {
            None => "routing table not loaded; run `refresh` first".to_string(),
            Some(snapshot) => {
                let mut out = format!("version={} uid={}\n", snapshot.version, snapshot.uid);
                for node in &snapshot.nodes {
                    out.push_str(&format!("  {}\n", node.node_id));
                }
                out
            }
        }
    }

    /// Interactive REPL: `put key value`, `get key`, `ring`, `refresh`, `quit`.
    pub async fn run_repl(&mut self) -> anyhow::Result<()> {
        self.refresh().await?;
        println!("connected. commands: put <key> <value> | get <key> | ring | refresh | quit");

        let stdin = io::stdin();
        loop {
            print!("> ");
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.read_line(&mut line)? == 0 {
                break;
            }
            let parts: Vec<&str> = line.trim().split_whitespace().collect();
            match parts.as_slice() {
                ["put", key, value] => match self.put(key, value).await {
                    Ok(()) => println!("ok"),
                    Err(e) => println!("error: {e}"),
                },
                ["get", key] => match self.get(key).await {
                    Ok(Some(v)) => println!("{v}"),
                    Ok(None) => println!("(not found)"),
                    Err(e) => println!("error: {e}"),
                },
                ["ring"] => print!("{}", self.show_ring()),
                ["refresh"] => match self.refresh().await {
                    Ok(()) => println!("ok"),
                    Err(e) => println!("error: {e}"),
                },
                ["quit"] | ["exit"] => break,
                [] => {}
                _ => println!("unrecognized command"),
            }
        }
        Ok(())
    }
}
