//! `ringstore-client <seed-host:port> [more-seeds...]` — interactive REPL.

use ringstore::config::VIRTUAL_NODE_REPLICAS;
use ringstore::SmartClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let seeds: Vec<String> = std::env::args().skip(1).collect();
    let seeds = if seeds.is_empty() {
        vec![ringstore::config::DEFAULT_BOOTSTRAP.to_string()]
    } else {
        seeds
    };

    let mut client = SmartClient::new(seeds, VIRTUAL_NODE_REPLICAS);
    client.run_repl().await
}
