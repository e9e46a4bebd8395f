//! `ringstore-node <host> <port>` — runs one cluster member.

use std::sync::Arc;

use ringstore::config::NodeConfig;
use ringstore::node::Node;
use ringstore::server::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args
        .next()
        .unwrap_or_else(|| "8000".to_string())
        .parse()
        .map_err(|_| anyhow::anyhow!("port must be a u16"))?;

    let config = NodeConfig::from_args(host, port)?;
    tracing::info!(node_id = %config.node_id(), bootstrap = %format!("{}:{}", config.bootstrap_host, config.bootstrap_port), "starting node");

    let node: Arc<Node> = Node::new(&config);
    if let Err(err) = node.bootstrap_join(&config.bootstrap_host, config.bootstrap_port).await {
        tracing::warn!(error = %err, "bootstrap join failed, starting as a standalone ring");
    }
    Arc::clone(&node).start_background_tasks();

    let app = build_router(Arc::clone(&node));
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
