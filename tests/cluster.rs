//! End-to-end tests driving two in-process nodes over real TCP sockets,
//! exercising join, gossip convergence, and migration together.

use std::sync::Arc;
use std::time::Duration;

use ringstore::config::NodeConfig;
use ringstore::node::Node;
use ringstore::server::build_router;

async fn spawn_node(port: u16, bootstrap_port: u16) -> Arc<Node> {
    let config = NodeConfig {
        host: "127.0.0.1".to_string(),
        port,
        bootstrap_host: "127.0.0.1".to_string(),
        bootstrap_port,
    };
    let node = Node::new(&config);
    node.bootstrap_join(&config.bootstrap_host, config.bootstrap_port)
        .await
        .expect("bootstrap join should succeed against a running seed");
    Arc::clone(&node).start_background_tasks();

    let app = build_router(Arc::clone(&node));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    node
}

async fn spawn_seed(port: u16) -> Arc<Node> {
    let config = NodeConfig {
        host: "127.0.0.1".to_string(),
        port,
        bootstrap_host: "127.0.0.1".to_string(),
        bootstrap_port: port,
    };
    let node = Node::new(&config);
    Arc::clone(&node).start_background_tasks();
    let app = build_router(Arc::clone(&node));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    node
}

#[tokio::test]
async fn s6_migrates_keys_when_ownership_moves() {
    let seed = spawn_seed(18000).await;

    // Find a key that the seed currently owns.
    let key = (0..1000u64)
        .map(|i| format!("k{i}"))
        .find(|k| seed.is_responsible(k).unwrap_or(false))
        .expect("seed should own at least one of 1000 probe keys");
    seed.put(key.clone(), "v".to_string()).unwrap();
    assert_eq!(seed.get(&key).unwrap(), "v");

    // Bring in a second node until it actually takes ownership of the key
    // (a single extra node only wins a fraction of the ring by chance).
    let mut joiner_port = 18001u16;
    let mut joiner = spawn_node(joiner_port, 18000).await;
    let mut attempts = 0;
    while seed.is_responsible(&key).unwrap_or(true) && attempts < 20 {
        tokio::time::sleep(Duration::from_millis(200)).await;
        attempts += 1;
        if attempts == 10 {
            // Second joiner in case one extra node's vnodes didn't cover
            // this particular key's arc.
            joiner_port += 1;
            joiner = spawn_node(joiner_port, 18000).await;
        }
    }
    let _ = &joiner;

    assert!(
        !seed.is_responsible(&key).unwrap_or(true),
        "key should have changed owners after a node joined"
    );

    // Give the migrator a few cycles to notice and relocate.
    for _ in 0..30 {
        if seed.get(&key).is_err() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    assert!(
        matches!(seed.get(&key), Err(ringstore::NodeError::NotOwner)),
        "seed should no longer own the key after migration"
    );
}

#[tokio::test]
async fn join_converges_routing_tables_via_gossip() {
    let seed = spawn_seed(18100).await;
    let joiner = spawn_node(18101, 18100).await;

    let mut converged = false;
    for _ in 0..30 {
        if seed.routing_table_snapshot().nodes.len() == 2
            && joiner.routing_table_snapshot().nodes.len() == 2
        {
            converged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert!(converged, "both nodes should converge on a 2-node ring");
}
