// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use replica_node::catchup::CatchupCoordinator;
use replica_node::config::NodeConfig;
use replica_node::lifecycle::{shutdown_store, NodeState};
use replica_node::network::HttpTransport;
use replica_node::server::build_router;
use replica_node::store::NodeStore;
use replica_node::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_telemetry();

    let cfg = NodeConfig::from_env()?;
    tracing::info!("Initializing replica node with config: {:?}", cfg);

    let store = Arc::new(NodeStore::open(cfg.node_id.clone(), &cfg.data_dir)?);
    let (state_tx, state_rx) = watch::channel(NodeState::Running);
    let state_tx = Arc::new(state_tx);

    let mut catchup = None;
    if cfg.catchup_on_start && !cfg.peers.is_empty() {
        let transport = Arc::new(HttpTransport::new(&cfg.peers, cfg.catchup.peer_timeout()));
        let coordinator = CatchupCoordinator::new(store.clone(), transport, cfg.peer_ids(), cfg.catchup.clone());
        state_tx.send_replace(NodeState::CatchingUp);
        let hook = state_tx.clone();
        // Serve while catching up; peers only ever see fully applied entries.
        catchup = Some(coordinator.spawn_with(move |result| {
            let next = match result {
                Ok(_) => NodeState::CaughtUp,
                Err(e) => NodeState::Degraded { reason: e.to_string() },
            };
            hook.send_replace(next);
        }));
    }

    let app = build_router(store.clone(), state_rx);

    let addr = cfg.bind_addr;
    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let seq = shutdown_store(&store, catchup).await?;
    state_tx.send_replace(NodeState::Stopped);
    tracing::info!("Shut down with projection at seq {}", seq);
    Ok(())
}
