use replica_kernel::fixtures::sample_entries;
use replica_kernel::types::{FieldValue, NodeId, TableName};
use replica_node::catchup::{CatchupCoordinator, CatchupProgress};
use replica_node::config::{CatchupConfig, VerifyConfig};
use replica_node::errors::NodeError;
use replica_node::lifecycle::{shutdown_store, LifecycleController, NodeState};
use replica_persistence::snapshot;
use replica_node::store::{NodeStore, WipeScope, SNAPSHOT_FILE};
use replica_node::transport::LocalTransport;
use replica_node::verifier::{DivergenceKind, TableSelector};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn id(s: &str) -> NodeId {
    NodeId::from(s)
}

async fn controller(dir: &TempDir, size: u64) -> LifecycleController {
    let catchup = CatchupConfig {
        batch_size: 16,
        peer_timeout_ms: 200,
        round_interval_ms: 20,
        connect_timeout_ms: 200,
        catchup_timeout_ms: 5_000,
        ..Default::default()
    };
    let verify = VerifyConfig {
        timeout_ms: 300,
        rpc_timeout_ms: 100,
        poll_initial_ms: 10,
        poll_max_ms: 50,
    };
    let controller = LifecycleController::new(Arc::new(LocalTransport::new()), catchup, verify);
    for (name, peers) in [("a", ["b", "c"]), ("b", ["a", "c"]), ("c", ["a", "b"])] {
        let store = NodeStore::open(id(name), dir.path()).unwrap();
        store.apply_batch(&sample_entries(1, size)).await.unwrap();
        controller.add_node(Arc::new(store), peers.iter().map(|p| id(p)).collect());
    }
    controller
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let dir = tempdir().unwrap();
    let controller = controller(&dir, 10).await;
    let a = id("a");

    let err = controller.wipe(&a, WipeScope::ProjectionOnly).await.unwrap_err();
    match err {
        NodeError::InvalidTransition { node, from, action } => {
            assert_eq!(node, a);
            assert_eq!(from, "running");
            assert_eq!(action, "wipe");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(matches!(
        controller.start(&a).await,
        Err(NodeError::InvalidTransition { .. })
    ));

    controller.stop(&a).await.unwrap();
    assert!(matches!(controller.stop(&a).await, Err(NodeError::InvalidTransition { .. })));
    assert!(matches!(
        controller.verify(&a, TableSelector::AllTables).await,
        Err(NodeError::InvalidTransition { .. })
    ));
    assert!(matches!(
        controller.start_catchup(&a).await,
        Err(NodeError::InvalidTransition { .. })
    ));

    assert!(matches!(
        controller.state(&id("nobody")),
        Err(NodeError::UnknownNode(_))
    ));
}

#[tokio::test]
async fn test_stop_takes_node_offline_and_snapshots() {
    let dir = tempdir().unwrap();
    let controller = controller(&dir, 25).await;
    let a = id("a");

    controller.stop(&a).await.unwrap();
    assert!(!controller.transport().is_online(&a));
    assert!(dir.path().join("a").join(SNAPSHOT_FILE).exists());

    // Peers see the stopped node as unreachable.
    let report = controller
        .compare_projections(&[id("b"), a.clone()], TableSelector::AllTables)
        .await;
    assert!(matches!(
        report.divergences[0].kind,
        DivergenceKind::Unreachable { .. }
    ));

    // Restart without a wipe: already at the quorum size.
    assert!(controller.start(&a).await.unwrap().is_none());
    assert_eq!(controller.state(&a).unwrap(), NodeState::CaughtUp);
    assert!(controller.transport().is_online(&a));
    assert_eq!(controller.node_view(&a).await.unwrap().ledger_size, 25);
}

#[tokio::test]
async fn test_projection_wipe_rebuilds_from_ledger() {
    let dir = tempdir().unwrap();
    let controller = controller(&dir, 30).await;
    let a = id("a");
    let before = controller.node_view(&a).await.unwrap();

    controller.stop(&a).await.unwrap();
    controller.wipe_projection_store(&a).await.unwrap();
    assert_eq!(
        controller.state(&a).unwrap(),
        NodeState::Wiped {
            scope: WipeScope::ProjectionOnly
        }
    );
    assert!(!dir.path().join("a").join(SNAPSHOT_FILE).exists());

    let mut states = controller.subscribe(&a).unwrap();
    if let Some(handle) = controller.start(&a).await.unwrap() {
        handle.wait().await.unwrap();
    }
    assert_eq!(*states.borrow_and_update(), NodeState::CaughtUp);

    let after = controller.node_view(&a).await.unwrap();
    assert_eq!(before, after);

    let report = controller.verify(&a, TableSelector::AllTables).await.unwrap();
    assert!(report.consistent);
    assert_eq!(controller.state(&a).unwrap(), NodeState::Verified);
}

#[tokio::test]
async fn test_restart_with_wipe_verifies() {
    let dir = tempdir().unwrap();
    let controller = controller(&dir, 40).await;
    let b = id("b");

    let report = controller
        .restart_with_wipe(&b, WipeScope::ProjectionAndLedger, TableSelector::Table(TableName::Identity))
        .await
        .unwrap();
    assert!(report.consistent);
    assert_eq!(report.selector, TableSelector::Table(TableName::Identity));
    assert_eq!(controller.state(&b).unwrap(), NodeState::Verified);
    assert_eq!(controller.store(&b).unwrap().ledger_size(), 40);
}

#[tokio::test]
async fn test_tampered_field_is_pinpointed() {
    let dir = tempdir().unwrap();
    let controller = controller(&dir, 40).await;
    let (a, b, c) = (id("a"), id("b"), id("c"));

    let store = controller.store(&b).unwrap();
    assert!(
        store
            .tamper(TableName::Identity, "did2", "verkey", FieldValue::Text("~forged".into()))
            .await
    );

    let report = controller
        .compare_projections(&[a.clone(), b.clone(), c.clone()], TableSelector::AllTables)
        .await;
    assert!(!report.consistent);
    assert!(report.forks.is_empty());
    assert_eq!(report.reference, Some(a.clone()));
    assert_eq!(report.digest_mismatches(), vec![(b.clone(), TableName::Identity)]);

    // Only the selected table is compared.
    let attrs = controller
        .compare_projections(&[a.clone(), b.clone()], TableSelector::Table(TableName::Attribute))
        .await;
    assert!(attrs.consistent);

    let diff = controller.diff_records(&a, &b, TableName::Identity).await.unwrap();
    assert_eq!(diff.diverging_keys(), vec!["did2"]);
    assert_eq!(diff.changed[0].fields.len(), 1);
    assert_eq!(diff.changed[0].fields[0].field, "verkey");
    assert_eq!(
        diff.changed[0].fields[0].right,
        Some(FieldValue::Text("~forged".into()))
    );

    // A divergence is a report, not a state change.
    let report = controller.verify(&b, TableSelector::AllTables).await.unwrap();
    assert!(!report.consistent);
    assert_eq!(controller.state(&b).unwrap(), NodeState::Running);

    // A projection wipe and rebuild repairs it.
    let report = controller
        .restart_with_wipe(&b, WipeScope::ProjectionOnly, TableSelector::AllTables)
        .await
        .unwrap();
    assert!(report.consistent);
}

#[tokio::test]
async fn test_shutdown_cancels_catchup_before_snapshot() {
    let dir = tempdir().unwrap();
    let transport = Arc::new(LocalTransport::new());
    let peer = NodeStore::open(id("b"), dir.path()).unwrap();
    peer.apply_batch(&sample_entries(1, 400)).await.unwrap();
    transport.register(Arc::new(peer));
    transport.set_delay(&id("b"), Some(Duration::from_millis(15)));

    let store = Arc::new(NodeStore::open(id("a"), dir.path()).unwrap());
    let config = CatchupConfig {
        batch_size: 16,
        peer_timeout_ms: 500,
        round_interval_ms: 20,
        catchup_timeout_ms: 10_000,
        ..Default::default()
    };
    let handle = CatchupCoordinator::new(store.clone(), transport, vec![id("b")], config).spawn();
    let mut progress = handle.progress();
    progress
        .wait_for(|p| matches!(p, CatchupProgress::Fetching { local, .. } if *local >= 16))
        .await
        .unwrap();

    let seq = shutdown_store(&store, Some(handle)).await.unwrap();
    assert!(seq >= 16 && seq < 400);
    assert_eq!(store.ledger_size(), seq);
    let saved = snapshot::load(store.snapshot_path()).unwrap().unwrap();
    assert_eq!(saved.store.applied_seq(), seq);

    // The coordinator is gone: nothing is applied after shutdown returns.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.ledger_size(), seq);
}
