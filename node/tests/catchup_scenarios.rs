use replica_kernel::fixtures::{sample_entries, sample_entry, sample_entry_variant};
use replica_kernel::types::{LedgerEntry, NodeId, SeqNo, TableName};
use replica_node::catchup::{CatchupCoordinator, CatchupProgress};
use replica_node::config::{CatchupConfig, VerifyConfig};
use replica_node::errors::NodeError;
use replica_node::lifecycle::{LifecycleController, NodeState};
use replica_node::store::{NodeStore, WipeScope};
use replica_node::transport::{Fault, LocalTransport};
use replica_node::verifier::TableSelector;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn fast_catchup() -> CatchupConfig {
    CatchupConfig {
        batch_size: 8,
        peer_timeout_ms: 200,
        peer_backoff_ms: 20,
        peer_backoff_max_ms: 100,
        round_interval_ms: 20,
        catchup_timeout_ms: 5_000,
        connect_timeout_ms: 200,
        ..Default::default()
    }
}

fn fast_verify() -> VerifyConfig {
    VerifyConfig {
        timeout_ms: 1_000,
        rpc_timeout_ms: 200,
        poll_initial_ms: 10,
        poll_max_ms: 100,
    }
}

fn id(s: &str) -> NodeId {
    NodeId::from(s)
}

async fn node(dir: &TempDir, name: &str, entries: &[LedgerEntry]) -> Arc<NodeStore> {
    let store = NodeStore::open(id(name), dir.path()).unwrap();
    if !entries.is_empty() {
        store.apply_batch(entries).await.unwrap();
    }
    Arc::new(store)
}

/// A, B and C, each listing the other two as peers.
async fn cluster(dir: &TempDir, a: &[LedgerEntry], b: &[LedgerEntry], c: &[LedgerEntry]) -> LifecycleController {
    let controller = LifecycleController::new(Arc::new(LocalTransport::new()), fast_catchup(), fast_verify());
    controller.add_node(node(dir, "a", a).await, vec![id("b"), id("c")]);
    controller.add_node(node(dir, "b", b).await, vec![id("a"), id("c")]);
    controller.add_node(node(dir, "c", c).await, vec![id("a"), id("b")]);
    controller
}

fn forked(size: SeqNo, from: SeqNo) -> Vec<LedgerEntry> {
    (1..=size)
        .map(|s| if s < from { sample_entry(s) } else { sample_entry_variant(s, 1) })
        .collect()
}

#[tokio::test]
async fn test_wiped_node_catches_up_to_peers() {
    let _ = tracing_subscriber::fmt().with_env_filter("replica_node=debug").try_init();
    let dir = tempdir().unwrap();
    let controller = cluster(&dir, &sample_entries(1, 50), &sample_entries(1, 60), &sample_entries(1, 60)).await;
    let a = id("a");

    let report = controller
        .restart_with_wipe(&a, WipeScope::ProjectionAndLedger, TableSelector::AllTables)
        .await
        .unwrap();

    assert!(report.consistent, "divergences: {:?}", report.divergences);
    assert_eq!(controller.state(&a).unwrap(), NodeState::Verified);

    let views: Vec<_> = ["a", "b", "c"].iter().map(|n| report.view(&id(n)).unwrap()).collect();
    for table in [TableName::Identity, TableName::Attribute] {
        assert_eq!(views[0].digest(table), views[1].digest(table));
        assert_eq!(views[0].digest(table), views[2].digest(table));
        assert!(views[0].digest(table).records > 0);
    }
    assert_eq!(views[0].ledger_size, 60);
    assert_eq!(views[0].ledger_root, views[1].ledger_root);
}

#[tokio::test]
async fn test_unreachable_peer_is_skipped() {
    let dir = tempdir().unwrap();
    let controller = cluster(&dir, &sample_entries(1, 50), &sample_entries(1, 60), &sample_entries(1, 60)).await;
    let (a, b, c) = (id("a"), id("b"), id("c"));
    controller.transport().set_online(&b, false);

    controller.stop(&a).await.unwrap();
    controller.wipe(&a, WipeScope::ProjectionAndLedger).await.unwrap();
    let handle = controller.start(&a).await.unwrap().expect("wiped node catches up");
    let report = handle.wait().await.unwrap();

    assert_eq!(report.start_size, 0);
    assert_eq!(report.final_size, 60);
    assert_eq!(report.entries_applied, 60);
    assert_eq!(report.unavailable_peers, vec![b.clone()]);
    assert_eq!(controller.state(&a).unwrap(), NodeState::CaughtUp);

    let compare = controller.compare_projections(&[a.clone(), c], TableSelector::AllTables).await;
    assert!(compare.consistent);

    // With B still down, verifying A against all its peers reports B.
    let report = controller.verify(&a, TableSelector::AllTables).await.unwrap();
    assert!(!report.consistent);
    assert_eq!(report.diverging_nodes(), vec![b]);
    assert_eq!(controller.state(&a).unwrap(), NodeState::CaughtUp);
}

#[tokio::test]
async fn test_fork_is_located_by_catchup_and_compare() {
    let dir = tempdir().unwrap();
    let controller = cluster(&dir, &sample_entries(1, 29), &sample_entries(1, 60), &forked(60, 30)).await;
    let (a, b, c) = (id("a"), id("b"), id("c"));

    let compare = controller.compare_projections(&[b.clone(), c.clone()], TableSelector::AllTables).await;
    assert!(!compare.consistent);
    assert_eq!(compare.forks.len(), 1);
    assert_eq!(compare.forks[0].seq, 30);
    match compare.into_result() {
        Err(NodeError::LedgerFork { seq, .. }) => assert_eq!(seq, 30),
        other => panic!("expected fork, got {:?}", other.map(|r| r.consistent)),
    }

    controller.stop(&a).await.unwrap();
    controller.wipe(&a, WipeScope::ProjectionAndLedger).await.unwrap();
    let handle = controller.start(&a).await.unwrap().expect("wiped node catches up");
    match handle.wait().await {
        Err(NodeError::LedgerFork { seq, left, right, .. }) => {
            assert_eq!(seq, 30);
            assert_eq!((left, right), (b, c));
        }
        other => panic!("expected fork, got {:?}", other.map(|r| r.final_size)),
    }
    assert!(controller.state(&a).unwrap().is_degraded());

    // Degraded only allows stop.
    assert!(matches!(
        controller.verify(&a, TableSelector::AllTables).await,
        Err(NodeError::Degraded { .. })
    ));
    controller.stop(&a).await.unwrap();

    // Unequal sizes: C stops one entry short of its forked history.
    let uneven_dir = tempdir().unwrap();
    let uneven = cluster(&uneven_dir, &sample_entries(1, 60), &sample_entries(1, 60), &forked(59, 30)).await;
    let compare = uneven
        .compare_projections(&[id("a"), id("b"), id("c")], TableSelector::AllTables)
        .await;
    assert!(!compare.consistent);
    assert_eq!(compare.forks.len(), 1);
    assert_eq!((compare.forks[0].left.clone(), compare.forks[0].right.clone()), (id("a"), id("c")));
    assert_eq!(compare.forks[0].seq, 30);
    assert!(compare.divergences.is_empty());
    assert!(matches!(compare.into_result(), Err(NodeError::LedgerFork { seq: 30, .. })));
}

#[tokio::test]
async fn test_local_entry_conflicting_with_quorum_is_a_fork() {
    let dir = tempdir().unwrap();
    // A holds the forked history up to 40; B and C agree on the original.
    let controller = cluster(&dir, &forked(40, 30), &sample_entries(1, 60), &sample_entries(1, 60)).await;
    let a = id("a");

    let handle = controller.start_catchup(&a).await.unwrap();
    match handle.wait().await {
        Err(NodeError::LedgerFork { seq, .. }) => assert_eq!(seq, 30),
        other => panic!("expected fork, got {:?}", other.map(|r| r.final_size)),
    }
}

#[tokio::test]
async fn test_faulty_peers_are_retried_elsewhere() {
    let dir = tempdir().unwrap();
    let controller = cluster(&dir, &[], &sample_entries(1, 60), &sample_entries(1, 60)).await;
    let (a, b, c) = (id("a"), id("b"), id("c"));
    controller.transport().set_fault(&b, Fault::ShortBatch);
    controller.transport().set_fault(&c, Fault::Reorder);

    let handle = controller.start_catchup(&a).await.unwrap();
    // Let both misbehave for a while, then heal C.
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.transport().set_fault(&c, Fault::None);

    let report = handle.wait().await.unwrap();
    assert_eq!(report.final_size, 60);

    let store = controller.store(&a).unwrap();
    assert_eq!(store.applied_seq().await, 60);
    let compare = controller.compare_projections(&[a, b, c], TableSelector::AllTables).await;
    assert!(compare.consistent);
}

#[tokio::test]
async fn test_hanging_peer_times_out_and_catchup_completes() {
    let dir = tempdir().unwrap();
    let controller = cluster(&dir, &sample_entries(1, 10), &sample_entries(1, 40), &sample_entries(1, 40)).await;
    let (a, b) = (id("a"), id("b"));
    controller.transport().set_fault(&b, Fault::Hang);

    let report = controller.start_catchup(&a).await.unwrap().wait().await.unwrap();
    assert_eq!(report.final_size, 40);
    assert!(report.unavailable_peers.contains(&b));
}

#[tokio::test]
async fn test_no_quorum_times_out() {
    let dir = tempdir().unwrap();
    let controller = cluster(&dir, &sample_entries(1, 5), &sample_entries(1, 20), &sample_entries(1, 20)).await;
    let (a, b, c) = (id("a"), id("b"), id("c"));
    controller.transport().set_online(&b, false);
    controller.transport().set_online(&c, false);

    let store = controller.store(&a).unwrap();
    let config = CatchupConfig {
        max_rounds: 3,
        quorum: Some(2),
        ..fast_catchup()
    };
    let coordinator = CatchupCoordinator::new(store, controller.transport().clone(), vec![b, c], config);
    match coordinator.spawn().wait().await {
        Err(NodeError::CatchupTimeout { rounds, local, .. }) => {
            assert_eq!(rounds, 3);
            assert_eq!(local, 5);
        }
        other => panic!("expected timeout, got {:?}", other.map(|r| r.final_size)),
    }
}

#[tokio::test]
async fn test_cancel_keeps_applied_prefix() {
    let dir = tempdir().unwrap();
    let controller = cluster(&dir, &[], &sample_entries(1, 400), &sample_entries(1, 400)).await;
    let (a, b, c) = (id("a"), id("b"), id("c"));
    controller.transport().set_delay(&b, Some(Duration::from_millis(15)));
    controller.transport().set_delay(&c, Some(Duration::from_millis(15)));

    let handle = controller.start_catchup(&a).await.unwrap();
    let mut progress = handle.progress();
    progress
        .wait_for(|p| matches!(p, CatchupProgress::Fetching { local, .. } if *local >= 16))
        .await
        .unwrap();
    handle.cancel();

    let applied = match handle.wait().await {
        Err(NodeError::Cancelled { applied, .. }) => applied,
        other => panic!("expected cancellation, got {:?}", other.map(|r| r.final_size)),
    };

    let store = controller.store(&a).unwrap();
    assert!(applied >= 16 && applied < 400);
    assert_eq!(store.ledger_size(), applied);
    assert_eq!(store.applied_seq().await, applied);
    assert!(controller.state(&a).unwrap().is_degraded());
}

#[tokio::test]
async fn test_stop_cancels_running_catchup() {
    let dir = tempdir().unwrap();
    let controller = cluster(&dir, &[], &sample_entries(1, 400), &sample_entries(1, 400)).await;
    let (a, b) = (id("a"), id("b"));
    controller.transport().set_delay(&b, Some(Duration::from_millis(15)));

    let handle = controller.start_catchup(&a).await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    controller.stop(&a).await.unwrap();

    assert_eq!(controller.state(&a).unwrap(), NodeState::Stopped);
    assert!(matches!(handle.wait().await, Err(NodeError::Cancelled { .. })));
}
