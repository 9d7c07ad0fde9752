// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Node lifecycle.
//!
//! ```text
//! Running -> Stopped -> [Wiped] -> Starting -> CatchingUp -> CaughtUp -> Verified
//!                                                  \_________ Degraded{reason}
//! ```
//!
//! Every operation checks the current state first and fails with
//! [`NodeError::InvalidTransition`] (or [`NodeError::Degraded`] once the node
//! is degraded) instead of acting. Lifecycle operations
//! on one node are serialized; the state itself is published on a `watch`
//! channel.

use futures::future::join_all;
use replica_kernel::diff::TableDiff;
use replica_kernel::types::{NodeId, SeqNo, TableName};
use replica_kernel::view::{LedgerStatus, NodeView};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catchup::{quorum_target, CatchupCoordinator, CatchupHandle, CatchupProgress, CatchupReport};
use crate::config::{CatchupConfig, VerifyConfig};
use crate::errors::NodeError;
use crate::store::{NodeStore, WipeScope};
use crate::transport::{with_timeout, LocalTransport, PeerTransport};
use crate::verifier::{ConsistencyReport, ConsistencyVerifier, TableSelector};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    Running,
    Stopped,
    Wiped { scope: WipeScope },
    Starting,
    CatchingUp,
    CaughtUp,
    Verified,
    /// Terminal until the node is stopped.
    Degraded { reason: String },
}

impl NodeState {
    pub fn allows(&self, action: LifecycleAction) -> bool {
        use LifecycleAction::*;
        use NodeState::*;
        match action {
            Stop => !matches!(self, Stopped | Wiped { .. } | Starting),
            Wipe => matches!(self, Stopped),
            Start => matches!(self, Stopped | Wiped { .. }),
            Catchup | Verify => matches!(self, Running | CaughtUp | Verified),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, NodeState::Degraded { .. })
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Running => f.write_str("running"),
            NodeState::Stopped => f.write_str("stopped"),
            NodeState::Wiped { scope } => write!(f, "wiped({})", scope),
            NodeState::Starting => f.write_str("starting"),
            NodeState::CatchingUp => f.write_str("catching-up"),
            NodeState::CaughtUp => f.write_str("caught-up"),
            NodeState::Verified => f.write_str("verified"),
            NodeState::Degraded { reason } => write!(f, "degraded: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Stop,
    Wipe,
    Start,
    Catchup,
    Verify,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleAction::Stop => "stop",
            LifecycleAction::Wipe => "wipe",
            LifecycleAction::Start => "start",
            LifecycleAction::Catchup => "catch up",
            LifecycleAction::Verify => "verify",
        };
        f.write_str(name)
    }
}

struct RunningCatchup {
    cancel: CancellationToken,
    progress: watch::Receiver<CatchupProgress>,
}

struct ManagedNode {
    store: Arc<NodeStore>,
    peers: Vec<NodeId>,
    state: watch::Sender<NodeState>,
    catchup: Mutex<Option<RunningCatchup>>,
    ops: tokio::sync::Mutex<()>,
}

impl ManagedNode {
    fn id(&self) -> &NodeId {
        self.store.id()
    }

    fn check(&self, action: LifecycleAction) -> Result<NodeState, NodeError> {
        let state = self.state.borrow().clone();
        if state.allows(action) {
            return Ok(state);
        }
        match state {
            NodeState::Degraded { reason } => Err(NodeError::Degraded {
                node: self.id().clone(),
                reason,
            }),
            state => Err(NodeError::InvalidTransition {
                node: self.id().clone(),
                from: state.to_string(),
                action: action.to_string(),
            }),
        }
    }

    fn set(&self, state: NodeState) {
        tracing::info!(node = %self.id(), "State -> {}", state);
        self.state.send_replace(state);
    }

    fn degrade(&self, reason: String) {
        tracing::error!(node = %self.id(), "Degraded: {}", reason);
        self.state.send_replace(NodeState::Degraded { reason });
    }

    /// Leave `CatchingUp` once the task is done; a stop that raced the task wins.
    fn finish_catchup(&self, result: &Result<CatchupReport, NodeError>) {
        if let Ok(mut slot) = self.catchup.lock() {
            slot.take();
        }
        let next = match result {
            Ok(_) => NodeState::CaughtUp,
            Err(e) => NodeState::Degraded { reason: e.to_string() },
        };
        self.state.send_if_modified(|state| {
            if *state != NodeState::CatchingUp {
                return false;
            }
            tracing::info!(node = %self.store.id(), "State -> {}", next);
            *state = next;
            true
        });
    }

    /// Cancel a running catchup and wait for its task to let go of the store.
    async fn cancel_catchup(&self) {
        let running = self.catchup.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut running) = running {
            running.cancel.cancel();
            let _ = running.progress.wait_for(|p| p.is_finished()).await;
        }
    }
}

/// Graceful process shutdown: stop the catchup first, then persist.
///
/// Returns the seq the saved projection is at.
pub async fn shutdown_store(store: &NodeStore, catchup: Option<CatchupHandle>) -> Result<SeqNo, NodeError> {
    if let Some(handle) = catchup {
        handle.cancel();
        match handle.wait().await {
            Ok(report) => tracing::info!(node = %store.id(), "Catchup finished at seq {} before shutdown", report.final_size),
            Err(NodeError::Cancelled { applied, .. }) => {
                tracing::info!(node = %store.id(), "Catchup cancelled by shutdown at seq {}", applied)
            }
            Err(e) => tracing::warn!(node = %store.id(), "Catchup ended with {} before shutdown", e),
        }
    }
    store.flush().await?;
    store.save_snapshot().await
}

/// Drives stop/wipe/start/catchup/verify for a set of in-process nodes.
pub struct LifecycleController {
    transport: Arc<LocalTransport>,
    nodes: RwLock<FxHashMap<NodeId, Arc<ManagedNode>>>,
    catchup: CatchupConfig,
    verify: VerifyConfig,
}

impl LifecycleController {
    pub fn new(transport: Arc<LocalTransport>, catchup: CatchupConfig, verify: VerifyConfig) -> Self {
        Self {
            transport,
            nodes: RwLock::new(FxHashMap::default()),
            catchup,
            verify,
        }
    }

    pub fn transport(&self) -> &Arc<LocalTransport> {
        &self.transport
    }

    /// Register a running node and the peers it catches up from.
    pub fn add_node(&self, store: Arc<NodeStore>, peers: Vec<NodeId>) -> watch::Receiver<NodeState> {
        let id = store.id().clone();
        self.transport.register(store.clone());
        let (state, rx) = watch::channel(NodeState::Running);
        let managed = Arc::new(ManagedNode {
            store,
            peers,
            state,
            catchup: Mutex::new(None),
            ops: tokio::sync::Mutex::new(()),
        });
        if let Ok(mut nodes) = self.nodes.write() {
            nodes.insert(id.clone(), managed);
        }
        tracing::info!(node = %id, "Node registered");
        rx
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .read()
            .map(|nodes| nodes.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn state(&self, node: &NodeId) -> Result<NodeState, NodeError> {
        Ok(self.managed(node)?.state.borrow().clone())
    }

    pub fn subscribe(&self, node: &NodeId) -> Result<watch::Receiver<NodeState>, NodeError> {
        Ok(self.managed(node)?.state.subscribe())
    }

    pub fn store(&self, node: &NodeId) -> Result<Arc<NodeStore>, NodeError> {
        Ok(self.managed(node)?.store.clone())
    }

    /// Flush and snapshot, then take the node offline.
    pub async fn stop(&self, node: &NodeId) -> Result<(), NodeError> {
        let managed = self.managed(node)?;
        let _op = managed.ops.lock().await;
        managed.check(LifecycleAction::Stop)?;

        self.transport.set_online(node, false);
        managed.set(NodeState::Stopped);
        managed.cancel_catchup().await;

        managed.store.flush().await?;
        let seq = managed.store.save_snapshot().await?;
        tracing::info!(node = %node, "Stopped with projection at seq {}", seq);
        Ok(())
    }

    pub async fn wipe(&self, node: &NodeId, scope: WipeScope) -> Result<(), NodeError> {
        let managed = self.managed(node)?;
        let _op = managed.ops.lock().await;
        managed.check(LifecycleAction::Wipe)?;

        managed.store.wipe(scope).await?;
        managed.set(NodeState::Wiped { scope });
        Ok(())
    }

    pub async fn wipe_projection_store(&self, node: &NodeId) -> Result<(), NodeError> {
        self.wipe(node, WipeScope::ProjectionOnly).await
    }

    /// Reload durable state, come back online and catch up if behind.
    ///
    /// Returns the running catchup, or `None` when the node was not wiped
    /// and already holds the quorum size.
    pub async fn start(&self, node: &NodeId) -> Result<Option<CatchupHandle>, NodeError> {
        let managed = self.managed(node)?;
        let _op = managed.ops.lock().await;
        let previous = managed.check(LifecycleAction::Start)?;
        let wiped = matches!(previous, NodeState::Wiped { .. });
        managed.set(NodeState::Starting);

        if let Err(e) = managed.store.reload(&CancellationToken::new()).await {
            managed.degrade(format!("reload failed: {}", e));
            return Err(e);
        }
        self.transport.set_online(node, true);

        let statuses = self.wait_for_peers(&managed).await;
        let local = managed.store.ledger_size();
        let target = quorum_target(&statuses, self.catchup.quorum_for(statuses.len())).unwrap_or(0);

        if !wiped && local >= target {
            tracing::info!(node = %node, "Already at seq {} (quorum {})", local, target);
            managed.set(NodeState::CaughtUp);
            return Ok(None);
        }
        Ok(Some(self.spawn_catchup(&managed)))
    }

    /// Catch a running node up with its peers on demand.
    pub async fn start_catchup(&self, node: &NodeId) -> Result<CatchupHandle, NodeError> {
        let managed = self.managed(node)?;
        let _op = managed.ops.lock().await;
        managed.check(LifecycleAction::Catchup)?;
        Ok(self.spawn_catchup(&managed))
    }

    /// Compare `node` with its peers; `Verified` on agreement.
    ///
    /// A divergence leaves the state alone and comes back in the report. A
    /// fork degrades the node and is returned as [`NodeError::LedgerFork`].
    pub async fn verify(&self, node: &NodeId, selector: TableSelector) -> Result<ConsistencyReport, NodeError> {
        let managed = self.managed(node)?;
        let _op = managed.ops.lock().await;
        managed.check(LifecycleAction::Verify)?;

        let mut nodes = vec![node.clone()];
        nodes.extend(managed.peers.iter().cloned());
        let report = self.compare_projections(&nodes, selector).await;

        if let Some(fork) = report.forks.first() {
            managed.degrade(format!("ledger fork at seq {} between {} and {}", fork.seq, fork.left, fork.right));
            return report.into_result();
        }
        if report.consistent {
            managed.set(NodeState::Verified);
        } else {
            tracing::warn!(
                node = %node,
                "Verification found {} divergence(s); staying {}",
                report.divergences.len(),
                managed.state.borrow().to_string()
            );
        }
        Ok(report)
    }

    /// stop -> wipe -> start -> catchup -> verify.
    pub async fn restart_with_wipe(
        &self,
        node: &NodeId,
        scope: WipeScope,
        selector: TableSelector,
    ) -> Result<ConsistencyReport, NodeError> {
        self.stop(node).await?;
        self.wipe(node, scope).await?;
        if let Some(handle) = self.start(node).await? {
            handle.wait().await?;
        }
        self.verify(node, selector).await
    }

    pub async fn compare_projections(&self, nodes: &[NodeId], selector: TableSelector) -> ConsistencyReport {
        self.verifier().compare(nodes, selector, self.verify.timeout()).await
    }

    pub async fn diff_records(&self, a: &NodeId, b: &NodeId, table: TableName) -> Result<TableDiff, NodeError> {
        self.verifier().diff_records(a, b, table).await
    }

    pub async fn node_view(&self, node: &NodeId) -> Result<NodeView, NodeError> {
        Ok(self.managed(node)?.store.node_view().await)
    }

    fn verifier(&self) -> ConsistencyVerifier {
        ConsistencyVerifier::new(self.transport.clone(), self.verify.clone())
    }

    fn managed(&self, node: &NodeId) -> Result<Arc<ManagedNode>, NodeError> {
        self.nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.get(node).cloned())
            .ok_or_else(|| NodeError::UnknownNode(node.clone()))
    }

    fn spawn_catchup(&self, managed: &Arc<ManagedNode>) -> CatchupHandle {
        managed.set(NodeState::CatchingUp);
        let coordinator = CatchupCoordinator::new(
            managed.store.clone(),
            self.transport.clone(),
            managed.peers.clone(),
            self.catchup.clone(),
        );
        let hook = managed.clone();
        let handle = coordinator.spawn_with(move |result| hook.finish_catchup(result));
        if let Ok(mut slot) = managed.catchup.lock() {
            *slot = Some(RunningCatchup {
                cancel: handle.cancellation_token(),
                progress: handle.progress(),
            });
        }
        handle
    }

    /// Poll peer statuses until every peer answers or `connect_timeout` passes.
    async fn wait_for_peers(&self, managed: &ManagedNode) -> Vec<(NodeId, LedgerStatus)> {
        let deadline = Instant::now() + self.catchup.connect_timeout();
        let timeout = self.catchup.peer_timeout();
        let mut delay = self.catchup.peer_backoff();

        loop {
            let polled = join_all(managed.peers.iter().map(|peer| async move {
                (peer, with_timeout(peer, timeout, self.transport.ledger_status(peer)).await)
            }))
            .await;

            let mut statuses = Vec::new();
            let mut missing = Vec::new();
            for (peer, result) in polled {
                match result {
                    Ok(status) => statuses.push((peer.clone(), status)),
                    Err(_) => missing.push(peer.as_str()),
                }
            }

            if missing.is_empty() {
                return statuses;
            }
            if Instant::now() + delay > deadline {
                tracing::warn!(node = %managed.id(), "Peers still unreachable: {}", missing.join(", "));
                return statuses;
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.catchup.peer_backoff_max());
        }
    }
}
