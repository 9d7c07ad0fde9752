// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Peer transport.
//!
//! Everything catchup and verification need from another node goes through
//! [`PeerTransport`]. [`LocalTransport`] serves in-process stores and can take
//! nodes offline or inject faults; [`crate::network::HttpTransport`] talks to
//! the axum peer server.

use futures::future::BoxFuture;
use futures::FutureExt;
use replica_kernel::projection::ProjectionRecord;
use replica_kernel::types::{LedgerEntry, NodeId, SeqNo, TableName};
use replica_kernel::view::{LedgerStatus, NodeView};
use rustc_hash::FxHashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::store::NodeStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: NodeId, reason: String },
    #[error("peer {peer} did not answer within {after:?}")]
    Timeout { peer: NodeId, after: Duration },
    #[error("peer {peer} sent a malformed response: {reason}")]
    Malformed { peer: NodeId, reason: String },
    /// The peer is healthy but has nothing at `from..=to`.
    #[error("peer {peer} has no entries in {from}..={to}")]
    NoData { peer: NodeId, from: SeqNo, to: SeqNo },
}

impl TransportError {
    pub fn peer(&self) -> &NodeId {
        match self {
            TransportError::Unreachable { peer, .. }
            | TransportError::Timeout { peer, .. }
            | TransportError::Malformed { peer, .. }
            | TransportError::NoData { peer, .. } => peer,
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

pub trait PeerTransport: Send + Sync {
    fn ledger_status<'a>(&'a self, peer: &'a NodeId) -> BoxFuture<'a, TransportResult<LedgerStatus>>;

    /// Entries `from..=to`. May return fewer than asked if the peer is
    /// shorter; callers validate.
    fn entries<'a>(&'a self, peer: &'a NodeId, from: SeqNo, to: SeqNo) -> BoxFuture<'a, TransportResult<Vec<LedgerEntry>>>;

    fn node_view<'a>(&'a self, peer: &'a NodeId) -> BoxFuture<'a, TransportResult<NodeView>>;

    fn table_records<'a>(&'a self, peer: &'a NodeId, table: TableName) -> BoxFuture<'a, TransportResult<Vec<ProjectionRecord>>>;
}

/// Run `fut` with a deadline, mapping expiry to [`TransportError::Timeout`].
pub async fn with_timeout<T>(
    peer: &NodeId,
    after: Duration,
    fut: impl Future<Output = TransportResult<T>>,
) -> TransportResult<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            peer: peer.clone(),
            after,
        }),
    }
}

/// Check that `entries` is exactly `from..=to` in order.
pub fn validate_batch(peer: &NodeId, from: SeqNo, to: SeqNo, entries: &[LedgerEntry]) -> TransportResult<()> {
    let expected = to + 1 - from;
    if entries.len() as u64 != expected {
        return Err(TransportError::Malformed {
            peer: peer.clone(),
            reason: format!("asked for {}..={}, got {} entries", from, to, entries.len()),
        });
    }
    for (offset, entry) in entries.iter().enumerate() {
        let want = from + offset as u64;
        if entry.seq_no != want {
            return Err(TransportError::Malformed {
                peer: peer.clone(),
                reason: format!("expected seq {} at position {}, got {}", want, offset, entry.seq_no),
            });
        }
    }
    Ok(())
}

/// Injected misbehaviour for a local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    /// Drop the last entry of every range response.
    ShortBatch,
    /// Swap the first two entries of every range response.
    Reorder,
    /// Never answer (requests hang until the caller times out).
    Hang,
}

#[derive(Clone)]
struct LocalPeer {
    store: Arc<NodeStore>,
    online: bool,
    fault: Fault,
    delay: Option<Duration>,
}

/// In-process transport over registered node stores.
#[derive(Default)]
pub struct LocalTransport {
    peers: RwLock<FxHashMap<NodeId, LocalPeer>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its own id, online.
    pub fn register(&self, store: Arc<NodeStore>) {
        let id = store.id().clone();
        let peer = LocalPeer {
            store,
            online: true,
            fault: Fault::None,
            delay: None,
        };
        self.peers.write().unwrap_or_else(|e| e.into_inner()).insert(id, peer);
    }

    pub fn store(&self, id: &NodeId) -> Option<Arc<NodeStore>> {
        self.read().get(id).map(|p| p.store.clone())
    }

    pub fn set_online(&self, id: &NodeId, online: bool) {
        self.update(id, |p| p.online = online);
    }

    pub fn is_online(&self, id: &NodeId) -> bool {
        self.read().get(id).map(|p| p.online).unwrap_or(false)
    }

    pub fn set_fault(&self, id: &NodeId, fault: Fault) {
        self.update(id, |p| p.fault = fault);
    }

    /// Delay every response from `id`.
    pub fn set_delay(&self, id: &NodeId, delay: Option<Duration>) {
        self.update(id, |p| p.delay = delay);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, FxHashMap<NodeId, LocalPeer>> {
        self.peers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, id: &NodeId, f: impl FnOnce(&mut LocalPeer)) {
        if let Some(peer) = self.peers.write().unwrap_or_else(|e| e.into_inner()).get_mut(id) {
            f(peer);
        }
    }

    /// Resolve `id` to a reachable store, applying delay and hang faults.
    async fn reach(&self, id: &NodeId) -> TransportResult<LocalPeer> {
        let peer = self.read().get(id).cloned().ok_or_else(|| TransportError::Unreachable {
            peer: id.clone(),
            reason: "not registered".to_string(),
        })?;

        if !peer.online {
            return Err(TransportError::Unreachable {
                peer: id.clone(),
                reason: "offline".to_string(),
            });
        }
        if let Some(delay) = peer.delay {
            tokio::time::sleep(delay).await;
        }
        if peer.fault == Fault::Hang {
            futures::future::pending::<()>().await;
        }
        Ok(peer)
    }
}

impl PeerTransport for LocalTransport {
    fn ledger_status<'a>(&'a self, peer: &'a NodeId) -> BoxFuture<'a, TransportResult<LedgerStatus>> {
        async move {
            let p = self.reach(peer).await?;
            Ok(p.store.status().await)
        }
        .boxed()
    }

    fn entries<'a>(&'a self, peer: &'a NodeId, from: SeqNo, to: SeqNo) -> BoxFuture<'a, TransportResult<Vec<LedgerEntry>>> {
        async move {
            let p = self.reach(peer).await?;
            let no_data = || TransportError::NoData {
                peer: peer.clone(),
                from,
                to,
            };

            let mut entries = p.store.read_entries(from, to).await.map_err(|_| no_data())?;
            if entries.is_empty() {
                return Err(no_data());
            }

            match p.fault {
                Fault::ShortBatch => {
                    entries.pop();
                }
                Fault::Reorder if entries.len() > 1 => entries.swap(0, 1),
                _ => {}
            }
            Ok(entries)
        }
        .boxed()
    }

    fn node_view<'a>(&'a self, peer: &'a NodeId) -> BoxFuture<'a, TransportResult<NodeView>> {
        async move {
            let p = self.reach(peer).await?;
            Ok(p.store.node_view().await)
        }
        .boxed()
    }

    fn table_records<'a>(&'a self, peer: &'a NodeId, table: TableName) -> BoxFuture<'a, TransportResult<Vec<ProjectionRecord>>> {
        async move {
            let p = self.reach(peer).await?;
            Ok(p.store.table_records(table).await)
        }
        .boxed()
    }
}
