// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Fork location.
//!
//! Two ledgers whose roots differ at some size share a prefix up to the
//! fork and differ from there on, because each root commits to every entry
//! before it. Bisecting on prefix roots finds the first differing seq with
//! `O(log n)` round trips.

use replica_kernel::ledger::{chain_root, EMPTY_ROOT};
use replica_kernel::types::{Hash32, NodeId, SeqNo};
use std::time::Duration;

use crate::errors::NodeError;
use crate::store::NodeStore;
use crate::transport::{validate_batch, with_timeout, PeerTransport};

/// One side of a comparison: this node's own ledger, or a peer's.
#[derive(Clone, Copy)]
pub enum ForkSide<'a> {
    Local(&'a NodeStore),
    Peer(&'a NodeId),
}

impl ForkSide<'_> {
    pub fn id(&self) -> NodeId {
        match self {
            ForkSide::Local(store) => store.id().clone(),
            ForkSide::Peer(peer) => (*peer).clone(),
        }
    }
}

pub struct ForkLocator<'a> {
    transport: &'a dyn PeerTransport,
    batch_size: SeqNo,
    timeout: Duration,
}

impl<'a> ForkLocator<'a> {
    pub fn new(transport: &'a dyn PeerTransport, batch_size: SeqNo, timeout: Duration) -> Self {
        Self {
            transport,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// First seq at which `left` and `right` differ, given that their roots
    /// differ at `differs_at`.
    pub async fn locate(&self, left: ForkSide<'_>, right: ForkSide<'_>, differs_at: SeqNo) -> Result<SeqNo, NodeError> {
        // Roots agree at `lo` (both equal `prefix`) and differ at `hi`.
        let mut lo: SeqNo = 0;
        let mut prefix = EMPTY_ROOT;
        let mut hi = differs_at;

        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            let l = self.root_at(left, lo, prefix, mid).await?;
            let r = self.root_at(right, lo, prefix, mid).await?;
            if l == r {
                lo = mid;
                prefix = l;
            } else {
                hi = mid;
            }
        }

        tracing::debug!("Fork between {} and {} located at seq {}", left.id(), right.id(), hi);
        Ok(hi)
    }

    /// Root of `side` after `seq`, recomputed from its entries for a peer.
    pub async fn root_of(&self, side: ForkSide<'_>, seq: SeqNo) -> Result<Hash32, NodeError> {
        self.root_at(side, 0, EMPTY_ROOT, seq).await
    }

    /// Root of `side` after `seq`, given its root after `known` is `prefix`.
    async fn root_at(&self, side: ForkSide<'_>, known: SeqNo, prefix: Hash32, seq: SeqNo) -> Result<Hash32, NodeError> {
        match side {
            ForkSide::Local(store) => store.root_at(seq).await.ok_or_else(|| {
                NodeError::Internal(format!("{} has no root at seq {}", store.id(), seq))
            }),
            ForkSide::Peer(peer) => {
                let mut root = prefix;
                let mut next = known + 1;
                while next <= seq {
                    let end = seq.min(next + self.batch_size - 1);
                    let entries = with_timeout(peer, self.timeout, self.transport.entries(peer, next, end)).await?;
                    validate_batch(peer, next, end, &entries)?;
                    for entry in &entries {
                        root = chain_root(&root, entry);
                    }
                    next = end + 1;
                }
                Ok(root)
            }
        }
    }
}
