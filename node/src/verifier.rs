// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consistency Verifier
//!
//! Polls node views until every node reports the same ledger size, ledger
//! root and selected table digests, or the deadline passes. Divergence is
//! returned as data in a [`ConsistencyReport`]; only callers that treat a
//! fork as fatal turn it into an error with [`ConsistencyReport::into_result`].

use core::fmt;
use core::str::FromStr;
use futures::future::{join_all, try_join};
use replica_kernel::diff::{diff_records, TableDiff};
use replica_kernel::digest::TableDigest;
use replica_kernel::error::KernelError;
use replica_kernel::types::{Hash32, NodeId, SeqNo, TableName};
use replica_kernel::view::NodeView;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::VerifyConfig;
use crate::errors::NodeError;
use crate::fork::{ForkLocator, ForkSide};
use crate::telemetry::VERIFY_DIVERGENCES;
use crate::transport::{with_timeout, PeerTransport, TransportResult};

/// Entries fetched per request while bisecting a fork.
const FORK_BATCH: SeqNo = 128;

/// Reference `(size, root)` and lagging `(size, root)` found to share a prefix.
type PrefixKey = (SeqNo, Hash32, SeqNo, Hash32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableSelector {
    Table(TableName),
    AllTables,
}

impl TableSelector {
    pub fn tables(&self) -> Vec<TableName> {
        match self {
            TableSelector::Table(t) => vec![*t],
            TableSelector::AllTables => TableName::ALL.to_vec(),
        }
    }
}

impl fmt::Display for TableSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSelector::Table(t) => write!(f, "{}", t),
            TableSelector::AllTables => f.write_str("all tables"),
        }
    }
}

impl FromStr for TableSelector {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(TableSelector::AllTables);
        }
        s.parse().map(TableSelector::Table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DivergenceKind {
    Unreachable {
        reason: String,
    },
    SizeMismatch {
        expected: SeqNo,
        actual: SeqNo,
    },
    DigestMismatch {
        table: TableName,
        expected: TableDigest,
        actual: TableDigest,
    },
}

impl fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceKind::Unreachable { reason } => write!(f, "unreachable ({})", reason),
            DivergenceKind::SizeMismatch { expected, actual } => {
                write!(f, "ledger size {} (expected {})", actual, expected)
            }
            DivergenceKind::DigestMismatch { table, expected, actual } => {
                write!(f, "{} digest {} (expected {})", table, actual, expected)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub node: NodeId,
    pub kind: DivergenceKind,
}

/// Two nodes whose ledgers disagree on a common prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForkReport {
    pub left: NodeId,
    pub right: NodeId,
    /// Smallest size at which their roots are known to differ.
    pub size: SeqNo,
    /// First differing seq; equals `size` until located.
    pub seq: SeqNo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub selector: TableSelector,
    /// Node whose view the others were held against.
    pub reference: Option<NodeId>,
    pub views: Vec<NodeView>,
    pub divergences: Vec<Divergence>,
    pub forks: Vec<ForkReport>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl ConsistencyReport {
    /// A fork becomes [`NodeError::LedgerFork`]; anything else stays a report.
    pub fn into_result(self) -> Result<Self, NodeError> {
        match self.forks.first() {
            Some(fork) => Err(NodeError::LedgerFork {
                seq: fork.seq,
                left: fork.left.clone(),
                right: fork.right.clone(),
                detail: format!("roots differ at size {}", fork.size),
            }),
            None => Ok(self),
        }
    }

    pub fn view(&self, node: &NodeId) -> Option<&NodeView> {
        self.views.iter().find(|v| &v.node_id == node)
    }

    /// Nodes named by any divergence or fork, sorted.
    pub fn diverging_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .divergences
            .iter()
            .map(|d| d.node.clone())
            .chain(self.forks.iter().map(|f| f.right.clone()))
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    /// `(node, table)` for every digest mismatch.
    pub fn digest_mismatches(&self) -> Vec<(NodeId, TableName)> {
        self.divergences
            .iter()
            .filter_map(|d| match d.kind {
                DivergenceKind::DigestMismatch { table, .. } => Some((d.node.clone(), table)),
                _ => None,
            })
            .collect()
    }
}

/// Judge one round of polled views.
///
/// The reference is the largest group of nodes agreeing on `(size, root)`;
/// ties go to the larger size, then to the group holding the smallest id.
pub fn evaluate(polled: Vec<(NodeId, TransportResult<NodeView>)>, selector: TableSelector) -> ConsistencyReport {
    let mut views = Vec::new();
    let mut divergences = Vec::new();

    for (node, result) in polled {
        match result {
            Ok(view) => views.push(view),
            Err(e) => divergences.push(Divergence {
                node,
                kind: DivergenceKind::Unreachable { reason: e.to_string() },
            }),
        }
    }
    views.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    let mut groups: BTreeMap<(SeqNo, Hash32), Vec<&NodeView>> = BTreeMap::new();
    for view in &views {
        groups.entry((view.ledger_size, view.ledger_root)).or_default().push(view);
    }

    let reference = groups
        .iter()
        .max_by(|(ka, a), (kb, b)| {
            a.len()
                .cmp(&b.len())
                .then(ka.0.cmp(&kb.0))
                .then_with(|| b[0].node_id.cmp(&a[0].node_id))
        })
        .map(|(_, members)| members[0]);

    let mut forks = Vec::new();
    let mut first_at_size: BTreeMap<SeqNo, &NodeView> = BTreeMap::new();
    for view in &views {
        if let Some(first) = first_at_size.get(&view.ledger_size) {
            if first.ledger_root != view.ledger_root {
                forks.push(ForkReport {
                    left: first.node_id.clone(),
                    right: view.node_id.clone(),
                    size: view.ledger_size,
                    seq: view.ledger_size,
                });
            }
            continue;
        }
        first_at_size.insert(view.ledger_size, view);
    }

    if let Some(reference) = reference {
        for view in &views {
            if view.node_id == reference.node_id {
                continue;
            }
            // Prefix agreement needs entries; see `ConsistencyVerifier::check_prefixes`.
            if view.ledger_size != reference.ledger_size {
                divergences.push(Divergence {
                    node: view.node_id.clone(),
                    kind: DivergenceKind::SizeMismatch {
                        expected: reference.ledger_size,
                        actual: view.ledger_size,
                    },
                });
                continue;
            }
            if view.ledger_root != reference.ledger_root {
                // Reported as a fork.
                continue;
            }
            for table in selector.tables() {
                let (expected, actual) = (reference.digest(table), view.digest(table));
                if expected != actual {
                    divergences.push(Divergence {
                        node: view.node_id.clone(),
                        kind: DivergenceKind::DigestMismatch { table, expected, actual },
                    });
                }
            }
        }
    }

    let reference = reference.map(|v| v.node_id.clone());

    ConsistencyReport {
        consistent: divergences.is_empty() && forks.is_empty(),
        selector,
        reference,
        views,
        divergences,
        forks,
        attempts: 0,
        elapsed: Duration::ZERO,
    }
}

pub struct ConsistencyVerifier {
    transport: Arc<dyn PeerTransport>,
    config: VerifyConfig,
}

impl ConsistencyVerifier {
    pub fn new(transport: Arc<dyn PeerTransport>, config: VerifyConfig) -> Self {
        Self { transport, config }
    }

    /// Poll until `nodes` agree on `selector` or `timeout` passes.
    pub async fn compare(&self, nodes: &[NodeId], selector: TableSelector, timeout: Duration) -> ConsistencyReport {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut delay = self.config.poll_initial();
        let mut attempts = 0u32;
        let mut shared_prefixes = FxHashSet::default();

        loop {
            attempts += 1;
            let mut report = evaluate(self.poll(nodes).await, selector);
            report.attempts = attempts;
            self.check_prefixes(&mut report, &mut shared_prefixes).await;

            if report.consistent {
                report.elapsed = started.elapsed();
                tracing::info!(nodes = nodes.len(), attempts, "Nodes agree on {}", selector);
                return report;
            }

            // Forks never heal by waiting.
            if !report.forks.is_empty() || Instant::now() + delay > deadline {
                self.locate_forks(&mut report).await;
                report.elapsed = started.elapsed();
                let count = (report.divergences.len() + report.forks.len()) as u64;
                metrics::counter!(VERIFY_DIVERGENCES, count);
                for d in &report.divergences {
                    tracing::warn!(node = %d.node, "Divergence on {}: {}", selector, d.kind);
                }
                for f in &report.forks {
                    tracing::error!(seq = f.seq, "Ledger fork between {} and {}", f.left, f.right);
                }
                return report;
            }

            tracing::debug!(attempts, "Views differ, polling again in {:?}", delay);
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.poll_max());
        }
    }

    /// Record-level diff of `table` between two nodes.
    pub async fn diff_records(&self, a: &NodeId, b: &NodeId, table: TableName) -> Result<TableDiff, NodeError> {
        let timeout = self.config.rpc_timeout();
        let (left, right) = try_join(
            with_timeout(a, timeout, self.transport.table_records(a, table)),
            with_timeout(b, timeout, self.transport.table_records(b, table)),
        )
        .await?;
        Ok(diff_records(table, &left, &right))
    }

    async fn poll(&self, nodes: &[NodeId]) -> Vec<(NodeId, TransportResult<NodeView>)> {
        let timeout = self.config.rpc_timeout();
        join_all(nodes.iter().map(|node| async move {
            let result = with_timeout(node, timeout, self.transport.node_view(node)).await;
            (node.clone(), result)
        }))
        .await
    }

    /// Turn size mismatches whose common prefix differs into forks.
    ///
    /// The shorter side's root is in its view; the longer side's root at that
    /// size is recomputed from its entries. Prefixes already found shared
    /// (keyed by both sizes and roots) are not fetched again.
    async fn check_prefixes(&self, report: &mut ConsistencyReport, shared: &mut FxHashSet<PrefixKey>) {
        let reference = match report.reference.as_ref().and_then(|id| report.view(id)) {
            Some(view) => view.clone(),
            None => return,
        };
        let locator = ForkLocator::new(self.transport.as_ref(), FORK_BATCH, self.config.rpc_timeout());
        let mut forked = Vec::new();

        for d in &report.divergences {
            if !matches!(d.kind, DivergenceKind::SizeMismatch { .. }) {
                continue;
            }
            let view = match report.view(&d.node) {
                Some(view) => view,
                None => continue,
            };
            let key = (reference.ledger_size, reference.ledger_root, view.ledger_size, view.ledger_root);
            if shared.contains(&key) {
                continue;
            }

            let (longer, shorter) = if view.ledger_size > reference.ledger_size {
                (view, &reference)
            } else {
                (&reference, view)
            };
            match locator.root_of(ForkSide::Peer(&longer.node_id), shorter.ledger_size).await {
                Ok(root) if root == shorter.ledger_root => {
                    shared.insert(key);
                }
                Ok(_) => forked.push(ForkReport {
                    left: reference.node_id.clone(),
                    right: view.node_id.clone(),
                    size: shorter.ledger_size,
                    seq: shorter.ledger_size,
                }),
                Err(e) => tracing::debug!("Could not check prefix of {} at {}: {}", longer.node_id, shorter.ledger_size, e),
            }
        }

        if forked.is_empty() {
            return;
        }
        report
            .divergences
            .retain(|d| !forked.iter().any(|f| f.right == d.node && matches!(d.kind, DivergenceKind::SizeMismatch { .. })));
        report.forks.extend(forked);
        report.consistent = false;
    }

    async fn locate_forks(&self, report: &mut ConsistencyReport) {
        let locator = ForkLocator::new(self.transport.as_ref(), FORK_BATCH, self.config.rpc_timeout());
        for fork in &mut report.forks {
            match locator.locate(ForkSide::Peer(&fork.left), ForkSide::Peer(&fork.right), fork.size).await {
                Ok(seq) => fork.seq = seq,
                Err(e) => tracing::warn!("Could not locate fork between {} and {}: {}", fork.left, fork.right, e),
            }
        }
    }
}
