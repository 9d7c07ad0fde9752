// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Catchup Coordinator
//!
//! Brings a node's ledger and projection up to what a quorum of its peers
//! has committed:
//! 1. Poll every peer for `(size, root)` in parallel
//! 2. Target = largest size that at least `quorum` peers have reached
//! 3. Fetch the missing range in batches from the fastest eligible peers
//! 4. Apply batches strictly in order through the store's single writer
//! 5. Repeat until local size reaches the target
//!
//! A peer that fails is backed off and its batch goes to someone else.
//! Only forks, local invariant violations, cancellation and the overall
//! deadline end a catchup early.

use futures::future::{join_all, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use replica_kernel::error::KernelError;
use replica_kernel::types::{Hash32, LedgerEntry, NodeId, SeqNo};
use replica_kernel::view::LedgerStatus;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CatchupConfig;
use crate::errors::NodeError;
use crate::fork::{ForkLocator, ForkSide};
use crate::store::NodeStore;
use crate::telemetry::{CATCHUP_DURATION, CATCHUP_ROUNDS, ENTRIES_APPLIED, PEER_FAILURES};
use crate::transport::{validate_batch, with_timeout, PeerTransport, TransportResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchupProgress {
    Starting,
    Round {
        round: u32,
        local: SeqNo,
        target: Option<SeqNo>,
    },
    Fetching {
        local: SeqNo,
        target: SeqNo,
    },
    Complete {
        size: SeqNo,
    },
    Failed {
        reason: String,
    },
}

impl CatchupProgress {
    pub fn is_finished(&self) -> bool {
        matches!(self, CatchupProgress::Complete { .. } | CatchupProgress::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchupReport {
    pub node: NodeId,
    pub start_size: SeqNo,
    pub final_size: SeqNo,
    pub target: SeqNo,
    pub rounds: u32,
    /// Entries written to the ledger by this catchup.
    pub entries_applied: u64,
    /// Peers that were failing when catchup finished.
    pub unavailable_peers: Vec<NodeId>,
    pub elapsed: Duration,
}

/// Target size: the largest `s` such that at least `quorum` peers report
/// `size >= s`. `None` if fewer than `quorum` peers answered.
pub fn quorum_target(statuses: &[(NodeId, LedgerStatus)], quorum: usize) -> Option<SeqNo> {
    if quorum == 0 || statuses.len() < quorum {
        return None;
    }
    let mut sizes: Vec<SeqNo> = statuses.iter().map(|(_, s)| s.size).collect();
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    Some(sizes[quorum - 1])
}

/// Two peers at the same size with different roots.
pub fn conflicting_statuses(statuses: &[(NodeId, LedgerStatus)]) -> Option<(SeqNo, NodeId, NodeId)> {
    let mut seen: BTreeMap<SeqNo, (&NodeId, Hash32)> = BTreeMap::new();
    for (peer, status) in statuses {
        if let Some((other, root)) = seen.get(&status.size) {
            if *root != status.root {
                return Some((status.size, (*other).clone(), peer.clone()));
            }
            continue;
        }
        seen.insert(status.size, (peer, status.root));
    }
    None
}

#[derive(Debug, Clone, Default)]
struct PeerStats {
    status: Option<LedgerStatus>,
    latency: Option<Duration>,
    /// Consecutive failures, fetches and status polls alike.
    failures: u32,
    backoff_until: Option<Instant>,
    /// Last status poll failed.
    unreachable: bool,
}

impl PeerStats {
    fn observe_latency(&mut self, latency: Duration) {
        self.latency = Some(match self.latency {
            // EWMA, alpha = 0.3
            Some(old) => Duration::from_secs_f64(old.as_secs_f64() * 0.7 + latency.as_secs_f64() * 0.3),
            None => latency,
        });
    }
}

/// Per-peer health: last status, latency estimate and backoff.
#[derive(Debug)]
pub struct PeerTracker {
    peers: FxHashMap<NodeId, PeerStats>,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl PeerTracker {
    pub fn new(peers: &[NodeId], base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            peers: peers.iter().map(|p| (p.clone(), PeerStats::default())).collect(),
            base_backoff,
            max_backoff: max_backoff.max(base_backoff),
        }
    }

    /// A status answer only lifts backoff earned by being unreachable; a peer
    /// that answers polls but serves bad ranges stays backed off.
    pub fn record_status(&mut self, peer: &NodeId, status: LedgerStatus, latency: Duration) {
        if let Some(stats) = self.peers.get_mut(peer) {
            if stats.unreachable {
                stats.unreachable = false;
                stats.failures = 0;
                stats.backoff_until = None;
            }
            stats.status = Some(status);
            stats.observe_latency(latency);
        }
    }

    /// A range fetch succeeded.
    pub fn record_success(&mut self, peer: &NodeId, latency: Duration) {
        if let Some(stats) = self.peers.get_mut(peer) {
            stats.failures = 0;
            stats.backoff_until = None;
            stats.observe_latency(latency);
        }
    }

    /// Back `peer` off; the delay doubles per consecutive failure up to the cap.
    pub fn record_failure(&mut self, peer: &NodeId, now: Instant) -> Duration {
        metrics::counter!(PEER_FAILURES, 1, "peer" => peer.to_string());
        let Some(stats) = self.peers.get_mut(peer) else {
            return Duration::ZERO;
        };
        stats.failures += 1;
        let factor = 1u32 << (stats.failures - 1).min(16);
        let backoff = self.base_backoff.saturating_mul(factor).min(self.max_backoff);
        stats.backoff_until = Some(now + backoff);
        backoff
    }

    /// The peer did not answer a status poll: it no longer counts towards
    /// the quorum until it does.
    pub fn record_unreachable(&mut self, peer: &NodeId, now: Instant) -> Duration {
        if let Some(stats) = self.peers.get_mut(peer) {
            stats.status = None;
            stats.unreachable = true;
        }
        self.record_failure(peer, now)
    }

    pub fn is_available(&self, peer: &NodeId, now: Instant) -> bool {
        self.peers
            .get(peer)
            .map(|s| s.backoff_until.map_or(true, |until| until <= now))
            .unwrap_or(false)
    }

    /// Peers that can serve up to `end` right now, fastest first.
    pub fn eligible(&self, end: SeqNo, now: Instant) -> Vec<NodeId> {
        let mut peers: Vec<(&NodeId, Duration)> = self
            .peers
            .iter()
            .filter(|(id, s)| s.status.map_or(false, |st| st.size >= end) && self.is_available(id, now))
            .map(|(id, s)| (id, s.latency.unwrap_or(Duration::ZERO)))
            .collect();
        peers.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        peers.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Earliest time a backed-off peer that could serve `end` is usable again.
    pub fn next_retry(&self, end: SeqNo) -> Option<Instant> {
        self.peers
            .values()
            .filter(|s| s.status.map_or(false, |st| st.size >= end))
            .filter_map(|s| s.backoff_until)
            .min()
    }

    /// Peers that answered the last poll, sorted by id.
    pub fn statuses(&self) -> Vec<(NodeId, LedgerStatus)> {
        let mut out: Vec<_> = self
            .peers
            .iter()
            .filter_map(|(id, s)| s.status.map(|st| (id.clone(), st)))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn failures(&self, peer: &NodeId) -> u32 {
        self.peers.get(peer).map(|s| s.failures).unwrap_or(0)
    }

    pub fn unavailable(&self) -> Vec<NodeId> {
        let mut out: Vec<_> = self
            .peers
            .iter()
            .filter(|(_, s)| s.unreachable || s.failures > 0)
            .map(|(id, _)| id.clone())
            .collect();
        out.sort();
        out
    }
}

struct Fetched {
    peer: NodeId,
    from: SeqNo,
    to: SeqNo,
    latency: Duration,
    result: TransportResult<Vec<LedgerEntry>>,
}

pub struct CatchupCoordinator {
    store: Arc<NodeStore>,
    transport: Arc<dyn PeerTransport>,
    peers: Vec<NodeId>,
    config: CatchupConfig,
}

impl CatchupCoordinator {
    pub fn new(store: Arc<NodeStore>, transport: Arc<dyn PeerTransport>, peers: Vec<NodeId>, config: CatchupConfig) -> Self {
        Self {
            store,
            transport,
            peers,
            config,
        }
    }

    pub fn spawn(self) -> CatchupHandle {
        self.spawn_with(|_| {})
    }

    /// Run on a new task; `on_done` sees the result before `wait()` does.
    pub fn spawn_with<F>(self, on_done: F) -> CatchupHandle
    where
        F: FnOnce(&Result<CatchupReport, NodeError>) + Send + 'static,
    {
        let (tx, rx) = watch::channel(CatchupProgress::Starting);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let node = self.store.id().clone();

        let join = tokio::spawn(async move {
            let result = self.run(&token, &tx).await;
            match &result {
                Ok(report) => tx.send_replace(CatchupProgress::Complete { size: report.final_size }),
                Err(e) => tx.send_replace(CatchupProgress::Failed { reason: e.to_string() }),
            };
            on_done(&result);
            result
        });

        CatchupHandle {
            node,
            progress: rx,
            cancel,
            join,
        }
    }

    pub async fn run(
        &self,
        cancel: &CancellationToken,
        progress: &watch::Sender<CatchupProgress>,
    ) -> Result<CatchupReport, NodeError> {
        let started = Instant::now();
        let deadline = started + self.config.catchup_timeout();
        let node = self.store.id().clone();
        let start_size = self.store.ledger_size();
        let mut tracker = PeerTracker::new(&self.peers, self.config.peer_backoff(), self.config.peer_backoff_max());
        let mut target = start_size;
        let mut appended = 0u64;
        let mut round = 0u32;

        tracing::info!(node = %node, peers = self.peers.len(), "Catchup starting at seq {}", start_size);

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled().await);
            }
            if round >= self.config.max_rounds || Instant::now() >= deadline {
                return Err(self.timed_out(round, target));
            }
            round += 1;
            metrics::counter!(CATCHUP_ROUNDS, 1, "node" => node.to_string());

            self.poll_statuses(&mut tracker, cancel).await?;
            let statuses = tracker.statuses();

            if let Some((size, left, right)) = conflicting_statuses(&statuses) {
                let detail = format!("{} and {} both report size {} with different roots", left, right, size);
                return Err(self.fork_error(ForkSide::Peer(&left), ForkSide::Peer(&right), size, detail).await);
            }
            self.check_checkpoints(&statuses).await?;

            let round_target = if self.peers.is_empty() {
                Some(self.store.ledger_size())
            } else {
                quorum_target(&statuses, self.config.quorum_for(statuses.len()))
            };
            let local = self.store.ledger_size();
            progress.send_replace(CatchupProgress::Round {
                round,
                local,
                target: round_target,
            });

            match round_target {
                None => {
                    tracing::warn!(
                        node = %node,
                        round,
                        "No quorum: {} of {} peers answered",
                        statuses.len(),
                        self.peers.len()
                    );
                }
                Some(t) => {
                    target = t;
                    tracing::info!(node = %node, round, "Round target {} (local {})", t, local);

                    if local < t {
                        appended += self
                            .fetch_range(local + 1, t, round, &mut tracker, cancel, deadline, progress)
                            .await?;
                        self.check_checkpoints(&tracker.statuses()).await?;
                    }

                    let local = self.store.ledger_size();
                    if local >= t {
                        if self.store.applied_seq().await < local {
                            self.store.apply_batch(&[]).await?;
                        }
                        let elapsed = started.elapsed();
                        metrics::histogram!(CATCHUP_DURATION, elapsed.as_secs_f64());
                        tracing::info!(
                            node = %node,
                            rounds = round,
                            appended,
                            "Catchup complete at seq {} in {:?}",
                            local,
                            elapsed
                        );
                        return Ok(CatchupReport {
                            node,
                            start_size,
                            final_size: local,
                            target: t,
                            rounds: round,
                            entries_applied: appended,
                            unavailable_peers: tracker.unavailable(),
                            elapsed,
                        });
                    }
                }
            }

            let wake = (Instant::now() + self.config.round_interval()).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled().await),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn poll_statuses(&self, tracker: &mut PeerTracker, cancel: &CancellationToken) -> Result<(), NodeError> {
        let timeout = self.config.peer_timeout();
        let polls = self.peers.iter().map(|peer| async move {
            let started = Instant::now();
            let result = with_timeout(peer, timeout, self.transport.ledger_status(peer)).await;
            (peer, started.elapsed(), result)
        });

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled().await),
            results = join_all(polls) => results,
        };

        let now = Instant::now();
        for (peer, latency, result) in results {
            match result {
                Ok(status) => tracker.record_status(peer, status, latency),
                Err(e) => {
                    let backoff = tracker.record_unreachable(peer, now);
                    tracing::warn!(node = %self.store.id(), peer = %peer, "Status poll failed: {}; backing off {:?}", e, backoff);
                }
            }
        }
        Ok(())
    }

    /// Every peer status at or below our size is a checkpoint our root must match.
    async fn check_checkpoints(&self, statuses: &[(NodeId, LedgerStatus)]) -> Result<(), NodeError> {
        for (peer, status) in statuses {
            if status.size == 0 {
                continue;
            }
            match self.store.root_at(status.size).await {
                Some(root) if root != status.root => {
                    let detail = format!("local root at size {} differs from {}'s", status.size, peer);
                    return Err(self
                        .fork_error(ForkSide::Local(&self.store), ForkSide::Peer(peer), status.size, detail)
                        .await);
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn fork_error(&self, left: ForkSide<'_>, right: ForkSide<'_>, differs_at: SeqNo, detail: String) -> NodeError {
        let locator = ForkLocator::new(self.transport.as_ref(), self.config.batch_size, self.config.peer_timeout());
        let seq = match locator.locate(left, right, differs_at).await {
            Ok(seq) => seq,
            Err(e) => {
                tracing::warn!(node = %self.store.id(), "Could not bisect fork below {}: {}", differs_at, e);
                differs_at
            }
        };
        tracing::error!(node = %self.store.id(), seq, "Ledger fork between {} and {}: {}", left.id(), right.id(), detail);
        NodeError::LedgerFork {
            seq,
            left: left.id(),
            right: right.id(),
            detail,
        }
    }

    fn fetch(&self, peer: NodeId, from: SeqNo, to: SeqNo) -> BoxFuture<'static, Fetched> {
        let transport = self.transport.clone();
        let timeout = self.config.peer_timeout();
        async move {
            let started = Instant::now();
            let result = with_timeout(&peer, timeout, transport.entries(&peer, from, to)).await;
            Fetched {
                latency: started.elapsed(),
                peer,
                from,
                to,
                result,
            }
        }
        .boxed()
    }

    /// Fetch and apply `from..=to`. Returns entries appended; stops early
    /// (without error) when no peer can serve what is left.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_range(
        &self,
        from: SeqNo,
        to: SeqNo,
        round: u32,
        tracker: &mut PeerTracker,
        cancel: &CancellationToken,
        deadline: Instant,
        progress: &watch::Sender<CatchupProgress>,
    ) -> Result<u64, NodeError> {
        let node = self.store.id();
        let batch = self.config.batch_size.max(1);
        let mut pending: VecDeque<(SeqNo, SeqNo)> = (from..=to)
            .step_by(batch as usize)
            .map(|lo| (lo, (lo + batch - 1).min(to)))
            .collect();
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Fetched>> = FuturesUnordered::new();
        let mut ready: BTreeMap<SeqNo, (NodeId, Vec<LedgerEntry>)> = BTreeMap::new();
        let mut next_apply = from;
        let mut appended = 0u64;
        let mut cursor = 0usize;

        loop {
            let now = Instant::now();
            while in_flight.len() < self.config.max_parallel_fetches.max(1) {
                let Some(&(lo, hi)) = pending.front() else { break };
                let eligible = tracker.eligible(hi, now);
                if eligible.is_empty() {
                    break;
                }
                let peer = eligible[cursor % eligible.len()].clone();
                cursor += 1;
                pending.pop_front();
                tracing::debug!(node = %node, peer = %peer, "Fetching {}..={}", lo, hi);
                in_flight.push(self.fetch(peer, lo, hi));
            }

            if in_flight.is_empty() {
                let Some(&(lo, hi)) = pending.front() else { break };
                match tracker.next_retry(hi) {
                    Some(at) if at < deadline => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(self.cancelled().await),
                            _ = tokio::time::sleep_until(at) => continue,
                        }
                    }
                    _ => {
                        tracing::debug!(node = %node, "No peer can serve {}..={} this round", lo, hi);
                        break;
                    }
                }
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled().await),
                _ = tokio::time::sleep_until(deadline) => return Err(self.timed_out(round, to)),
                Some(fetched) = in_flight.next() => fetched,
            };

            let Fetched {
                peer,
                from: lo,
                to: hi,
                latency,
                result,
            } = fetched;
            match result.and_then(|entries| validate_batch(&peer, lo, hi, &entries).map(|_| entries)) {
                Ok(entries) => {
                    tracker.record_success(&peer, latency);
                    ready.insert(lo, (peer, entries));
                }
                Err(e) => {
                    let backoff = tracker.record_failure(&peer, Instant::now());
                    tracing::warn!(
                        node = %node,
                        peer = %peer,
                        "Fetch {}..={} failed: {}; retrying elsewhere, backing off {:?}",
                        lo,
                        hi,
                        e,
                        backoff
                    );
                    pending.push_front((lo, hi));
                }
            }

            // Single writer: apply whatever is now contiguous.
            while let Some((peer, entries)) = ready.remove(&next_apply) {
                let end = next_apply + entries.len() as u64 - 1;
                let outcome = match self.store.apply_batch(&entries).await {
                    Ok(outcome) => outcome,
                    Err(NodeError::Kernel(KernelError::DuplicateEntry { seq_no })) => {
                        tracing::error!(node = %node, peer = %peer, seq = seq_no, "Peer entry differs from local copy");
                        return Err(NodeError::LedgerFork {
                            seq: seq_no,
                            left: node.clone(),
                            right: peer,
                            detail: "entry differs from the local copy".to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                };
                appended += outcome.appended;
                metrics::counter!(ENTRIES_APPLIED, outcome.appended, "node" => node.to_string());
                tracing::debug!(node = %node, peer = %peer, "Applied {}..={}", next_apply, end);
                next_apply = end + 1;
                progress.send_replace(CatchupProgress::Fetching {
                    local: self.store.ledger_size(),
                    target: to,
                });
            }
        }

        Ok(appended)
    }

    async fn cancelled(&self) -> NodeError {
        let applied = self.store.applied_seq().await;
        tracing::info!(node = %self.store.id(), "Catchup cancelled at seq {}", applied);
        NodeError::Cancelled {
            node: self.store.id().clone(),
            applied,
        }
    }

    fn timed_out(&self, rounds: u32, target: SeqNo) -> NodeError {
        let local = self.store.ledger_size();
        tracing::error!(node = %self.store.id(), rounds, "Catchup timed out at {}/{}", local, target);
        NodeError::CatchupTimeout {
            node: self.store.id().clone(),
            rounds,
            local,
            target,
        }
    }
}

/// A running catchup.
pub struct CatchupHandle {
    node: NodeId,
    progress: watch::Receiver<CatchupProgress>,
    cancel: CancellationToken,
    join: JoinHandle<Result<CatchupReport, NodeError>>,
}

impl CatchupHandle {
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn progress(&self) -> watch::Receiver<CatchupProgress> {
        self.progress.clone()
    }

    /// Stop after the batch being applied; the store keeps everything
    /// applied so far.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> Result<CatchupReport, NodeError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(NodeError::Internal(format!("catchup task for {} failed: {}", self.node, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(size: SeqNo, root: u8) -> LedgerStatus {
        LedgerStatus { size, root: [root; 32] }
    }

    fn peers(list: &[(&str, SeqNo, u8)]) -> Vec<(NodeId, LedgerStatus)> {
        list.iter().map(|(id, size, root)| (NodeId::from(*id), status(*size, *root))).collect()
    }

    #[test]
    fn test_quorum_target() {
        let s = peers(&[("b", 60, 1), ("c", 60, 1), ("d", 90, 2)]);
        assert_eq!(quorum_target(&s, 2), Some(60));
        assert_eq!(quorum_target(&s, 1), Some(90));
        assert_eq!(quorum_target(&s, 3), Some(60));
        assert_eq!(quorum_target(&s, 4), None);
        assert_eq!(quorum_target(&[], 1), None);
    }

    #[test]
    fn test_lagging_minority_does_not_lower_target() {
        let s = peers(&[("b", 10, 1), ("c", 60, 2), ("d", 60, 2)]);
        assert_eq!(quorum_target(&s, 2), Some(60));
    }

    #[test]
    fn test_conflicting_statuses() {
        assert!(conflicting_statuses(&peers(&[("b", 60, 1), ("c", 60, 1), ("d", 50, 3)])).is_none());
        let (size, left, right) = conflicting_statuses(&peers(&[("b", 60, 1), ("c", 60, 2)])).unwrap();
        assert_eq!(size, 60);
        assert_eq!((left.as_str(), right.as_str()), ("b", "c"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let b = NodeId::from("b");
        let mut tracker = PeerTracker::new(&[b.clone()], Duration::from_millis(100), Duration::from_millis(350));
        let now = Instant::now();
        assert_eq!(tracker.record_failure(&b, now), Duration::from_millis(100));
        assert_eq!(tracker.record_failure(&b, now), Duration::from_millis(200));
        assert_eq!(tracker.record_failure(&b, now), Duration::from_millis(350));
        assert!(!tracker.is_available(&b, now));
        assert!(tracker.is_available(&b, now + Duration::from_millis(351)));

        tracker.record_success(&b, Duration::from_millis(5));
        assert_eq!(tracker.failures(&b), 0);
        assert!(tracker.is_available(&b, now));
    }

    #[test]
    fn test_status_answers_do_not_reset_fetch_backoff() {
        let b = NodeId::from("b");
        let mut tracker = PeerTracker::new(&[b.clone()], Duration::from_millis(100), Duration::from_secs(10));
        let now = Instant::now();

        // Answers every poll, fails every fetch: the backoff keeps doubling.
        for expected in [100, 200, 400, 800] {
            tracker.record_status(&b, status(60, 1), Duration::from_millis(5));
            assert_eq!(tracker.record_failure(&b, now), Duration::from_millis(expected));
        }
        tracker.record_status(&b, status(60, 1), Duration::from_millis(5));
        assert_eq!(tracker.failures(&b), 4);
        assert!(!tracker.is_available(&b, now + Duration::from_millis(500)));

        tracker.record_success(&b, Duration::from_millis(5));
        assert!(tracker.is_available(&b, now));
        assert!(tracker.unavailable().is_empty());
    }

    #[test]
    fn test_status_answer_lifts_unreachable_backoff() {
        let b = NodeId::from("b");
        let mut tracker = PeerTracker::new(&[b.clone()], Duration::from_millis(100), Duration::from_secs(1));
        let now = Instant::now();
        tracker.record_unreachable(&b, now);
        tracker.record_unreachable(&b, now);
        assert_eq!(tracker.unavailable(), vec![b.clone()]);

        tracker.record_status(&b, status(60, 1), Duration::from_millis(5));
        assert_eq!(tracker.failures(&b), 0);
        assert_eq!(tracker.eligible(60, now), vec![b]);
    }

    #[test]
    fn test_eligible_prefers_fast_peers_with_enough_entries() {
        let (b, c, d) = (NodeId::from("b"), NodeId::from("c"), NodeId::from("d"));
        let mut tracker = PeerTracker::new(&[b.clone(), c.clone(), d.clone()], Duration::from_millis(100), Duration::from_secs(1));
        tracker.record_status(&b, status(60, 1), Duration::from_millis(40));
        tracker.record_status(&c, status(60, 1), Duration::from_millis(5));
        tracker.record_status(&d, status(20, 1), Duration::from_millis(1));

        let now = Instant::now();
        assert_eq!(tracker.eligible(50, now), vec![c.clone(), b.clone()]);
        assert_eq!(tracker.eligible(10, now), vec![d.clone(), c.clone(), b.clone()]);

        tracker.record_failure(&c, now);
        assert_eq!(tracker.eligible(50, now), vec![b.clone()]);
        assert!(tracker.next_retry(50).is_some());

        tracker.record_unreachable(&b, now);
        assert!(tracker.eligible(50, now).is_empty());
        assert_eq!(tracker.unavailable(), vec![b, c]);
    }
}
