// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use futures::future::BoxFuture;
use futures::FutureExt;
use replica_kernel::projection::ProjectionRecord;
use replica_kernel::types::{LedgerEntry, NodeId, SeqNo, TableName};
use replica_kernel::view::{LedgerStatus, NodeView};
use reqwest::{Client, StatusCode};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::api::{EntriesResponse, LedgerStatusResponse, NodeViewResponse, TableRecordsResponse};
use crate::config::PeerConfig;
use crate::transport::{PeerTransport, TransportError, TransportResult};

/// [`PeerTransport`] over the peer HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    peers: FxHashMap<NodeId, String>,
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(peers: &[PeerConfig], timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            peers: peers
                .iter()
                .map(|p| (p.id.clone(), p.url.trim_end_matches('/').to_string()))
                .collect(),
            client,
            timeout,
        }
    }

    pub fn base_url(&self, peer: &NodeId) -> Option<&str> {
        self.peers.get(peer).map(String::as_str)
    }

    /// GET `path` on `peer`. `Ok(None)` when the peer answers 404.
    async fn get<T: DeserializeOwned>(&self, peer: &NodeId, path: &str) -> TransportResult<Option<T>> {
        let base = self.base_url(peer).ok_or_else(|| TransportError::Unreachable {
            peer: peer.clone(),
            reason: "no address configured".to_string(),
        })?;
        let url = format!("{}{}", base, path);

        let resp = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.request_error(peer, e))?;

        match resp.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Ok(None),
            s => {
                return Err(TransportError::Unreachable {
                    peer: peer.clone(),
                    reason: format!("{} returned {}", path, s),
                })
            }
        }

        resp.json().await.map(Some).map_err(|e| TransportError::Malformed {
            peer: peer.clone(),
            reason: e.to_string(),
        })
    }

    async fn get_found<T: DeserializeOwned>(&self, peer: &NodeId, path: &str) -> TransportResult<T> {
        self.get(peer, path).await?.ok_or_else(|| TransportError::Malformed {
            peer: peer.clone(),
            reason: format!("{} not found", path),
        })
    }

    fn request_error(&self, peer: &NodeId, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                peer: peer.clone(),
                after: self.timeout,
            }
        } else {
            TransportError::Unreachable {
                peer: peer.clone(),
                reason: e.to_string(),
            }
        }
    }
}

impl PeerTransport for HttpTransport {
    fn ledger_status<'a>(&'a self, peer: &'a NodeId) -> BoxFuture<'a, TransportResult<LedgerStatus>> {
        async move {
            let resp: LedgerStatusResponse = self.get_found(peer, "/v1/ledger/status").await?;
            resp.into_status().map_err(|reason| TransportError::Malformed {
                peer: peer.clone(),
                reason,
            })
        }
        .boxed()
    }

    fn entries<'a>(&'a self, peer: &'a NodeId, from: SeqNo, to: SeqNo) -> BoxFuture<'a, TransportResult<Vec<LedgerEntry>>> {
        async move {
            let path = format!("/v1/ledger/entries?from={}&to={}", from, to);
            let no_data = || TransportError::NoData {
                peer: peer.clone(),
                from,
                to,
            };
            // 404 on a range means the peer is shorter than `from`.
            let resp: EntriesResponse = self.get(peer, &path).await?.ok_or_else(no_data)?;
            if resp.entries.is_empty() {
                return Err(no_data());
            }
            resp.entries
                .into_iter()
                .map(|dto| dto.into_entry())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|reason| TransportError::Malformed {
                    peer: peer.clone(),
                    reason,
                })
        }
        .boxed()
    }

    fn node_view<'a>(&'a self, peer: &'a NodeId) -> BoxFuture<'a, TransportResult<NodeView>> {
        async move {
            let resp: NodeViewResponse = self.get_found(peer, "/v1/projection/view").await?;
            resp.into_view().map_err(|reason| TransportError::Malformed {
                peer: peer.clone(),
                reason,
            })
        }
        .boxed()
    }

    fn table_records<'a>(&'a self, peer: &'a NodeId, table: TableName) -> BoxFuture<'a, TransportResult<Vec<ProjectionRecord>>> {
        async move {
            let path = format!("/v1/projection/tables/{}", table);
            let resp: TableRecordsResponse = self.get_found(peer, &path).await?;
            Ok(resp.records)
        }
        .boxed()
    }
}
