// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use replica_kernel::error::KernelError;
use replica_kernel::types::{NodeId, SeqNo};
use replica_persistence::PersistenceError;
use serde_json::json;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Ledger fork at seq {seq} between {left} and {right}: {detail}")]
    LedgerFork {
        seq: SeqNo,
        left: NodeId,
        right: NodeId,
        detail: String,
    },
    #[error("Peer {peer} unavailable: {reason}")]
    PeerUnavailable { peer: NodeId, reason: String },
    #[error("Catchup on {node} timed out after {rounds} rounds at {local}/{target}")]
    CatchupTimeout {
        node: NodeId,
        rounds: u32,
        local: SeqNo,
        target: SeqNo,
    },
    #[error("Catchup on {node} cancelled at seq {applied}")]
    Cancelled { node: NodeId, applied: SeqNo },
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),
    #[error("Node {node} cannot {action} while {from}")]
    InvalidTransition {
        node: NodeId,
        from: String,
        action: String,
    },
    #[error("Node {node} degraded: {reason}")]
    Degraded { node: NodeId, reason: String },
    #[error("Transport error: {0}")]
    Transport(TransportError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A peer that cannot be reached is a [`NodeError::PeerUnavailable`]; a peer
/// that answered badly stays a transport error.
impl From<TransportError> for NodeError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unreachable { .. } | TransportError::Timeout { .. } => NodeError::PeerUnavailable {
                peer: e.peer().clone(),
                reason: e.to_string(),
            },
            other => NodeError::Transport(other),
        }
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match &self {
            NodeError::Kernel(KernelError::OutOfRange { .. }) => StatusCode::NOT_FOUND,
            NodeError::Kernel(KernelError::UnknownTable(_)) => StatusCode::NOT_FOUND,
            NodeError::Kernel(KernelError::SequenceGap { .. })
            | NodeError::Kernel(KernelError::DuplicateEntry { .. })
            | NodeError::Kernel(KernelError::MalformedPayload { .. }) => StatusCode::BAD_REQUEST,
            NodeError::Kernel(KernelError::ProjectionOrder { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            NodeError::UnknownNode(_) => StatusCode::NOT_FOUND,
            NodeError::InvalidTransition { .. } | NodeError::LedgerFork { .. } => StatusCode::CONFLICT,
            NodeError::PeerUnavailable { .. } | NodeError::Transport(_) => StatusCode::BAD_GATEWAY,
            NodeError::CatchupTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            NodeError::Degraded { .. } | NodeError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            NodeError::Config(_) => StatusCode::BAD_REQUEST,
            NodeError::Persistence(_) | NodeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
