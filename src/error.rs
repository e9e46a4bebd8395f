//! Crate-wide error taxonomy.
//!
//! Ownership and validation errors propagate to the requester; structural
//! invariants (empty ring, missing physical node) are bugs and abort the
//! operation loudly. Transient network errors are absorbed by periodic
//! convergence and never surface as [`NodeError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors produced by core node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The request arrived at a node that does not currently own the key.
    #[error("node is not responsible for this key")]
    NotOwner,

    /// The key is absent on the node that owns it.
    #[error("key not found")]
    NotFound,

    /// Lookup attempted on a ring with no virtual nodes.
    #[error("routing table has no virtual nodes")]
    EmptyRing,

    /// Inbound gossip payload failed validation.
    #[error("malformed gossip payload: {0}")]
    MalformedGossip(String),

    /// Inbound request body failed validation.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A network send failed; the caller is expected to retry on the next
    /// periodic iteration rather than treat this as fatal.
    #[error("transport error: {0}")]
    Transport(String),

    /// The client or a joining node could not reach the configured
    /// bootstrap node.
    #[error("failed to reach bootstrap node: {0}")]
    BootstrapFailure(String),
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match self {
            NodeError::NotOwner => StatusCode::FORBIDDEN,
            NodeError::NotFound => StatusCode::NOT_FOUND,
            NodeError::EmptyRing => StatusCode::INTERNAL_SERVER_ERROR,
            NodeError::MalformedGossip(_) | NodeError::MalformedRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            NodeError::Transport(_) | NodeError::BootstrapFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({ "status": "error", "message": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
