//! HTTP transport surface: the five endpoints peers and clients speak.
//!
//! Every response carries a `Routing-Version` header. `PUT`/`GET /kv`
//! additionally read the caller's own `Routing-Version` request header
//! and, when it is behind ours, embed a fresh `routing_table` snapshot in
//! the success body — so clients rarely need to poll `GET /routing_table`
//! on the happy path.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::NodeError;
use crate::gossip::GossipPayload;
use crate::node::{Node, PutRequest};

const ROUTING_VERSION_HEADER: &str = "routing-version";

pub fn build_router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/routing_table", get(get_routing_table))
        .route("/kv", put(put_kv).get(get_kv))
        .route("/join", post(join))
        .route("/gossip", post(gossip))
        .with_state(node)
}

fn with_routing_version(node: &Node, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(&node.routing_version().to_string()) {
        response.headers_mut().insert(ROUTING_VERSION_HEADER, value);
    }
    response
}

/// Parse the caller's `Routing-Version` request header, if present and
/// well-formed. A missing or unparseable header is treated the same as a
/// stale one: the caller gets a fresh snapshot rather than an error.
fn caller_routing_version(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(ROUTING_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

/// Piggyback a fresh routing table onto a success body when the caller's
/// version is behind ours, so they rarely need to poll `GET /routing_table`.
fn attach_routing_table(mut body: Value, refreshed: Option<crate::routing::RoutingTableSnapshot>) -> Value {
    if let Some(snapshot) = refreshed {
        if let Ok(snapshot) = serde_json::to_value(snapshot) {
            body["routing_table"] = snapshot;
        }
    }
    body
}

async fn get_routing_table(State(node): State<Arc<Node>>) -> Response {
    let snapshot = node.routing_table_snapshot();
    with_routing_version(&node, Json(snapshot).into_response())
}

#[derive(Debug, Deserialize)]
struct GetKvQuery {
    key: String,
}

/// On `NotOwner`, redirect the caller straight to the current owner
/// instead of just reporting failure — it already cost a lock acquisition
/// to find out, so hand the answer over.
fn not_owner_response(node: &Node, key: &str) -> Response {
    let owner = node.gossip_owner_or_empty(key);
    let body = json!({
        "status": "error",
        "message": "node is not responsible for this key",
        "routing_table": node.routing_table_snapshot(),
        "owner": owner,
    });
    (axum::http::StatusCode::MISDIRECTED_REQUEST, Json(body)).into_response()
}

async fn put_kv(
    State(node): State<Arc<Node>>,
    headers: HeaderMap,
    Json(body): Json<PutRequest>,
) -> Response {
    let refreshed = node.refresh_if_stale(caller_routing_version(&headers));
    let response = match node.put(body.key.clone(), body.value) {
        Ok(()) => {
            let body = attach_routing_table(json!({ "status": "ok" }), refreshed);
            (axum::http::StatusCode::OK, Json(body)).into_response()
        }
        Err(NodeError::NotOwner) => not_owner_response(&node, &body.key),
        Err(err) => err.into_response(),
    };
    with_routing_version(&node, response)
}

async fn get_kv(
    State(node): State<Arc<Node>>,
    headers: HeaderMap,
    Query(query): Query<GetKvQuery>,
) -> Response {
    let refreshed = node.refresh_if_stale(caller_routing_version(&headers));
    let response = match node.get(&query.key) {
        Ok(value) => {
            let body = attach_routing_table(json!({ "key": query.key, "value": value }), refreshed);
            Json(body).into_response()
        }
        Err(NodeError::NotOwner) => not_owner_response(&node, &query.key),
        Err(err) => err.into_response(),
    };
    with_routing_version(&node, response)
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    host: String,
    port: u16,
}

async fn join(State(node): State<Arc<Node>>, Json(body): Json<JoinRequest>) -> Response {
    node.admit_peer(&body.host, body.port).await;
    let snapshot = node.routing_table_snapshot();
    with_routing_version(&node, Json(snapshot).into_response())
}

async fn gossip(State(node): State<Arc<Node>>, payload: Result<Json<GossipPayload>, axum::extract::rejection::JsonRejection>) -> Response {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(err) => return NodeError::MalformedGossip(err.to_string()).into_response(),
    };
    node.receive_gossip(payload);
    (axum::http::StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}
