//! # Gossip Server
//!
//! The HTTP surface peers talk to. Every mutating request walks the same
//! ingress pipeline, in order: per-IP rate limit, ban check, body-size
//! cap, JSON parse, auth envelope. Failures answer with bare status codes;
//! internals never leak into a response body.
//!
//! A received block is applied locally before any rebroadcast, and an
//! invalid block is never propagated.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use shared_crypto::{identity_message, NodeSigner};
use shared_types::{BftMessage, ChainBlock};

use crate::auth::AuthVerifier;
use crate::broadcast::Broadcaster;
use crate::discovery::Discovery;
use crate::hooks::NodeHooks;
use crate::rate_limit::SlidingWindowLimiter;
use crate::scoring::{PeerScoring, ScoreEvent};
use crate::seen::SeenSet;

/// Request body cap: 2 MiB.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Seen-set capacities for gossip dedup.
const SEEN_TX_CAPACITY: usize = 50_000;
const SEEN_BLOCK_CAPACITY: usize = 10_000;

/// Server construction knobs.
#[derive(Debug, Clone)]
pub struct P2pServerConfig {
    pub bind: SocketAddr,
    /// Protocol tag reported by `/p2p/node-info`.
    pub protocol: String,
    /// Peers receiving each rebroadcast batch.
    pub fanout_peers: usize,
}

/// Shared state behind every handler.
pub struct P2pState {
    pub hooks: Arc<dyn NodeHooks>,
    pub verifier: AuthVerifier,
    pub limiter: SlidingWindowLimiter,
    pub scoring: Arc<PeerScoring>,
    pub discovery: Arc<Discovery>,
    pub signer: Arc<NodeSigner>,
    pub broadcaster: Arc<Broadcaster>,
    pub protocol: String,
    pub fanout_peers: usize,
    seen_txs: SeenSet,
    seen_blocks: SeenSet,
}

impl P2pState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hooks: Arc<dyn NodeHooks>,
        verifier: AuthVerifier,
        limiter: SlidingWindowLimiter,
        scoring: Arc<PeerScoring>,
        discovery: Arc<Discovery>,
        signer: Arc<NodeSigner>,
        broadcaster: Arc<Broadcaster>,
        protocol: String,
        fanout_peers: usize,
    ) -> Self {
        Self {
            hooks,
            verifier,
            limiter,
            scoring,
            discovery,
            signer,
            broadcaster,
            protocol,
            fanout_peers,
            seen_txs: SeenSet::new(SEEN_TX_CAPACITY),
            seen_blocks: SeenSet::new(SEEN_BLOCK_CAPACITY),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Build the router with the full route table.
pub fn router(state: Arc<P2pState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/p2p/chain-snapshot", get(chain_snapshot))
        .route("/p2p/state-snapshot", get(state_snapshot))
        .route("/p2p/peers", get(peers))
        .route("/p2p/identity-proof", get(identity_proof))
        .route("/p2p/node-info", get(node_info))
        .route("/p2p/gossip-tx", post(gossip_tx))
        .route("/p2p/gossip-block", post(gossip_block))
        .route("/p2p/bft-message", post(bft_message))
        .route("/p2p/pubsub-message", post(pubsub_message))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process stops.
pub async fn serve(state: Arc<P2pState>, config: P2pServerConfig) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(bind = %config.bind, "p2p server listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

// -----------------------------------------------------------------------------
// Ingress pipeline
// -----------------------------------------------------------------------------

/// Steps 1-5 for every mutating request. Returns the parsed payload (auth
/// envelope stripped) and the authenticated sender, or the error response.
fn ingress(
    state: &P2pState,
    addr: SocketAddr,
    path: &str,
    body: &Bytes,
) -> Result<(Value, Option<String>), Response> {
    let now = now_ms();
    let ip = addr.ip().to_string();

    if !state.limiter.allow(&ip, now) {
        return Err(reject(StatusCode::TOO_MANY_REQUESTS, "rate limited"));
    }
    if state.scoring.is_banned(&ip, now) {
        return Err(reject(StatusCode::FORBIDDEN, "banned"));
    }
    if body.len() > MAX_BODY_BYTES {
        return Err(reject(StatusCode::PAYLOAD_TOO_LARGE, "body too large"));
    }
    let mut payload: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return Err(reject(StatusCode::BAD_REQUEST, "bad json")),
    };
    let sender = match state.verifier.verify(path, &mut payload, now) {
        Ok(sender) => sender,
        Err(e) => {
            debug!(path, %ip, error = %e, "auth rejected");
            return Err(reject(StatusCode::UNAUTHORIZED, "unauthorized"));
        }
    };
    Ok((payload, sender))
}

fn reject(status: StatusCode, label: &'static str) -> Response {
    (status, Json(json!({ "error": label }))).into_response()
}

// -----------------------------------------------------------------------------
// Read endpoints
// -----------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn chain_snapshot(State(state): State<Arc<P2pState>>) -> Response {
    match state.hooks.chain_snapshot() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => reject(StatusCode::NOT_FOUND, "no chain"),
    }
}

async fn state_snapshot(State(state): State<Arc<P2pState>>) -> Response {
    match state.hooks.state_snapshot() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => reject(StatusCode::NOT_FOUND, "no state"),
    }
}

async fn peers(State(state): State<Arc<P2pState>>) -> Json<Value> {
    // Known peers only, capped to 20 on the wire.
    Json(json!(state.discovery.known_peers(20)))
}

async fn identity_proof(
    State(state): State<Arc<P2pState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(challenge) = params.get("challenge").filter(|c| !c.is_empty()) else {
        return reject(StatusCode::BAD_REQUEST, "missing challenge");
    };
    let node_id = state.signer.node_id();
    match state.signer.sign(&identity_message(challenge, &node_id)) {
        Ok(signature) => Json(json!({
            "nodeId": node_id,
            "challenge": challenge,
            "signature": signature,
        }))
        .into_response(),
        Err(_) => reject(StatusCode::INTERNAL_SERVER_ERROR, "signing failed"),
    }
}

async fn node_info(State(state): State<Arc<P2pState>>) -> Json<Value> {
    let mut info = state.hooks.node_info();
    if let Some(map) = info.as_object_mut() {
        map.insert("protocol".into(), json!(state.protocol));
        map.insert("nodeId".into(), json!(state.signer.node_id()));
        map.insert("peers".into(), json!(state.discovery.known_count()));
    }
    Json(info)
}

// -----------------------------------------------------------------------------
// Gossip ingress
// -----------------------------------------------------------------------------

async fn gossip_tx(
    State(state): State<Arc<P2pState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let (payload, sender) = match ingress(&state, addr, "/p2p/gossip-tx", &body) {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    let Some(raw_tx) = payload.get("rawTx").and_then(Value::as_str) else {
        return reject(StatusCode::BAD_REQUEST, "missing rawTx");
    };

    // Bounded FIFO dedup: duplicates are silently dropped.
    let fingerprint = shared_types::keccak256(raw_tx.as_bytes()).to_hex();
    if !state.seen_txs.insert(&fingerprint) {
        return Json(json!({ "ok": true, "duplicate": true })).into_response();
    }

    match state.hooks.receive_tx(raw_tx) {
        Ok(hash) => {
            spawn_rebroadcast(
                &state,
                "/p2p/gossip-tx",
                json!({ "rawTx": raw_tx }),
                hash.to_hex(),
            );
            Json(json!({ "ok": true, "hash": hash })).into_response()
        }
        Err(reason) => {
            debug!(reason, "gossip tx rejected");
            if let Some(sender) = sender {
                state.scoring.record(&sender, ScoreEvent::InvalidData, now_ms());
            }
            reject(StatusCode::BAD_REQUEST, "rejected")
        }
    }
}

async fn gossip_block(
    State(state): State<Arc<P2pState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let (payload, sender) = match ingress(&state, addr, "/p2p/gossip-block", &body) {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    let block: ChainBlock = match payload
        .get("block")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
    {
        Ok(Some(block)) => block,
        _ => return reject(StatusCode::BAD_REQUEST, "missing block"),
    };

    let fingerprint = block.hash.to_hex();
    if !state.seen_blocks.insert(&fingerprint) {
        return Json(json!({ "ok": true, "duplicate": true })).into_response();
    }

    // Apply locally BEFORE rebroadcast; an invalid block never propagates.
    match state.hooks.receive_block(block.clone()) {
        Ok(newly_applied) => {
            if newly_applied {
                spawn_rebroadcast(
                    &state,
                    "/p2p/gossip-block",
                    json!({ "block": block }),
                    fingerprint,
                );
            }
            Json(json!({ "ok": true, "applied": newly_applied })).into_response()
        }
        Err(reason) => {
            warn!(height = block.number, reason, "gossip block rejected");
            if let Some(sender) = sender {
                state.scoring.record(&sender, ScoreEvent::InvalidData, now_ms());
            }
            reject(StatusCode::BAD_REQUEST, "rejected")
        }
    }
}

async fn bft_message(
    State(state): State<Arc<P2pState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let (payload, sender) = match ingress(&state, addr, "/p2p/bft-message", &body) {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    let message: BftMessage = match serde_json::from_value(payload) {
        Ok(message) => message,
        Err(_) => return reject(StatusCode::BAD_REQUEST, "bad bft message"),
    };
    // An authenticated envelope must match the vote it carries.
    if let Some(sender) = &sender {
        if sender != &message.sender_id.to_lowercase() {
            return reject(StatusCode::UNAUTHORIZED, "sender mismatch");
        }
    }
    match state.hooks.receive_bft(message) {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(_) => reject(StatusCode::BAD_REQUEST, "rejected"),
    }
}

async fn pubsub_message(
    State(state): State<Arc<P2pState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Response {
    let (payload, _sender) = match ingress(&state, addr, "/p2p/pubsub-message", &body) {
        Ok(parts) => parts,
        Err(response) => return response,
    };
    let (Some(topic), Some(message)) = (
        payload.get("topic").and_then(Value::as_str),
        payload.get("message"),
    ) else {
        return reject(StatusCode::BAD_REQUEST, "missing topic or message");
    };
    state.hooks.receive_pubsub(topic, message);
    Json(json!({ "ok": true })).into_response()
}

/// Fire-and-forget egress; the broadcaster's dedup keeps a fingerprint
/// from racing itself to any single peer.
fn spawn_rebroadcast(state: &Arc<P2pState>, path: &'static str, payload: Value, fingerprint: String) {
    let peers = state.discovery.known_peers(state.fanout_peers);
    if peers.is_empty() {
        return;
    }
    let broadcaster = Arc::clone(&state.broadcaster);
    tokio::spawn(async move {
        let (delivered, failed) = broadcaster
            .broadcast(peers, path, payload, &fingerprint, now_ms())
            .await;
        debug!(path, delivered, failed, "rebroadcast settled");
    });
}
