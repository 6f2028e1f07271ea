//! # Peer Client
//!
//! Outbound HTTP with mandatory timeouts. Every POST carries a signed
//! `_auth` envelope; every response is JSON or an error. Cancellation is
//! the timeout: a hung peer costs one bounded await, never a stuck task.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use shared_crypto::NodeSigner;
use shared_types::ChainSnapshot;

use crate::auth::AuthEnvelope;
use crate::discovery::PeerInfo;
use crate::errors::P2pError;

/// Default per-request timeout.
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

/// HTTP client for peer endpoints.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    signer: Arc<NodeSigner>,
}

impl PeerClient {
    pub fn new(signer: Arc<NodeSigner>, timeout_ms: u64) -> Result<Self, P2pError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .connect_timeout(Duration::from_millis(timeout_ms.min(5_000)))
            .build()
            .map_err(|e| P2pError::PeerIo(e.to_string()))?;
        Ok(Self { http, signer })
    }

    /// POST a payload with a fresh signed envelope.
    pub async fn post(
        &self,
        peer: &PeerInfo,
        path: &str,
        mut payload: Value,
        now_ms: u64,
    ) -> Result<Value, P2pError> {
        let envelope = AuthEnvelope::sign(
            &self.signer,
            path,
            &payload,
            now_ms,
            Uuid::new_v4().to_string(),
        )?;
        envelope.attach(&mut payload)?;

        let url = format!("{}{}", peer.url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| P2pError::PeerIo(e.to_string()))?;
        Self::read_json(response).await
    }

    /// Plain GET.
    pub async fn get(&self, peer: &PeerInfo, path: &str) -> Result<Value, P2pError> {
        let url = format!("{}{}", peer.url.trim_end_matches('/'), path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| P2pError::PeerIo(e.to_string()))?;
        Self::read_json(response).await
    }

    /// Fetch and decode a peer's chain snapshot.
    pub async fn chain_snapshot(&self, peer: &PeerInfo) -> Result<ChainSnapshot, P2pError> {
        let value = self.get(peer, "/p2p/chain-snapshot").await?;
        serde_json::from_value(value).map_err(|e| P2pError::BadPayload(e.to_string()))
    }

    /// Fetch a peer's state snapshot document.
    pub async fn state_snapshot(&self, peer: &PeerInfo) -> Result<Value, P2pError> {
        self.get(peer, "/p2p/state-snapshot").await
    }

    /// Fetch a peer's peer list.
    pub async fn peers(&self, peer: &PeerInfo) -> Result<Vec<PeerInfo>, P2pError> {
        let value = self.get(peer, "/p2p/peers").await?;
        serde_json::from_value(value).map_err(|e| P2pError::BadPayload(e.to_string()))
    }

    /// Run the identity-proof handshake against a quarantined candidate:
    /// send a random challenge and check the signature recovers to the id
    /// the peer claims.
    pub async fn verify_identity(&self, peer: &PeerInfo) -> Result<bool, P2pError> {
        let challenge = Uuid::new_v4().to_string();
        let value = self
            .get(
                peer,
                &format!("/p2p/identity-proof?challenge={challenge}"),
            )
            .await?;
        let signature = value
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| P2pError::BadPayload("missing signature".into()))?;
        let message = shared_crypto::identity_message(&challenge, &peer.id);
        match shared_crypto::recover_address(&message, signature) {
            Ok(address) => Ok(address.to_hex() == peer.id.to_lowercase()),
            Err(_) => Ok(false),
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, P2pError> {
        let status = response.status();
        if !status.is_success() {
            return Err(P2pError::PeerIo(format!("status {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| P2pError::BadPayload(e.to_string()))
    }
}
