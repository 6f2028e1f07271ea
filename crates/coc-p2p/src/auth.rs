//! # Request Authentication
//!
//! Every mutating gossip request may carry an `_auth` envelope:
//! `{senderId, timestampMs, nonce, signature}`. The signature covers the
//! canonical string `"p2p:" + path + ":" + senderId + ":" + timestampMs +
//! ":" + nonce + ":" + payloadHash`, where the payload hash is taken over
//! the body *without* the envelope.
//!
//! Replay defense is the persistent `(senderId, nonce)` log: a fingerprint
//! consumes exactly once inside its TTL window, across restarts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use coc_storage::PersistentNonceLog;
use shared_crypto::{p2p_envelope_message, recover_address, NodeSigner};
use shared_types::EnforcementMode;

use crate::errors::P2pError;

/// Maximum clock skew tolerated on envelope timestamps.
pub const MAX_SKEW_MS: u64 = 120_000;

/// The wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEnvelope {
    pub sender_id: String,
    pub timestamp_ms: u64,
    pub nonce: String,
    pub signature: String,
}

impl AuthEnvelope {
    /// Sign an outgoing payload for `path`.
    pub fn sign(
        signer: &NodeSigner,
        path: &str,
        payload: &Value,
        timestamp_ms: u64,
        nonce: String,
    ) -> Result<Self, P2pError> {
        let sender_id = signer.node_id();
        let message = p2p_envelope_message(path, &sender_id, timestamp_ms, &nonce, payload);
        let signature = signer
            .sign(&message)
            .map_err(|e| P2pError::Unauthorized(e.to_string()))?;
        Ok(Self {
            sender_id,
            timestamp_ms,
            nonce,
            signature,
        })
    }

    /// Attach this envelope to a payload object.
    pub fn attach(&self, payload: &mut Value) -> Result<(), P2pError> {
        let envelope = serde_json::to_value(self)
            .map_err(|e| P2pError::BadPayload(e.to_string()))?;
        match payload.as_object_mut() {
            Some(map) => {
                map.insert("_auth".into(), envelope);
                Ok(())
            }
            None => Err(P2pError::BadPayload("payload must be an object".into())),
        }
    }
}

/// Inbound auth configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: EnforcementMode,
    pub max_skew_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Enforce,
            max_skew_ms: MAX_SKEW_MS,
        }
    }
}

/// Verifies inbound envelopes against the persistent nonce log.
pub struct AuthVerifier {
    config: AuthConfig,
    nonce_log: PersistentNonceLog,
}

impl AuthVerifier {
    pub fn new(config: AuthConfig, nonce_log: PersistentNonceLog) -> Self {
        Self { config, nonce_log }
    }

    pub fn mode(&self) -> EnforcementMode {
        self.config.mode
    }

    /// Verify and strip the `_auth` envelope from `body`.
    ///
    /// Returns the authenticated sender id, or `None` when the mode lets an
    /// unauthenticated (or failed, in monitor mode) request through.
    pub fn verify(
        &self,
        path: &str,
        body: &mut Value,
        now_ms: u64,
    ) -> Result<Option<String>, P2pError> {
        if self.config.mode.is_off() {
            if let Some(map) = body.as_object_mut() {
                map.remove("_auth");
            }
            return Ok(None);
        }

        let envelope_value = body
            .as_object_mut()
            .and_then(|map| map.remove("_auth"));
        let result = self.check(path, body, envelope_value, now_ms);
        match result {
            Ok(sender) => Ok(Some(sender)),
            Err(e) if self.config.mode.is_enforce() => Err(e),
            Err(e) => {
                warn!(path, error = %e, "auth failure let through (monitor)");
                Ok(None)
            }
        }
    }

    fn check(
        &self,
        path: &str,
        payload: &Value,
        envelope_value: Option<Value>,
        now_ms: u64,
    ) -> Result<String, P2pError> {
        let envelope_value =
            envelope_value.ok_or_else(|| P2pError::Unauthorized("missing _auth".into()))?;
        let envelope: AuthEnvelope = serde_json::from_value(envelope_value)
            .map_err(|e| P2pError::Unauthorized(format!("bad envelope: {e}")))?;

        let skew = now_ms.abs_diff(envelope.timestamp_ms);
        if skew > self.config.max_skew_ms {
            return Err(P2pError::Unauthorized(format!("clock skew {skew}ms")));
        }

        let message = p2p_envelope_message(
            path,
            &envelope.sender_id,
            envelope.timestamp_ms,
            &envelope.nonce,
            payload,
        );
        let recovered = recover_address(&message, &envelope.signature)
            .map_err(|e| P2pError::Unauthorized(format!("bad signature: {e}")))?;
        if recovered.to_hex() != envelope.sender_id.to_lowercase() {
            return Err(P2pError::Unauthorized("signer mismatch".into()));
        }

        // Replay: one (sender, nonce) pair per TTL window.
        let fingerprint = format!("{}:{}", envelope.sender_id.to_lowercase(), envelope.nonce);
        let fresh = self
            .nonce_log
            .consume(&fingerprint, now_ms)
            .map_err(|e| P2pError::NonceLog(e.to_string()))?;
        if !fresh {
            return Err(P2pError::Unauthorized("nonce replay".into()));
        }

        Ok(envelope.sender_id.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verifier(mode: EnforcementMode, dir: &tempfile::TempDir) -> AuthVerifier {
        let log = PersistentNonceLog::open(
            &dir.path().join("auth-nonces.log"),
            86_400_000,
            100_000,
            0,
        )
        .unwrap();
        AuthVerifier::new(
            AuthConfig {
                mode,
                max_skew_ms: MAX_SKEW_MS,
            },
            log,
        )
    }

    fn signed_body(signer: &NodeSigner, path: &str, now: u64, nonce: &str) -> Value {
        let mut body = json!({"rawTx": "0xabc"});
        let payload = body.clone();
        let envelope =
            AuthEnvelope::sign(signer, path, &payload, now, nonce.to_string()).unwrap();
        envelope.attach(&mut body).unwrap();
        body
    }

    #[test]
    fn valid_envelope_authenticates_and_strips() {
        let dir = tempfile::tempdir().unwrap();
        let v = verifier(EnforcementMode::Enforce, &dir);
        let signer = NodeSigner::random();
        let mut body = signed_body(&signer, "/p2p/gossip-tx", 1_000, "n-1");
        let sender = v.verify("/p2p/gossip-tx", &mut body, 1_000).unwrap();
        assert_eq!(sender, Some(signer.node_id()));
        assert!(body.get("_auth").is_none());
    }

    #[test]
    fn missing_envelope_is_rejected_in_enforce() {
        let dir = tempfile::tempdir().unwrap();
        let v = verifier(EnforcementMode::Enforce, &dir);
        let mut body = json!({"rawTx": "0xabc"});
        assert!(v.verify("/p2p/gossip-tx", &mut body, 0).is_err());
    }

    #[test]
    fn monitor_mode_lets_failures_through() {
        let dir = tempfile::tempdir().unwrap();
        let v = verifier(EnforcementMode::Monitor, &dir);
        let mut body = json!({"rawTx": "0xabc"});
        assert_eq!(v.verify("/p2p/gossip-tx", &mut body, 0).unwrap(), None);
    }

    #[test]
    fn skew_and_replay_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let v = verifier(EnforcementMode::Enforce, &dir);
        let signer = NodeSigner::random();

        let mut stale = signed_body(&signer, "/p2p/gossip-tx", 0, "n-skew");
        assert!(v
            .verify("/p2p/gossip-tx", &mut stale, MAX_SKEW_MS + 1)
            .is_err());

        let mut first = signed_body(&signer, "/p2p/gossip-tx", 5_000, "n-replay");
        v.verify("/p2p/gossip-tx", &mut first, 5_000).unwrap();
        let mut second = signed_body(&signer, "/p2p/gossip-tx", 5_000, "n-replay");
        assert!(v.verify("/p2p/gossip-tx", &mut second, 5_100).is_err());
    }

    #[test]
    fn wrong_path_invalidates_the_signature() {
        let dir = tempfile::tempdir().unwrap();
        let v = verifier(EnforcementMode::Enforce, &dir);
        let signer = NodeSigner::random();
        let mut body = signed_body(&signer, "/p2p/gossip-tx", 1_000, "n-path");
        assert!(v.verify("/p2p/gossip-block", &mut body, 1_000).is_err());
    }

    #[test]
    fn tampered_payload_invalidates_the_signature() {
        let dir = tempfile::tempdir().unwrap();
        let v = verifier(EnforcementMode::Enforce, &dir);
        let signer = NodeSigner::random();
        let mut body = signed_body(&signer, "/p2p/gossip-tx", 1_000, "n-tamper");
        body["rawTx"] = json!("0xevil");
        assert!(v.verify("/p2p/gossip-tx", &mut body, 1_000).is_err());
    }
}
