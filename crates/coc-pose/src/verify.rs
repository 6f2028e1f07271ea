//! # Receipt Verification
//!
//! Every receipt passes four gates: the challenger's signature on the
//! challenge, the node's signature on the receipt, the challenge-specific
//! result check (uptime tolerance / storage merkle path / relay witness),
//! and the replay registry. Only then does it count toward scores and
//! batches.

use serde_json::Value;

use coc_storage::PersistentNonceLog;
use shared_crypto::{pose_challenge_message, pose_receipt_message, recover_address};
use shared_types::{keccak256, Address, Challenge, ChallengeType, Hash32, PoseReceipt, QuerySpec};

use crate::errors::PoseError;
use crate::merkle::verify_merkle_path;

/// Relay witnesses must land within this much of the challenge issue time.
pub const MAX_RELAY_LATENCY_MS: u64 = 300_000;

/// Replay-registry fingerprint:
/// `keccak256(challengerId || nodeId || nonce || type || epochId)`.
pub fn challenge_fingerprint(challenge: &Challenge) -> Hash32 {
    let material = format!(
        "{}{}{}{}{}",
        challenge.challenger_id.to_lowercase(),
        challenge.node_id.to_lowercase(),
        challenge.nonce,
        challenge.challenge_type.tag(),
        challenge.epoch_id
    );
    keccak256(material.as_bytes())
}

/// Environment a verification runs against.
#[derive(Debug, Clone)]
pub struct VerifyContext {
    /// Reference chain height for uptime checks.
    pub expected_height: u64,
    pub now_ms: u64,
}

/// Stateless checks plus the persistent replay registry.
pub struct ReceiptVerifier<'a> {
    registry: &'a PersistentNonceLog,
}

impl<'a> ReceiptVerifier<'a> {
    pub fn new(registry: &'a PersistentNonceLog) -> Self {
        Self { registry }
    }

    /// Full verification of a `(challenge, receipt)` pair.
    pub fn verify(
        &self,
        challenge: &Challenge,
        receipt: &PoseReceipt,
        ctx: &VerifyContext,
    ) -> Result<(), PoseError> {
        if receipt.challenge_id != challenge.challenge_id {
            return Err(PoseError::Malformed("receipt for a different challenge".into()));
        }

        // Challenger signature over the canonical challenge message.
        let challenger_sig = challenge
            .challenger_sig
            .as_deref()
            .ok_or_else(|| PoseError::Signature("unsigned challenge".into()))?;
        let challenge_msg = pose_challenge_message(
            &challenge.challenge_id,
            challenge.epoch_id,
            &challenge.node_id,
        );
        let challenger = recover_address(&challenge_msg, challenger_sig)
            .map_err(|e| PoseError::Signature(format!("challenger: {e}")))?;
        if challenger.to_hex() != challenge.challenger_id.to_lowercase() {
            return Err(PoseError::Signature("challenger signer mismatch".into()));
        }

        // Node signature over the canonical receipt message.
        let receipt_msg = pose_receipt_message(
            &receipt.challenge_id,
            &receipt.node_id,
            &receipt.response_body,
            Some(receipt.response_at_ms),
        );
        let responder = recover_address(&receipt_msg, &receipt.node_sig)
            .map_err(|e| PoseError::Signature(format!("responder: {e}")))?;
        if responder.to_hex() != challenge.node_id.to_lowercase() {
            return Err(PoseError::Signature("responder signer mismatch".into()));
        }

        // Challenge-specific result check.
        match (&challenge.query_spec, challenge.challenge_type) {
            (QuerySpec::Uptime { tolerance }, ChallengeType::Uptime) => {
                self.check_uptime(receipt, *tolerance, ctx)?
            }
            (
                QuerySpec::Storage {
                    root,
                    chunk_index,
                    tree_size,
                },
                ChallengeType::Storage,
            ) => self.check_storage(receipt, root, *chunk_index, *tree_size)?,
            (QuerySpec::Relay { route_tag }, ChallengeType::Relay) => {
                self.check_relay(challenge, receipt, route_tag)?
            }
            _ => {
                return Err(PoseError::Malformed(
                    "query spec does not match challenge type".into(),
                ))
            }
        }

        // Replay registry last, so a rejected receipt does not burn the
        // challenge tuple.
        let fingerprint = challenge_fingerprint(challenge).to_hex();
        let fresh = self
            .registry
            .consume(&fingerprint, ctx.now_ms)
            .map_err(|e| PoseError::Journal(e.to_string()))?;
        if !fresh {
            return Err(PoseError::Replay);
        }
        Ok(())
    }

    fn check_uptime(
        &self,
        receipt: &PoseReceipt,
        tolerance: u64,
        ctx: &VerifyContext,
    ) -> Result<(), PoseError> {
        let claimed = receipt
            .response_body
            .get("blockNumber")
            .and_then(Value::as_u64)
            .ok_or_else(|| PoseError::Malformed("missing blockNumber".into()))?;
        if claimed.abs_diff(ctx.expected_height) > tolerance {
            return Err(PoseError::Proof(format!(
                "claimed height {claimed}, expected about {}",
                ctx.expected_height
            )));
        }
        Ok(())
    }

    fn check_storage(
        &self,
        receipt: &PoseReceipt,
        root: &Hash32,
        chunk_index: u64,
        tree_size: u64,
    ) -> Result<(), PoseError> {
        let body = &receipt.response_body;
        let claimed_index = body
            .get("index")
            .and_then(Value::as_u64)
            .ok_or_else(|| PoseError::Malformed("missing index".into()))?;
        if claimed_index != chunk_index {
            return Err(PoseError::Proof("wrong chunk index".into()));
        }
        if claimed_index >= tree_size {
            return Err(PoseError::Proof("chunk index out of range".into()));
        }
        let chunk_hex = body
            .get("chunk")
            .and_then(Value::as_str)
            .ok_or_else(|| PoseError::Malformed("missing chunk".into()))?;
        let chunk = hex::decode(chunk_hex.strip_prefix("0x").unwrap_or(chunk_hex))
            .map_err(|e| PoseError::Malformed(format!("chunk hex: {e}")))?;
        let path: Vec<Hash32> = body
            .get("proof")
            .and_then(Value::as_array)
            .ok_or_else(|| PoseError::Malformed("missing proof".into()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .and_then(|s| Hash32::from_hex(s).ok())
                    .ok_or_else(|| PoseError::Malformed("bad proof node".into()))
            })
            .collect::<Result<_, _>>()?;

        // The root is pinned in the challenge; the path must rebuild it.
        let leaf = keccak256(&chunk);
        if !verify_merkle_path(leaf, chunk_index, &path, root) {
            return Err(PoseError::Proof("merkle path does not reach root".into()));
        }
        Ok(())
    }

    fn check_relay(
        &self,
        challenge: &Challenge,
        receipt: &PoseReceipt,
        route_tag: &str,
    ) -> Result<(), PoseError> {
        let witness = receipt
            .response_body
            .get("witness")
            .ok_or_else(|| PoseError::Malformed("missing witness".into()))?;
        let witness_route = witness.get("routeTag").and_then(Value::as_str);
        if witness_route != Some(route_tag) {
            return Err(PoseError::Proof("route tag mismatch".into()));
        }
        let witness_challenge = witness.get("challengeId").and_then(Value::as_str);
        if witness_challenge != Some(challenge.challenge_id.as_str()) {
            return Err(PoseError::Proof("witness for another challenge".into()));
        }
        let relayer = witness
            .get("relayer")
            .and_then(Value::as_str)
            .ok_or_else(|| PoseError::Malformed("missing relayer".into()))?;
        let relayer_addr = Address::from_hex(relayer)
            .map_err(|e| PoseError::Malformed(format!("relayer: {e}")))?;
        let witness_at = witness
            .get("responseAtMs")
            .and_then(Value::as_u64)
            .ok_or_else(|| PoseError::Malformed("missing witness responseAtMs".into()))?;
        if witness_at != receipt.response_at_ms {
            return Err(PoseError::Proof("witness timestamp disagrees with receipt".into()));
        }
        if witness_at.saturating_sub(challenge.issued_at_ms) > MAX_RELAY_LATENCY_MS {
            return Err(PoseError::Proof("relay latency over bound".into()));
        }
        let signature = witness
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| PoseError::Malformed("missing witness signature".into()))?;
        let message = relay_witness_message(&challenge.challenge_id, route_tag, witness_at);
        let recovered = recover_address(&message, signature)
            .map_err(|e| PoseError::Signature(format!("witness: {e}")))?;
        if recovered != relayer_addr {
            return Err(PoseError::Signature("witness signer mismatch".into()));
        }
        Ok(())
    }
}

/// Canonical relay witness message.
pub fn relay_witness_message(challenge_id: &str, route_tag: &str, response_at_ms: u64) -> String {
    format!("pose:relay:{challenge_id}:{route_tag}:{response_at_ms}")
}
