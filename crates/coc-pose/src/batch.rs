//! # Batch Aggregation
//!
//! Verified receipts roll up into a merkle-rooted batch: the root covers
//! the stable-hashed receipts, the summary hash commits to (epoch, count,
//! root), and a sample of inclusion proofs rides along for spot checks.

use shared_types::{keccak256, stable_stringify, Hash32, PoseBatch, PoseReceipt, ReceiptProof};

use crate::errors::PoseError;
use crate::merkle::{merkle_proof, merkle_root};

/// Stable hash of one receipt (the batch leaf).
pub fn receipt_leaf(receipt: &PoseReceipt) -> Result<Hash32, PoseError> {
    let value = serde_json::to_value(receipt).map_err(|e| PoseError::Malformed(e.to_string()))?;
    Ok(keccak256(stable_stringify(&value).as_bytes()))
}

/// Build a batch over `receipts`, sampling `sample_size` proofs evenly.
pub fn build_batch(
    epoch_id: u64,
    receipts: &[PoseReceipt],
    sample_size: usize,
) -> Result<PoseBatch, PoseError> {
    let leaves: Vec<Hash32> = receipts
        .iter()
        .map(receipt_leaf)
        .collect::<Result<_, _>>()?;
    let root = merkle_root(&leaves);

    let summary = serde_json::json!({
        "epochId": epoch_id,
        "receiptCount": receipts.len(),
        "merkleRoot": root.to_hex(),
    });
    let summary_hash = keccak256(stable_stringify(&summary).as_bytes());

    // Spread the sampled indexes across the batch.
    let mut sample_proofs = Vec::new();
    if !leaves.is_empty() && sample_size > 0 {
        let take = sample_size.min(leaves.len());
        for i in 0..take {
            let index = i * leaves.len() / take;
            if let Some(path) = merkle_proof(&leaves, index) {
                sample_proofs.push(ReceiptProof {
                    leaf: leaves[index],
                    index: index as u64,
                    path,
                });
            }
        }
    }

    Ok(PoseBatch {
        epoch_id,
        merkle_root: root,
        summary_hash,
        sample_proofs,
        receipt_count: receipts.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::verify_merkle_path;
    use serde_json::json;

    fn receipts(n: usize) -> Vec<PoseReceipt> {
        (0..n)
            .map(|i| PoseReceipt {
                challenge_id: format!("c-{i}"),
                node_id: "0xaa".into(),
                response_at_ms: i as u64,
                response_body: json!({"blockNumber": i}),
                node_sig: "0x00".into(),
            })
            .collect()
    }

    #[test]
    fn sample_proofs_verify_against_the_batch_root() {
        let receipts = receipts(9);
        let batch = build_batch(2, &receipts, 3).unwrap();
        assert_eq!(batch.receipt_count, 9);
        assert_eq!(batch.sample_proofs.len(), 3);
        for proof in &batch.sample_proofs {
            assert!(verify_merkle_path(
                proof.leaf,
                proof.index,
                &proof.path,
                &batch.merkle_root
            ));
        }
    }

    #[test]
    fn summary_hash_commits_to_epoch_count_and_root() {
        let receipts = receipts(4);
        let batch_a = build_batch(1, &receipts, 1).unwrap();
        let batch_b = build_batch(2, &receipts, 1).unwrap();
        assert_eq!(batch_a.merkle_root, batch_b.merkle_root);
        assert_ne!(batch_a.summary_hash, batch_b.summary_hash);
    }

    #[test]
    fn any_receipt_change_moves_the_root() {
        let mut receipts = receipts(4);
        let before = build_batch(1, &receipts, 0).unwrap();
        receipts[2].response_at_ms += 1;
        let after = build_batch(1, &receipts, 0).unwrap();
        assert_ne!(before.merkle_root, after.merkle_root);
    }

    #[test]
    fn sample_larger_than_batch_is_clamped() {
        let receipts = receipts(2);
        let batch = build_batch(1, &receipts, 10).unwrap();
        assert_eq!(batch.sample_proofs.len(), 2);
    }

    #[test]
    fn empty_batch_has_zero_root_and_no_proofs() {
        let batch = build_batch(1, &[], 2).unwrap();
        assert!(batch.merkle_root.is_zero());
        assert!(batch.sample_proofs.is_empty());
        assert_eq!(batch.receipt_count, 0);
    }
}
