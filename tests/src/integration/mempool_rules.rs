//! Fee-market rules with the literal fixture values: base-fee inclusion,
//! the replacement bump thresholds, slot uniqueness and the histogram law.

use primitive_types::U256;

use coc_mempool::{GasPriceHistogram, Mempool, MempoolConfig, MempoolError};
use shared_crypto::NodeSigner;
use shared_types::Address;

use crate::support::{signed_transfer, GWEI};

fn pool() -> Mempool {
    Mempool::new(MempoolConfig::default())
}

fn admit(pool: &mut Mempool, raw: &str, at: u64) -> Result<Address, MempoolError> {
    pool.admit(raw, at).map(|tx| tx.sender)
}

#[test]
fn base_fee_two_gwei_includes_only_the_three_gwei_bid() {
    let (a, b) = (NodeSigner::random(), NodeSigner::random());
    let mut pool = pool();
    admit(&mut pool, &signed_transfer(&a, 0, 1, GWEI), 0).unwrap();
    admit(&mut pool, &signed_transfer(&b, 0, 1, 3 * GWEI), 0).unwrap();

    let picked = pool.pick_for_block(
        10,
        U256::zero(),
        U256::from(2 * GWEI),
        30_000_000,
        1,
        |_| 0,
    );
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].sender, b.address());
}

#[test]
fn replacement_needs_the_full_bump() {
    let sender = NodeSigner::random();
    let mut pool = pool();
    admit(&mut pool, &signed_transfer(&sender, 0, 1, GWEI), 0).unwrap();

    // 1.05 gwei: under the 10% bump.
    let low = signed_transfer(&sender, 0, 1, GWEI + GWEI / 20);
    let err = admit(&mut pool, &low, 1).unwrap_err();
    assert_eq!(err.to_string(), "replacement gas price too low");

    // 1.2 gwei: replaces.
    let high = signed_transfer(&sender, 0, 1, GWEI + GWEI / 5);
    admit(&mut pool, &high, 2).unwrap();
    assert_eq!(pool.len(), 1);
}

#[test]
fn each_sender_nonce_slot_has_exactly_one_occupant() {
    let sender = NodeSigner::random();
    let mut pool = pool();
    admit(&mut pool, &signed_transfer(&sender, 0, 1, GWEI), 0).unwrap();
    admit(&mut pool, &signed_transfer(&sender, 1, 1, GWEI), 0).unwrap();
    // Replace nonce 0 with a richer bid.
    admit(&mut pool, &signed_transfer(&sender, 0, 2, 2 * GWEI), 1).unwrap();

    assert_eq!(pool.len(), 2);
    // Slot occupancy: every queued tx owns a distinct (sender, nonce).
    let mut slots: Vec<(Address, u64)> =
        pool.iter().map(|tx| (tx.sender, tx.nonce)).collect();
    slots.sort();
    slots.dedup();
    assert_eq!(slots.len(), 2);
    assert_eq!(pool.pending_nonce(&sender.address(), 0), 2);
}

#[test]
fn histogram_counts_sum_and_last_bucket_is_complete() {
    let mut pool = pool();
    let prices = [1u64, 1, 3, 7, 15, 80, 600, 2000];
    for (i, gwei) in prices.iter().enumerate() {
        let signer = NodeSigner::random();
        admit(&mut pool, &signed_transfer(&signer, 0, 1, gwei * GWEI), i as u64).unwrap();
    }

    let histogram = GasPriceHistogram::compute(pool.iter());
    assert_eq!(histogram.total, prices.len());
    let sum: usize = histogram.buckets.iter().map(|b| b.count).sum();
    assert_eq!(sum, prices.len());
    let last = histogram.buckets.last().unwrap();
    assert!((last.cumulative_percent - 100.0).abs() < 1e-9);
}
