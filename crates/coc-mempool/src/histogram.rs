//! # Gas Price Histogram
//!
//! Buckets the queued transactions by gwei in a single pass and derives
//! percentile summaries from the cumulative counts. Used by fee-estimation
//! callers; nothing here feeds consensus, so the percentage labels may be
//! floats.

use primitive_types::U256;

use shared_types::MempoolTx;

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Upper bounds (gwei, inclusive) of the fixed buckets; the last bucket is
/// unbounded.
const BUCKET_BOUNDS_GWEI: [u64; 10] = [1, 2, 5, 10, 20, 50, 100, 200, 500, 1000];

/// One histogram bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBucket {
    /// Inclusive upper bound in gwei; `None` for the overflow bucket.
    pub upper_gwei: Option<u64>,
    pub count: usize,
    /// Cumulative share of transactions at or below this bucket, percent.
    pub cumulative_percent: f64,
}

/// Percentile summary over queued gas prices.
#[derive(Debug, Clone)]
pub struct GasPriceHistogram {
    pub total: usize,
    pub buckets: Vec<HistogramBucket>,
    /// Approximate percentiles in gwei (bucket upper bounds).
    pub p50_gwei: Option<u64>,
    pub p90_gwei: Option<u64>,
    pub p99_gwei: Option<u64>,
}

impl GasPriceHistogram {
    /// Build from the pool's queued transactions. Single pass over `txs`.
    pub fn compute<'a>(txs: impl Iterator<Item = &'a MempoolTx>) -> Self {
        let mut counts = [0usize; BUCKET_BOUNDS_GWEI.len() + 1];
        let mut total = 0usize;

        for tx in txs {
            total += 1;
            let gwei = to_gwei(tx.bid_price());
            let idx = BUCKET_BOUNDS_GWEI
                .iter()
                .position(|&bound| gwei <= bound)
                .unwrap_or(BUCKET_BOUNDS_GWEI.len());
            counts[idx] += 1;
        }

        let mut buckets = Vec::with_capacity(counts.len());
        let mut cumulative = 0usize;
        for (i, &count) in counts.iter().enumerate() {
            cumulative += count;
            let cumulative_percent = if total == 0 {
                100.0
            } else {
                cumulative as f64 * 100.0 / total as f64
            };
            buckets.push(HistogramBucket {
                upper_gwei: BUCKET_BOUNDS_GWEI.get(i).copied(),
                count,
                cumulative_percent,
            });
        }

        let percentile = |p: f64| -> Option<u64> {
            if total == 0 {
                return None;
            }
            buckets
                .iter()
                .find(|b| b.cumulative_percent >= p)
                .and_then(|b| b.upper_gwei.or(Some(BUCKET_BOUNDS_GWEI[BUCKET_BOUNDS_GWEI.len() - 1])))
        };

        Self {
            total,
            p50_gwei: percentile(50.0),
            p90_gwei: percentile(90.0),
            p99_gwei: percentile(99.0),
            buckets,
        }
    }
}

fn to_gwei(wei: U256) -> u64 {
    let gwei = wei / U256::from(WEI_PER_GWEI);
    if gwei > U256::from(u64::MAX) {
        u64::MAX
    } else {
        gwei.as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Address, Hash32};

    fn tx_at(gwei: u64, salt: u8) -> MempoolTx {
        MempoolTx {
            hash: Hash32([salt; 32]),
            raw: String::new(),
            sender: Address([salt; 20]),
            nonce: 0,
            gas_price: U256::from(gwei) * U256::from(WEI_PER_GWEI),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            gas_limit: 21_000,
            received_at_ms: 0,
        }
    }

    #[test]
    fn bucket_counts_sum_to_total() {
        let txs: Vec<MempoolTx> = [1u64, 1, 3, 9, 40, 99, 5000]
            .iter()
            .enumerate()
            .map(|(i, &g)| tx_at(g, i as u8))
            .collect();
        let histogram = GasPriceHistogram::compute(txs.iter());
        assert_eq!(histogram.total, 7);
        let sum: usize = histogram.buckets.iter().map(|b| b.count).sum();
        assert_eq!(sum, 7);
    }

    #[test]
    fn last_bucket_cumulative_is_100_percent() {
        let txs: Vec<MempoolTx> = (0..10).map(|i| tx_at(i as u64 * 7, i as u8)).collect();
        let histogram = GasPriceHistogram::compute(txs.iter());
        let last = histogram.buckets.last().unwrap();
        assert!((last.cumulative_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_pool_yields_empty_summary() {
        let histogram = GasPriceHistogram::compute(std::iter::empty());
        assert_eq!(histogram.total, 0);
        assert_eq!(histogram.p50_gwei, None);
    }

    #[test]
    fn percentiles_track_the_distribution() {
        // 9 txs at 1 gwei, 1 tx at 500 gwei.
        let mut txs: Vec<MempoolTx> = (0..9).map(|i| tx_at(1, i)).collect();
        txs.push(tx_at(400, 9));
        let histogram = GasPriceHistogram::compute(txs.iter());
        assert_eq!(histogram.p50_gwei, Some(1));
        assert_eq!(histogram.p99_gwei, Some(500));
    }

    #[test]
    fn overflow_bucket_catches_extreme_prices() {
        let txs = vec![tx_at(1_000_000, 0)];
        let histogram = GasPriceHistogram::compute(txs.iter());
        assert_eq!(histogram.buckets.last().unwrap().count, 1);
        assert!(histogram.buckets.last().unwrap().upper_gwei.is_none());
    }
}
