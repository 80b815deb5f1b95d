//! Distribution & Metrics Calculator - derived statistics over the ledger

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::ingestion::Transaction;
use super::ledger::Holder;

/// Holder-size bucket boundaries. Configurable constants, applied
/// consistently across every call site.
#[derive(Debug, Clone)]
pub struct BucketBoundaries {
    pub small_max: usize,
    pub medium_max: usize,
    pub large_max: usize,
}

impl Default for BucketBoundaries {
    fn default() -> Self {
        Self {
            small_max: 5,
            medium_max: 10,
            large_max: 50,
        }
    }
}

/// Holder counts per size bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionBuckets {
    pub single: usize,
    pub small: usize,
    pub medium: usize,
    pub large: usize,
    pub whale: usize,
}

/// Trading metrics over a trailing time window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub count: usize,
    pub volume: f64,
    pub avg_price: Option<f64>,
    pub median_price: Option<f64>,
    pub unique_buyers: usize,
    pub unique_sellers: usize,
    pub top_transaction: Option<Transaction>,
}

/// Count holders per size bucket
pub fn bucketize(holders: &[Holder], bounds: &BucketBoundaries) -> DistributionBuckets {
    let mut buckets = DistributionBuckets::default();
    for holder in holders {
        match holder.count {
            0 => {}
            1 => buckets.single += 1,
            n if n <= bounds.small_max => buckets.small += 1,
            n if n <= bounds.medium_max => buckets.medium += 1,
            n if n <= bounds.large_max => buckets.large += 1,
            _ => buckets.whale += 1,
        }
    }
    buckets
}

/// Metrics over transactions whose timestamp falls within the trailing
/// `hours` window, evaluated now
pub fn window_metrics(transactions: &[Transaction], hours: i64) -> WindowMetrics {
    window_metrics_at(transactions, hours, Utc::now().timestamp())
}

/// Window metrics with an explicit evaluation time.
///
/// Price stats (`volume`, `avg_price`, `median_price`, `top_transaction`)
/// only consider transactions with a resolved price; buyer/seller counts
/// consider every transaction in the window.
pub fn window_metrics_at(transactions: &[Transaction], hours: i64, now: i64) -> WindowMetrics {
    let cutoff = now - hours * 3600;
    let in_window: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| t.timestamp >= cutoff && t.timestamp <= now)
        .collect();

    let mut prices: Vec<f64> = in_window.iter().filter_map(|t| t.price_native).collect();
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let volume: f64 = prices.iter().sum();
    let avg_price = if prices.is_empty() {
        None
    } else {
        Some(volume / prices.len() as f64)
    };
    let median_price = if prices.is_empty() {
        None
    } else if prices.len() % 2 == 1 {
        Some(prices[prices.len() / 2])
    } else {
        Some((prices[prices.len() / 2 - 1] + prices[prices.len() / 2]) / 2.0)
    };

    let unique_buyers = in_window
        .iter()
        .map(|t| t.to.as_str())
        .collect::<HashSet<_>>()
        .len();
    let unique_sellers = in_window
        .iter()
        .map(|t| t.from.as_str())
        .collect::<HashSet<_>>()
        .len();

    let top_transaction = in_window
        .iter()
        .filter(|t| t.price_native.is_some())
        .max_by(|a, b| {
            a.price_native
                .partial_cmp(&b.price_native)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|t| (*t).clone());

    WindowMetrics {
        count: in_window.len(),
        volume,
        avg_price,
        median_price,
        unique_buyers,
        unique_sellers,
        top_transaction,
    }
}

/// Share of total supply held by the top `top_n` holders.
///
/// Assumes the ledger ranking from `build_ledger` (count descending, ties
/// by first-seen ascending), which makes the result deterministic.
pub fn concentration(holders: &[Holder], top_n: usize) -> f64 {
    let total: usize = holders.iter().map(|h| h.count).sum();
    if total == 0 {
        return 0.0;
    }
    let top: usize = holders.iter().take(top_n).map(|h| h.count).sum();
    top as f64 / total as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ingestion::{TxType, ZERO_ADDRESS};
    use crate::modules::ledger::build_ledger;

    fn holder(address: &str, count: usize, first_seen: i64) -> Holder {
        Holder {
            address: address.to_string(),
            token_ids: (0..count as u64).collect(),
            count,
            first_seen,
            last_activity: first_seen,
            percentage_of_supply: None,
        }
    }

    fn sale(from: &str, to: &str, price: Option<f64>, timestamp: i64) -> Transaction {
        Transaction {
            tx_hash: format!("0x{:x}", timestamp),
            block_number: 1,
            timestamp,
            from: from.to_string(),
            to: to.to_string(),
            token_id: 1,
            tx_type: if price.is_some() {
                TxType::Sale
            } else {
                TxType::Transfer
            },
            price_native: price,
        }
    }

    #[test]
    fn bucket_boundaries_are_inclusive() {
        let holders = vec![
            holder("0xa", 1, 0),
            holder("0xb", 2, 0),
            holder("0xc", 5, 0),
            holder("0xd", 6, 0),
            holder("0xe", 10, 0),
            holder("0xf", 11, 0),
            holder("0xg", 50, 0),
            holder("0xh", 51, 0),
        ];
        let buckets = bucketize(&holders, &BucketBoundaries::default());
        assert_eq!(buckets.single, 1);
        assert_eq!(buckets.small, 2);
        assert_eq!(buckets.medium, 2);
        assert_eq!(buckets.large, 2);
        assert_eq!(buckets.whale, 1);
    }

    #[test]
    fn price_stats_only_consider_priced_transactions() {
        let now = 1_000_000;
        let txs = vec![
            sale("0xa", "0xb", Some(2.0), now - 100),
            sale("0xc", "0xd", Some(4.0), now - 200),
            sale("0xe", "0xf", None, now - 300),
        ];
        let m = window_metrics_at(&txs, 1, now);

        assert_eq!(m.count, 3);
        assert_eq!(m.volume, 6.0);
        assert_eq!(m.avg_price, Some(3.0));
        assert_eq!(m.median_price, Some(3.0));
        assert_eq!(m.unique_buyers, 3);
        assert_eq!(m.unique_sellers, 3);
        assert_eq!(
            m.top_transaction.as_ref().and_then(|t| t.price_native),
            Some(4.0)
        );
    }

    #[test]
    fn window_excludes_old_transactions() {
        let now = 1_000_000;
        let txs = vec![
            sale("0xa", "0xb", Some(2.0), now - 100),
            sale("0xc", "0xd", Some(9.0), now - 2 * 3600),
        ];
        let m = window_metrics_at(&txs, 1, now);
        assert_eq!(m.count, 1);
        assert_eq!(m.volume, 2.0);
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        let now = 1_000_000;
        let txs = vec![
            sale("0xa", "0xb", Some(1.0), now - 10),
            sale("0xc", "0xd", Some(2.0), now - 20),
            sale("0xe", "0xf", Some(10.0), now - 30),
            sale("0xg", "0xh", Some(20.0), now - 40),
        ];
        let m = window_metrics_at(&txs, 1, now);
        assert_eq!(m.median_price, Some(6.0));
    }

    #[test]
    fn concentration_of_top_holders() {
        // 0xa holds 6 of 10, 0xb holds 3, 0xc holds 1
        let mut events = Vec::new();
        for i in 0..6 {
            events.push(sale(ZERO_ADDRESS, "0xa", None, 100 + i));
        }
        for i in 0..3 {
            events.push(sale(ZERO_ADDRESS, "0xb", None, 200 + i));
        }
        events.push(sale(ZERO_ADDRESS, "0xc", None, 300));
        let mut token = 0u64;
        let events: Vec<Transaction> = events
            .into_iter()
            .map(|mut t| {
                token += 1;
                t.token_id = token;
                t
            })
            .collect();

        let ledger = build_ledger(&events);
        assert_eq!(concentration(&ledger, 1), 60.0);
        assert_eq!(concentration(&ledger, 2), 90.0);
        assert_eq!(concentration(&ledger, 10), 100.0);
    }

    #[test]
    fn concentration_of_empty_ledger_is_zero() {
        assert_eq!(concentration(&[], 10), 0.0);
    }
}
