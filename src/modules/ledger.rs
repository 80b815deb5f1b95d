//! Holder Ledger Builder - replays ordered transfers into a balance ledger

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use super::ingestion::{Transaction, ZERO_ADDRESS};

/// A current holder of the tracked collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holder {
    pub address: String,
    pub token_ids: BTreeSet<u64>,
    pub count: usize,
    pub first_seen: i64,
    pub last_activity: i64,
    pub percentage_of_supply: Option<f64>,
}

/// Replay a chronologically ordered transaction list into the holder ledger.
///
/// Deterministic and idempotent: the same ordered input always reproduces
/// the same ledger, with no reliance on prior state. Transfers to the zero
/// address are burns; zero-count holders never appear in the result. The
/// output is ranked by count descending, ties broken by first-seen
/// ascending.
pub fn build_ledger(transactions: &[Transaction]) -> Vec<Holder> {
    let mut holders: HashMap<String, Holder> = HashMap::new();

    for tx in transactions {
        if tx.from != ZERO_ADDRESS {
            if let Some(sender) = holders.get_mut(&tx.from) {
                sender.token_ids.remove(&tx.token_id);
                sender.count = sender.token_ids.len();
                sender.last_activity = tx.timestamp;
                if sender.count == 0 {
                    holders.remove(&tx.from);
                }
            }
        }

        if tx.to != ZERO_ADDRESS {
            let receiver = holders.entry(tx.to.clone()).or_insert_with(|| Holder {
                address: tx.to.clone(),
                token_ids: BTreeSet::new(),
                count: 0,
                first_seen: tx.timestamp,
                last_activity: tx.timestamp,
                percentage_of_supply: None,
            });
            // Idempotent insert: a token already owned is not double-counted
            receiver.token_ids.insert(tx.token_id);
            receiver.count = receiver.token_ids.len();
            receiver.last_activity = tx.timestamp;
        }
    }

    let total_active_supply: usize = holders.values().map(|h| h.count).sum();

    let mut ledger: Vec<Holder> = holders.into_values().collect();
    if total_active_supply > 0 {
        // Single batch pass, never incremental
        for holder in &mut ledger {
            holder.percentage_of_supply =
                Some(holder.count as f64 / total_active_supply as f64 * 100.0);
        }
    }

    ledger.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then(a.first_seen.cmp(&b.first_seen))
            .then(a.address.cmp(&b.address))
    });
    ledger
}

/// Addresses holding at least `threshold` tokens
pub fn whale_addresses(holders: &[Holder], threshold: usize) -> HashSet<String> {
    holders
        .iter()
        .filter(|h| h.count >= threshold)
        .map(|h| h.address.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ingestion::TxType;

    fn tx(from: &str, to: &str, token_id: u64, timestamp: i64) -> Transaction {
        Transaction {
            tx_hash: format!("0x{:x}", timestamp),
            block_number: timestamp as u64,
            timestamp,
            from: from.to_string(),
            to: to.to_string(),
            token_id,
            tx_type: if from == ZERO_ADDRESS {
                TxType::Mint
            } else {
                TxType::Transfer
            },
            price_native: None,
        }
    }

    #[test]
    fn mint_then_transfer_moves_the_token() {
        let events = vec![tx(ZERO_ADDRESS, "0xa", 1, 100), tx("0xa", "0xb", 1, 200)];
        let ledger = build_ledger(&events);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].address, "0xb");
        assert_eq!(ledger[0].count, 1);
        assert!(ledger[0].token_ids.contains(&1));
    }

    #[test]
    fn rebuild_is_idempotent() {
        let events = vec![
            tx(ZERO_ADDRESS, "0xa", 1, 100),
            tx(ZERO_ADDRESS, "0xa", 2, 110),
            tx(ZERO_ADDRESS, "0xb", 3, 120),
            tx("0xa", "0xb", 1, 200),
        ];
        let first = build_ledger(&events);
        let second = build_ledger(&events);

        assert_eq!(
            serde_json::to_value(&first).unwrap(),
            serde_json::to_value(&second).unwrap()
        );
    }

    #[test]
    fn supply_is_conserved_across_burns() {
        let events = vec![
            tx(ZERO_ADDRESS, "0xa", 1, 100),
            tx(ZERO_ADDRESS, "0xa", 2, 110),
            tx(ZERO_ADDRESS, "0xb", 3, 120),
            tx("0xa", ZERO_ADDRESS, 2, 200), // burn
        ];
        let ledger = build_ledger(&events);

        let total: usize = ledger.iter().map(|h| h.count).sum();
        assert_eq!(total, 2); // 3 mints - 1 burn
    }

    #[test]
    fn repeated_transfer_to_same_address_counts_once() {
        let events = vec![
            tx(ZERO_ADDRESS, "0xa", 1, 100),
            tx("0xa", "0xb", 1, 200),
            tx("0xb", "0xa", 1, 300),
            tx("0xa", "0xb", 1, 400),
        ];
        let ledger = build_ledger(&events);

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].address, "0xb");
        assert_eq!(ledger[0].count, 1);
    }

    #[test]
    fn zero_count_holders_are_excluded() {
        let events = vec![tx(ZERO_ADDRESS, "0xa", 1, 100), tx("0xa", "0xb", 1, 200)];
        let ledger = build_ledger(&events);
        assert!(ledger.iter().all(|h| h.address != "0xa"));
    }

    #[test]
    fn percentages_are_computed_in_one_batch_pass() {
        let events = vec![
            tx(ZERO_ADDRESS, "0xa", 1, 100),
            tx(ZERO_ADDRESS, "0xa", 2, 110),
            tx(ZERO_ADDRESS, "0xa", 3, 120),
            tx(ZERO_ADDRESS, "0xb", 4, 130),
        ];
        let ledger = build_ledger(&events);

        let a = ledger.iter().find(|h| h.address == "0xa").unwrap();
        let b = ledger.iter().find(|h| h.address == "0xb").unwrap();
        assert_eq!(a.percentage_of_supply, Some(75.0));
        assert_eq!(b.percentage_of_supply, Some(25.0));
    }

    #[test]
    fn ranking_breaks_ties_by_first_seen() {
        let events = vec![
            tx(ZERO_ADDRESS, "0xlate", 1, 500),
            tx(ZERO_ADDRESS, "0xearly", 2, 100),
        ];
        let ledger = build_ledger(&events);
        assert_eq!(ledger[0].address, "0xearly");
        assert_eq!(ledger[1].address, "0xlate");
    }

    #[test]
    fn whale_addresses_respects_threshold() {
        let events = vec![
            tx(ZERO_ADDRESS, "0xa", 1, 100),
            tx(ZERO_ADDRESS, "0xa", 2, 110),
            tx(ZERO_ADDRESS, "0xb", 3, 120),
        ];
        let ledger = build_ledger(&events);
        let whales = whale_addresses(&ledger, 2);
        assert!(whales.contains("0xa"));
        assert!(!whales.contains("0xb"));
    }
}
