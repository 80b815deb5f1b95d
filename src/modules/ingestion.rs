//! Event Ingestion - fetches and parses transfer history for the tracked contract
//!
//! Concurrent callers of the default full-history query are coalesced onto
//! a single upstream fetch, and successful results are cached for a short
//! freshness window so bursts of callers never hammer the provider.

use anyhow::Result;
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::WatchError;
use crate::providers::chain::{parse_hex_u64, topic_to_address};
use crate::providers::{ChainLogProvider, RawLog, TRANSFER_TOPIC};
use crate::utils::CacheStore;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Providers reject ranges much older than this, so the default query is
/// clamped to the most recent window.
pub const BLOCK_WINDOW: u64 = 200_000;

const SECONDS_PER_BLOCK: i64 = 12;
const FRESH_TTL: Duration = Duration::from_secs(120);
const STALE_TTL: Duration = Duration::from_secs(1800);
const TX_BATCH_SIZE: usize = 100;
const BATCH_PACING_MS: u64 = 250;

const KEY_RECENT: &str = "events:recent";
const KEY_STALE: &str = "events:stale";

/// Transfer classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Mint,
    Transfer,
    Sale,
}

/// A parsed transfer event, immutable once constructed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_hash: String,
    pub block_number: u64,
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub token_id: u64,
    pub tx_type: TxType,
    pub price_native: Option<f64>,
}

type FetchResult = Result<Arc<Vec<Transaction>>, Arc<anyhow::Error>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Event ingestion service with request coalescing and a freshness cache
pub struct EventIngestor {
    chain: Arc<dyn ChainLogProvider>,
    cache: Arc<CacheStore>,
    contract: String,
    inflight: Mutex<Option<SharedFetch>>,
}

impl EventIngestor {
    pub fn new(chain: Arc<dyn ChainLogProvider>, cache: Arc<CacheStore>, contract: String) -> Self {
        Self {
            chain,
            cache,
            contract,
            inflight: Mutex::new(None),
        }
    }

    /// Fetch the transaction history for the tracked contract.
    ///
    /// `from_block == 0` with no `to_block` is the default full-history
    /// query: it resolves to the most recent [`BLOCK_WINDOW`] blocks, is
    /// served from the freshness cache when possible, and coalesces
    /// concurrent callers onto one upstream fetch. Upstream errors
    /// propagate; callers wanting stale fallback use
    /// [`Self::get_events_or_stale`].
    pub async fn get_events(
        &self,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<Transaction>> {
        if from_block == 0 && to_block.is_none() {
            return self.default_query().await;
        }

        let head = self.chain.get_block_number().await?;
        let head_ts = Utc::now().timestamp();
        let to = to_block.unwrap_or(head).min(head);
        let from = from_block.max(head.saturating_sub(BLOCK_WINDOW));
        Self::fetch_range(&self.chain, &self.contract, from, to, head, head_ts).await
    }

    /// Default query with stale-cache fallback on upstream failure.
    ///
    /// Used by the background ledger refresher, where a stale-but-usable
    /// ledger beats a skipped cycle.
    pub async fn get_events_or_stale(&self) -> Result<Vec<Transaction>> {
        match self.get_events(0, None).await {
            Ok(txs) => Ok(txs),
            Err(e) => match self.cache.get_as::<Vec<Transaction>>(KEY_STALE) {
                Some(stale) => {
                    warn!(
                        target: "INGEST",
                        "Upstream fetch failed ({}), serving {} stale events",
                        e,
                        stale.len()
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    async fn default_query(&self) -> Result<Vec<Transaction>> {
        if let Some(cached) = self.cache.get_as::<Vec<Transaction>>(KEY_RECENT) {
            debug!(target: "INGEST", "Serving {} events from freshness cache", cached.len());
            return Ok(cached);
        }

        // At most one default fetch may be outstanding; late callers join
        // the shared future instead of issuing a second upstream call.
        let (fetch, created) = {
            let mut guard = self.inflight.lock();
            match guard.as_ref() {
                Some(existing) => (existing.clone(), false),
                None => {
                    let chain = Arc::clone(&self.chain);
                    let cache = Arc::clone(&self.cache);
                    let contract = self.contract.clone();
                    let fetch: SharedFetch = async move {
                        Self::fetch_default(chain, cache, contract)
                            .await
                            .map(Arc::new)
                            .map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    *guard = Some(fetch.clone());
                    (fetch, true)
                }
            }
        };

        let result = fetch.await;
        if created {
            *self.inflight.lock() = None;
        }

        match result {
            Ok(txs) => Ok(txs.as_ref().clone()),
            Err(e) => Err(WatchError::Upstream(format!("event fetch failed: {}", e)).into()),
        }
    }

    async fn fetch_default(
        chain: Arc<dyn ChainLogProvider>,
        cache: Arc<CacheStore>,
        contract: String,
    ) -> Result<Vec<Transaction>> {
        let head = chain.get_block_number().await?;
        let head_ts = Utc::now().timestamp();
        let from = head.saturating_sub(BLOCK_WINDOW);

        let txs = Self::fetch_range(&chain, &contract, from, head, head, head_ts).await?;

        cache.set_as(KEY_RECENT, &txs, FRESH_TTL);
        cache.set_as(KEY_STALE, &txs, STALE_TTL);

        info!(
            target: "INGEST",
            "Ingested {} transfers for blocks {}..{}",
            txs.len(), from, head
        );
        Ok(txs)
    }

    async fn fetch_range(
        chain: &Arc<dyn ChainLogProvider>,
        contract: &str,
        from: u64,
        to: u64,
        head: u64,
        head_ts: i64,
    ) -> Result<Vec<Transaction>> {
        let logs = chain.get_logs(contract, from, to, TRANSFER_TOPIC).await?;
        let mut txs = Self::parse_logs(&logs, head, head_ts);
        Self::attribute_prices(chain, &mut txs).await;
        txs.sort_by_key(|t| t.block_number);
        Ok(txs)
    }

    /// Decode raw logs into transactions. A log with fewer than the
    /// expected indexed topics is a per-log parse failure: skipped and
    /// logged, never fatal to the batch.
    fn parse_logs(logs: &[RawLog], head: u64, head_ts: i64) -> Vec<Transaction> {
        let mut txs = Vec::with_capacity(logs.len());

        for log in logs {
            if log.topics.len() < 4 {
                warn!(
                    target: "INGEST",
                    "Skipping log in tx {} with {} topics",
                    log.transaction_hash,
                    log.topics.len()
                );
                continue;
            }

            let parsed = (|| -> Result<Transaction> {
                let from = topic_to_address(&log.topics[1])?;
                let to = topic_to_address(&log.topics[2])?;
                let token_id = parse_hex_u64(&log.topics[3])?;
                let block_number = parse_hex_u64(&log.block_number)?;

                let tx_type = if from == ZERO_ADDRESS {
                    TxType::Mint
                } else {
                    TxType::Transfer
                };

                // Logs carry no timestamp; estimate from block distance
                let timestamp =
                    head_ts - head.saturating_sub(block_number) as i64 * SECONDS_PER_BLOCK;

                Ok(Transaction {
                    tx_hash: log.transaction_hash.to_lowercase(),
                    block_number,
                    timestamp,
                    from,
                    to,
                    token_id,
                    tx_type,
                    price_native: None,
                })
            })();

            match parsed {
                Ok(tx) => txs.push(tx),
                Err(e) => warn!(
                    target: "INGEST",
                    "Skipping malformed log in tx {}: {}",
                    log.transaction_hash, e
                ),
            }
        }

        txs
    }

    /// Resolve native tx values in bounded, paced batches and promote
    /// value-carrying transfers to sales. Failures here are non-fatal: the
    /// affected transactions simply keep `price_native` absent.
    async fn attribute_prices(chain: &Arc<dyn ChainLogProvider>, txs: &mut [Transaction]) {
        let unique: Vec<String> = txs
            .iter()
            .map(|t| t.tx_hash.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return;
        }

        let mut values = std::collections::HashMap::new();
        let chunks: Vec<&[String]> = unique.chunks(TX_BATCH_SIZE).collect();
        let total_chunks = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            match chain.batch_get_transactions(chunk).await {
                Ok(resolved) => values.extend(resolved),
                Err(e) => warn!(
                    target: "INGEST",
                    "Price batch {}/{} failed, leaving prices unset: {}",
                    i + 1, total_chunks, e
                ),
            }
            if i + 1 < total_chunks {
                tokio::time::sleep(Duration::from_millis(BATCH_PACING_MS)).await;
            }
        }

        for tx in txs.iter_mut() {
            if let Some(&value) = values.get(&tx.tx_hash) {
                if value > 0.0 {
                    tx.tx_type = TxType::Sale;
                    tx.price_native = Some(value);
                }
            }
        }
    }
}
