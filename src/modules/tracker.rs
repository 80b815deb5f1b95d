//! Whale Tracker - owns the background refresh loops and derived aggregates
//!
//! Ledger, distribution metrics, and enriched-whale refreshes run as
//! independent interval tasks; a slow or failing cycle logs and skips,
//! never starving the other loops. Derived state lives in the shared TTL
//! cache under the `holders:*` namespace, and metric updates are pushed to
//! subscribers.

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info, warn};

use super::analytics::{bucketize, concentration, window_metrics, BucketBoundaries, DistributionBuckets, WindowMetrics};
use super::enrichment::{EnrichedHolder, EnrichmentPipeline};
use super::ingestion::EventIngestor;
use super::ledger::{build_ledger, whale_addresses, Holder};
use crate::config::Config;
use crate::utils::{CacheStore, MetricsService};

const KEY_LEDGER: &str = "holders:ledger";
const KEY_WHALES: &str = "holders:whales";
const KEY_STATS: &str = "holders:stats";
const KEY_ENRICHED: &str = "holders:enriched";

const LEDGER_TTL: Duration = Duration::from_secs(600);
const STATS_TTL: Duration = Duration::from_secs(300);
const ENRICHED_TTL: Duration = Duration::from_secs(900);

/// Snapshot pushed to metrics subscribers after each refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsUpdate {
    pub holders: usize,
    pub whales: usize,
    pub buckets: DistributionBuckets,
    pub top10_concentration: f64,
    pub window_24h: WindowMetrics,
    pub timestamp: i64,
}

/// Downstream delivery callback; errors are caught and logged
pub type MetricsCallback = Box<dyn Fn(&MetricsUpdate) -> anyhow::Result<()> + Send + Sync>;

/// Whale Tracker module
pub struct WhaleTracker {
    ingestor: Arc<EventIngestor>,
    enrichment: Arc<EnrichmentPipeline>,
    cache: Arc<CacheStore>,
    metrics: Arc<MetricsService>,
    whales: Arc<RwLock<HashSet<String>>>,

    whale_threshold: usize,
    bucket_bounds: BucketBoundaries,
    ledger_refresh_secs: u64,
    metrics_refresh_secs: u64,
    whale_refresh_secs: u64,
    enrich_batch_size: usize,
    enrich_delay_ms: u64,

    is_running: Arc<AtomicBool>,
    update_sender: broadcast::Sender<MetricsUpdate>,
    callbacks: Arc<RwLock<Vec<MetricsCallback>>>,
}

impl WhaleTracker {
    pub fn new(
        config: &Config,
        ingestor: Arc<EventIngestor>,
        enrichment: Arc<EnrichmentPipeline>,
        cache: Arc<CacheStore>,
        metrics: Arc<MetricsService>,
        whales: Arc<RwLock<HashSet<String>>>,
    ) -> Self {
        let (update_sender, _) = broadcast::channel(100);
        Self {
            ingestor,
            enrichment,
            cache,
            metrics,
            whales,
            whale_threshold: config.whale_threshold,
            bucket_bounds: BucketBoundaries::default(),
            ledger_refresh_secs: config.ledger_refresh_secs,
            metrics_refresh_secs: config.metrics_refresh_secs,
            whale_refresh_secs: config.whale_refresh_secs,
            enrich_batch_size: config.enrich_batch_size,
            enrich_delay_ms: config.enrich_delay_ms,
            is_running: Arc::new(AtomicBool::new(false)),
            update_sender,
            callbacks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe to metric updates
    pub fn subscribe_metrics(&self) -> broadcast::Receiver<MetricsUpdate> {
        self.update_sender.subscribe()
    }

    /// Register a metrics delivery callback. Errors are logged and never
    /// block the remaining callbacks.
    pub fn on_metrics_update(&self, callback: MetricsCallback) {
        self.callbacks.write().push(callback);
    }

    /// Rebuild the holder ledger from the full event window and refresh
    /// the shared whale set.
    pub async fn refresh_ledger(&self) -> Result<()> {
        // Stale events beat a skipped cycle here
        let events = self.ingestor.get_events_or_stale().await?;
        let ledger = build_ledger(&events);
        let whale_set = whale_addresses(&ledger, self.whale_threshold);

        self.metrics
            .record_ledger(events.len(), ledger.len(), whale_set.len());

        info!(
            target: "TRACKER",
            "Ledger rebuilt: {} events, {} holders, {} whales",
            events.len(),
            ledger.len(),
            whale_set.len()
        );

        self.cache.set_as(KEY_LEDGER, &ledger, LEDGER_TTL);
        self.cache.set_as(
            KEY_WHALES,
            &whale_set.iter().cloned().collect::<Vec<String>>(),
            LEDGER_TTL,
        );
        *self.whales.write() = whale_set;
        Ok(())
    }

    /// Recompute distribution and trading metrics and push the snapshot to
    /// subscribers.
    pub async fn refresh_metrics(&self) -> Result<()> {
        let events = self.ingestor.get_events_or_stale().await?;
        let ledger: Vec<Holder> = match self.cache.get_as(KEY_LEDGER) {
            Some(ledger) => ledger,
            None => build_ledger(&events),
        };

        let update = MetricsUpdate {
            holders: ledger.len(),
            whales: ledger
                .iter()
                .filter(|h| h.count >= self.whale_threshold)
                .count(),
            buckets: bucketize(&ledger, &self.bucket_bounds),
            top10_concentration: concentration(&ledger, 10),
            window_24h: window_metrics(&events, 24),
            timestamp: Utc::now().timestamp(),
        };

        self.cache.set_as(KEY_STATS, &update, STATS_TTL);
        let _ = self.update_sender.send(update.clone());

        for callback in self.callbacks.read().iter() {
            if let Err(e) = callback(&update) {
                error!(target: "TRACKER", "Metrics callback failed: {}", e);
            }
        }
        Ok(())
    }

    /// Re-enrich every whale-sized holder in paced batches.
    pub async fn refresh_whales(&self) -> Result<()> {
        if self.cache.get_as::<Vec<Holder>>(KEY_LEDGER).is_none() {
            self.refresh_ledger().await?;
        }
        let ledger: Vec<Holder> = self.cache.get_as(KEY_LEDGER).unwrap_or_default();

        let whales: Vec<Holder> = ledger
            .into_iter()
            .filter(|h| h.count >= self.whale_threshold)
            .collect();
        if whales.is_empty() {
            return Ok(());
        }

        let enriched = self
            .enrichment
            .enrich_batch(&whales, self.enrich_batch_size, self.enrich_delay_ms)
            .await;

        for holder in &enriched {
            self.metrics.record_enrichment(match holder.status {
                super::enrichment::EnrichmentStatus::Complete => "complete",
                super::enrichment::EnrichmentStatus::Partial => "partial",
                super::enrichment::EnrichmentStatus::Failed => "failed",
            });
        }

        self.cache.set_as(KEY_ENRICHED, &enriched, ENRICHED_TTL);
        Ok(())
    }

    /// Current ledger, ranked
    pub fn ledger(&self) -> Vec<Holder> {
        self.cache.get_as(KEY_LEDGER).unwrap_or_default()
    }

    /// Latest enriched whale records
    pub fn enriched_whales(&self) -> Vec<EnrichedHolder> {
        self.cache.get_as(KEY_ENRICHED).unwrap_or_default()
    }

    /// Latest metrics snapshot
    pub fn stats(&self) -> Option<MetricsUpdate> {
        self.cache.get_as(KEY_STATS)
    }

    /// Start the background refresh loops
    pub fn start(&self) {
        if self.is_running.load(Ordering::SeqCst) {
            warn!(target: "TRACKER", "Already running");
            return;
        }
        self.is_running.store(true, Ordering::SeqCst);

        let tracker = self.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(tracker.ledger_refresh_secs));
            while tracker.is_running.load(Ordering::SeqCst) {
                interval.tick().await;
                let started = Instant::now();
                let result = tracker.refresh_ledger().await;
                tracker.metrics.record_refresh(
                    "ledger",
                    result.is_ok(),
                    started.elapsed().as_secs_f64(),
                );
                if let Err(e) = result {
                    error!(target: "TRACKER", "Ledger refresh failed, skipping cycle: {}", e);
                }
                tracker.cache.sweep();
            }
        });

        let tracker = self.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(tracker.metrics_refresh_secs));
            while tracker.is_running.load(Ordering::SeqCst) {
                interval.tick().await;
                let started = Instant::now();
                let result = tracker.refresh_metrics().await;
                tracker.metrics.record_refresh(
                    "metrics",
                    result.is_ok(),
                    started.elapsed().as_secs_f64(),
                );
                if let Err(e) = result {
                    error!(target: "TRACKER", "Metrics refresh failed, skipping cycle: {}", e);
                }
            }
        });

        let tracker = self.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(tracker.whale_refresh_secs));
            while tracker.is_running.load(Ordering::SeqCst) {
                interval.tick().await;
                let started = Instant::now();
                let result = tracker.refresh_whales().await;
                tracker.metrics.record_refresh(
                    "whales",
                    result.is_ok(),
                    started.elapsed().as_secs_f64(),
                );
                if let Err(e) = result {
                    error!(target: "TRACKER", "Whale refresh failed, skipping cycle: {}", e);
                }
            }
        });

        info!(target: "TRACKER", "Whale Tracker active");
    }

    /// Stop the background refresh loops
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        info!(target: "TRACKER", "Whale Tracker stopping...");
    }

    /// Check if running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

impl Clone for WhaleTracker {
    fn clone(&self) -> Self {
        Self {
            ingestor: Arc::clone(&self.ingestor),
            enrichment: Arc::clone(&self.enrichment),
            cache: Arc::clone(&self.cache),
            metrics: Arc::clone(&self.metrics),
            whales: Arc::clone(&self.whales),
            whale_threshold: self.whale_threshold,
            bucket_bounds: self.bucket_bounds.clone(),
            ledger_refresh_secs: self.ledger_refresh_secs,
            metrics_refresh_secs: self.metrics_refresh_secs,
            whale_refresh_secs: self.whale_refresh_secs,
            enrich_batch_size: self.enrich_batch_size,
            enrich_delay_ms: self.enrich_delay_ms,
            is_running: Arc::clone(&self.is_running),
            update_sender: self.update_sender.clone(),
            callbacks: Arc::clone(&self.callbacks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChainLogProvider, IdentityProvider, PortfolioProvider, RawLog, OwnedAsset, TRANSFER_TOPIC};
    use std::collections::HashMap;

    struct StaticChain {
        logs: Vec<RawLog>,
        head: u64,
    }

    #[async_trait::async_trait]
    impl ChainLogProvider for StaticChain {
        async fn get_logs(
            &self,
            _contract: &str,
            _from: u64,
            _to: u64,
            _topic0: &str,
        ) -> Result<Vec<RawLog>> {
            Ok(self.logs.clone())
        }

        async fn get_block_number(&self) -> Result<u64> {
            Ok(self.head)
        }

        async fn batch_get_transactions(&self, _hashes: &[String]) -> Result<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
    }

    struct NullIdentity;

    #[async_trait::async_trait]
    impl IdentityProvider for NullIdentity {
        async fn lookup(&self, _address: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    struct NullPortfolio;

    #[async_trait::async_trait]
    impl PortfolioProvider for NullPortfolio {
        async fn get_assets_owned_by(&self, _address: &str) -> Result<Vec<OwnedAsset>> {
            Ok(Vec::new())
        }

        async fn get_native_balance(&self, _address: &str) -> Result<String> {
            Ok("1.0".to_string())
        }

        async fn get_floor_price(&self, _contract: &str) -> Result<Option<f64>> {
            Ok(None)
        }
    }

    fn topic_addr(addr: &str) -> String {
        let trimmed = addr.strip_prefix("0x").unwrap_or(addr);
        format!("0x{:0>64}", trimmed)
    }

    fn mint_log(to: &str, token_id: u64, block: u64) -> RawLog {
        RawLog {
            address: "0xc0ffee".to_string(),
            topics: vec![
                TRANSFER_TOPIC.to_string(),
                topic_addr("0x0"),
                topic_addr(to),
                format!("0x{:064x}", token_id),
            ],
            data: "0x".to_string(),
            block_number: format!("0x{:x}", block),
            transaction_hash: format!("0xmint{}", token_id),
        }
    }

    fn config() -> Config {
        Config {
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: "0xc0ffee".to_string(),
            collection_slug: "test-collection".to_string(),
            marketplace_api_url: String::new(),
            marketplace_api_key: None,
            identity_api_url: String::new(),
            portfolio_api_url: String::new(),
            identity_timeout_secs: 1,
            whale_threshold: 2,
            large_sale_threshold: 5.0,
            floor_change_percent: 10.0,
            pump_threshold_percent: 20.0,
            dump_threshold_percent: -20.0,
            pump_window_minutes: 15,
            min_sales_for_pattern: 5,
            alert_interval_secs: 30,
            ledger_refresh_secs: 300,
            metrics_refresh_secs: 120,
            whale_refresh_secs: 600,
            enrich_batch_size: 10,
            enrich_delay_ms: 0,
        }
    }

    fn tracker(logs: Vec<RawLog>) -> (WhaleTracker, Arc<CacheStore>) {
        let cache = Arc::new(CacheStore::new());
        let chain = Arc::new(StaticChain { logs, head: 100 });
        let ingestor = Arc::new(EventIngestor::new(
            chain as Arc<dyn ChainLogProvider>,
            Arc::clone(&cache),
            "0xc0ffee".to_string(),
        ));
        let enrichment = Arc::new(EnrichmentPipeline::new(
            Arc::new(NullIdentity),
            Arc::new(NullPortfolio),
            Arc::clone(&cache),
            Duration::from_secs(1),
        ));
        let tracker = WhaleTracker::new(
            &config(),
            ingestor,
            enrichment,
            Arc::clone(&cache),
            Arc::new(MetricsService::new()),
            Arc::new(RwLock::new(HashSet::new())),
        );
        (tracker, cache)
    }

    fn whale_logs() -> Vec<RawLog> {
        vec![
            mint_log("0xaaa", 1, 90),
            mint_log("0xaaa", 2, 91),
            mint_log("0xbbb", 3, 92),
        ]
    }

    #[tokio::test]
    async fn ledger_refresh_populates_cache_and_whale_set() {
        let (tracker, cache) = tracker(whale_logs());

        tracker.refresh_ledger().await.unwrap();

        let ledger = tracker.ledger();
        assert_eq!(ledger.len(), 2);
        assert!(cache.get(KEY_WHALES).is_some());

        let whales = tracker.whales.read();
        assert_eq!(whales.len(), 1);
        assert!(whales.iter().next().unwrap().ends_with("aaa"));
    }

    #[tokio::test]
    async fn metrics_refresh_pushes_snapshot_to_subscribers() {
        let (tracker, _) = tracker(whale_logs());
        let mut rx = tracker.subscribe_metrics();

        let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        tracker.on_metrics_update(Box::new(move |update| {
            assert_eq!(update.holders, 2);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        tracker.refresh_ledger().await.unwrap();
        tracker.refresh_metrics().await.unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.holders, 2);
        assert_eq!(update.whales, 1);
        assert_eq!(update.buckets.single, 1);
        assert_eq!(update.buckets.small, 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert!(tracker.stats().is_some());
    }

    #[tokio::test]
    async fn failing_metrics_callback_is_isolated() {
        let (tracker, _) = tracker(whale_logs());
        let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        tracker.on_metrics_update(Box::new(|_| anyhow::bail!("downstream broken")));
        let counter = Arc::clone(&delivered);
        tracker.on_metrics_update(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        tracker.refresh_metrics().await.unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn whale_refresh_enriches_only_whales() {
        let (tracker, _) = tracker(whale_logs());

        tracker.refresh_whales().await.unwrap();

        let enriched = tracker.enriched_whales();
        assert_eq!(enriched.len(), 1);
        assert!(enriched[0].holder.address.ends_with("aaa"));
        assert_eq!(enriched[0].native_balance, "1.0");
    }
}
