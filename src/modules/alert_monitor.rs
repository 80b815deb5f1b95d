//! Alert Monitor - periodic market-event detectors over the sales feed
//!
//! Each tick fetches one snapshot (recent sales + collection stats) and
//! runs every detector over it. Detectors deduplicate via per-detector
//! last-seen checkpoints and emit structured alerts through the alert
//! service. Without a marketplace credential the monitor no-ops cleanly.

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::providers::chain::shorten_address;
use crate::providers::{CollectionStats, MarketplaceProvider, MarketplaceSale};
use crate::utils::alerts::{AlertMetadata, AlertService, AlertType, Severity};
use crate::utils::CacheStore;

const SALES_WINDOW: usize = 50;
const FLOOR_LAST_TTL: Duration = Duration::from_secs(3600);
const KEY_FLOOR_LAST: &str = "floor:last";

/// Detection thresholds
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub large_sale: f64,
    pub floor_change_percent: f64,
    pub pump_percent: f64,
    pub dump_percent: f64,
    pub pump_window_minutes: i64,
    pub min_sales_for_pattern: usize,
}

impl AlertThresholds {
    pub fn from_config(config: &Config) -> Self {
        Self {
            large_sale: config.large_sale_threshold,
            floor_change_percent: config.floor_change_percent,
            pump_percent: config.pump_threshold_percent,
            dump_percent: config.dump_threshold_percent,
            pump_window_minutes: config.pump_window_minutes,
            min_sales_for_pattern: config.min_sales_for_pattern,
        }
    }
}

/// Per-detector last-seen timestamps
#[derive(Debug, Clone, Copy, Default)]
struct Checkpoints {
    large_sale: i64,
    whale_moves: i64,
    pattern: i64,
}

/// Alert Monitor module
pub struct AlertMonitor {
    marketplace: Option<Arc<dyn MarketplaceProvider>>,
    alerts: Arc<AlertService>,
    cache: Arc<CacheStore>,
    whales: Arc<RwLock<HashSet<String>>>,
    thresholds: Arc<RwLock<AlertThresholds>>,
    contract: String,
    slug: String,
    interval_secs: u64,
    is_running: Arc<AtomicBool>,
    checkpoints: Arc<RwLock<Checkpoints>>,
}

impl AlertMonitor {
    pub fn new(
        marketplace: Option<Arc<dyn MarketplaceProvider>>,
        alerts: Arc<AlertService>,
        cache: Arc<CacheStore>,
        whales: Arc<RwLock<HashSet<String>>>,
        thresholds: AlertThresholds,
        contract: String,
        slug: String,
        interval_secs: u64,
    ) -> Self {
        Self {
            marketplace,
            alerts,
            cache,
            whales,
            thresholds: Arc::new(RwLock::new(thresholds)),
            contract,
            slug,
            interval_secs,
            is_running: Arc::new(AtomicBool::new(false)),
            checkpoints: Arc::new(RwLock::new(Checkpoints::default())),
        }
    }

    /// Start the monitor loop
    pub fn start(&self) {
        if self.is_running.load(Ordering::SeqCst) {
            warn!(target: "ALERTS", "Already running");
            return;
        }
        self.is_running.store(true, Ordering::SeqCst);

        if self.marketplace.is_none() {
            info!(target: "ALERTS", "No marketplace credential, detectors will idle");
        }

        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(monitor.interval_secs));
            while monitor.is_running.load(Ordering::SeqCst) {
                interval.tick().await;
                // A failing tick skips this cycle, never the loop
                if let Err(e) = monitor.tick().await {
                    error!(target: "ALERTS", "Tick failed: {}", e);
                }
            }
            info!(target: "ALERTS", "Alert Monitor stopped");
        });

        info!(target: "ALERTS", "Alert Monitor active, checking every {}s", self.interval_secs);
    }

    /// Stop the monitor loop
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        info!(target: "ALERTS", "Alert Monitor stopping...");
    }

    /// Check if running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// One detection cycle over a fresh snapshot. Public so tests can
    /// drive ticks deterministically.
    pub async fn tick(&self) -> Result<()> {
        let Some(marketplace) = self.marketplace.as_ref() else {
            debug!(target: "ALERTS", "Skipping tick, no sales feed configured");
            return Ok(());
        };

        let (sales, stats) = tokio::join!(
            marketplace.get_recent_sales(&self.contract, SALES_WINDOW),
            marketplace.get_collection_stats(&self.slug),
        );

        // Detectors run over whatever half of the snapshot survived; a
        // failed fetch degrades that detector for this cycle only.
        let sales = match sales {
            Ok(sales) => sales,
            Err(e) => {
                warn!(target: "ALERTS", "Sales fetch failed: {}", e);
                Vec::new()
            }
        };
        let stats = match stats {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(target: "ALERTS", "Stats fetch failed: {}", e);
                None
            }
        };

        let (large, whale, floor, pattern) = tokio::join!(
            self.detect_large_sales(&sales),
            self.detect_whale_moves(&sales),
            self.detect_floor_change(stats.as_ref()),
            self.detect_pump_dump(&sales),
        );

        let emitted = large + whale + floor + pattern;
        if emitted > 0 {
            info!(target: "ALERTS", "Tick emitted {} alerts", emitted);
        }
        Ok(())
    }

    async fn detect_large_sales(&self, sales: &[MarketplaceSale]) -> usize {
        let threshold = self.thresholds.read().large_sale;
        let checkpoint = self.checkpoints.read().large_sale;
        let mut newest = checkpoint;
        let mut emitted = 0;

        for sale in sales {
            newest = newest.max(sale.timestamp);
            if sale.timestamp <= checkpoint || sale.price < threshold {
                continue;
            }

            let severity = if sale.price >= threshold * 2.0 {
                Severity::Critical
            } else {
                Severity::Warning
            };

            self.alerts.emit(
                AlertType::LargeSale,
                severity,
                "Large Sale",
                &format!("Token #{} sold for {:.2} ETH", sale.token_id, sale.price),
                AlertMetadata {
                    token_id: Some(sale.token_id),
                    address: Some(sale.to.clone()),
                    price: Some(sale.price),
                    tx_hash: Some(sale.tx_hash.clone()),
                },
            );
            emitted += 1;
        }

        self.checkpoints.write().large_sale = newest;
        emitted
    }

    async fn detect_whale_moves(&self, sales: &[MarketplaceSale]) -> usize {
        let checkpoint = self.checkpoints.read().whale_moves;
        let mut newest = checkpoint;
        let mut emitted = 0;

        {
            let whales = self.whales.read();
            for sale in sales {
                newest = newest.max(sale.timestamp);
                if sale.timestamp <= checkpoint {
                    continue;
                }

                if whales.contains(&sale.to) {
                    self.alerts.emit(
                        AlertType::WhaleBuy,
                        Severity::Info,
                        "Whale Buy",
                        &format!(
                            "Whale {} bought token #{} for {:.2} ETH",
                            shorten_address(&sale.to, 6),
                            sale.token_id,
                            sale.price
                        ),
                        AlertMetadata {
                            token_id: Some(sale.token_id),
                            address: Some(sale.to.clone()),
                            price: Some(sale.price),
                            tx_hash: Some(sale.tx_hash.clone()),
                        },
                    );
                    emitted += 1;
                }

                if whales.contains(&sale.from) {
                    self.alerts.emit(
                        AlertType::WhaleSell,
                        Severity::Warning,
                        "Whale Sell",
                        &format!(
                            "Whale {} sold token #{} for {:.2} ETH",
                            shorten_address(&sale.from, 6),
                            sale.token_id,
                            sale.price
                        ),
                        AlertMetadata {
                            token_id: Some(sale.token_id),
                            address: Some(sale.from.clone()),
                            price: Some(sale.price),
                            tx_hash: Some(sale.tx_hash.clone()),
                        },
                    );
                    emitted += 1;
                }
            }
        }

        self.checkpoints.write().whale_moves = newest;
        emitted
    }

    async fn detect_floor_change(&self, stats: Option<&CollectionStats>) -> usize {
        let Some(current) = stats.and_then(|s| s.floor_price) else {
            return 0;
        };

        let threshold = self.thresholds.read().floor_change_percent;
        let last = self.cache.get_as::<f64>(KEY_FLOOR_LAST);
        let mut emitted = 0;

        if let Some(last) = last.filter(|l| *l > 0.0) {
            let percent = (current - last) / last * 100.0;
            if percent.abs() >= threshold {
                let severity = if percent.abs() >= threshold * 2.0 {
                    Severity::Critical
                } else {
                    Severity::Warning
                };

                self.alerts.emit(
                    AlertType::FloorPriceChange,
                    severity,
                    "Floor Price Change",
                    &format!(
                        "Floor moved {:+.1}% from {:.2} to {:.2} ETH",
                        percent, last, current
                    ),
                    AlertMetadata {
                        price: Some(current),
                        ..Default::default()
                    },
                );
                emitted = 1;
            }
        }

        // The reference floor updates every tick whether or not we alerted
        self.cache
            .set_as(KEY_FLOOR_LAST, &current, FLOOR_LAST_TTL);
        emitted
    }

    async fn detect_pump_dump(&self, sales: &[MarketplaceSale]) -> usize {
        let (pump, dump, window_minutes, min_sales) = {
            let t = self.thresholds.read();
            (
                t.pump_percent,
                t.dump_percent,
                t.pump_window_minutes,
                t.min_sales_for_pattern,
            )
        };

        let cutoff = Utc::now().timestamp() - window_minutes * 60;
        let mut window: Vec<&MarketplaceSale> =
            sales.iter().filter(|s| s.timestamp >= cutoff).collect();
        if window.len() < min_sales {
            return 0;
        }
        window.sort_by_key(|s| s.timestamp);

        let newest_ts = window.last().map(|s| s.timestamp).unwrap_or(0);
        let checkpoint = self.checkpoints.read().pattern;
        if newest_ts <= checkpoint {
            return 0;
        }

        let oldest_price = window.first().map(|s| s.price).unwrap_or(0.0);
        let newest_price = window.last().map(|s| s.price).unwrap_or(0.0);
        self.checkpoints.write().pattern = newest_ts;

        if oldest_price <= 0.0 {
            return 0;
        }

        let percent = (newest_price - oldest_price) / oldest_price * 100.0;
        if percent >= pump {
            self.alerts.emit(
                AlertType::PumpDetected,
                Severity::Critical,
                "Pump Detected",
                &format!(
                    "Price up {:+.1}% over {} sales in {} minutes",
                    percent,
                    window.len(),
                    window_minutes
                ),
                AlertMetadata {
                    price: Some(newest_price),
                    ..Default::default()
                },
            );
            return 1;
        }

        if percent <= dump {
            self.alerts.emit(
                AlertType::DumpDetected,
                Severity::Critical,
                "Dump Detected",
                &format!(
                    "Price down {:+.1}% over {} sales in {} minutes",
                    percent,
                    window.len(),
                    window_minutes
                ),
                AlertMetadata {
                    price: Some(newest_price),
                    ..Default::default()
                },
            );
            return 1;
        }

        0
    }
}

impl Clone for AlertMonitor {
    fn clone(&self) -> Self {
        Self {
            marketplace: self.marketplace.clone(),
            alerts: Arc::clone(&self.alerts),
            cache: Arc::clone(&self.cache),
            whales: Arc::clone(&self.whales),
            thresholds: Arc::clone(&self.thresholds),
            contract: self.contract.clone(),
            slug: self.slug.clone(),
            interval_secs: self.interval_secs,
            is_running: Arc::clone(&self.is_running),
            checkpoints: Arc::clone(&self.checkpoints),
        }
    }
}
