//! WhaleWatch - NFT Collection Monitoring Suite
//!
//! Tracks large holders of an NFT collection by replaying transfer events,
//! maintains derived aggregates (holder ledger, distribution statistics,
//! trading metrics), detects notable market events, and enriches holder
//! records with off-chain identity and portfolio data.
//!
//! This is a **monitoring-only** tool - no wallet or trading functionality.

mod config;
mod error;
mod modules;
mod providers;
mod utils;

use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use config::Config;
use modules::alert_monitor::AlertThresholds;
use modules::{AlertMonitor, EnrichmentPipeline, EventIngestor, WhaleTracker};
use providers::{
    ChainLogProvider, HttpIdentityProvider, HttpMarketplaceProvider, HttpPortfolioProvider,
    JsonRpcChainProvider, MarketplaceProvider,
};
use utils::{init_logger, AlertService, CacheStore, MetricsService};

const BANNER: &str = r#"
    +---------------------------------------------------------------+
    |                                                               |
    |   W H A L E W A T C H                                         |
    |                                                               |
    |   NFT Collection Monitoring Suite (Monitor-Only Mode)         |
    |   Holder Ledger | Whale Tracker | Market Alerts               |
    |                                                               |
    +---------------------------------------------------------------+
"#;

/// WhaleWatch application
pub struct WhaleWatch {
    config: Config,
    cache: Arc<CacheStore>,
    alerts: Arc<AlertService>,
    metrics: Arc<MetricsService>,
    tracker: WhaleTracker,
    monitor: AlertMonitor,
}

impl WhaleWatch {
    /// Create a new WhaleWatch instance with every service constructed and
    /// wired explicitly.
    pub fn new() -> Result<Self> {
        let config = Config::from_env()?;

        // Shared services
        let cache = Arc::new(CacheStore::new());
        let alerts = Arc::new(AlertService::new(Arc::clone(&cache)));
        let metrics = Arc::new(MetricsService::new());

        // Upstream collaborators
        let chain: Arc<dyn ChainLogProvider> =
            Arc::new(JsonRpcChainProvider::new(config.rpc_url.clone()));
        let marketplace: Option<Arc<dyn MarketplaceProvider>> =
            config.marketplace_api_key.as_ref().map(|key| {
                Arc::new(HttpMarketplaceProvider::new(
                    config.marketplace_api_url.clone(),
                    key.clone(),
                )) as Arc<dyn MarketplaceProvider>
            });
        let identity = Arc::new(HttpIdentityProvider::new(config.identity_api_url.clone()));
        let portfolio = Arc::new(HttpPortfolioProvider::new(
            config.portfolio_api_url.clone(),
            config.rpc_url.clone(),
        ));

        // Core modules
        let ingestor = Arc::new(EventIngestor::new(
            chain,
            Arc::clone(&cache),
            config.contract_address.clone(),
        ));
        let enrichment = Arc::new(EnrichmentPipeline::new(
            identity,
            portfolio,
            Arc::clone(&cache),
            Duration::from_secs(config.identity_timeout_secs),
        ));

        let whales = Arc::new(RwLock::new(HashSet::new()));

        let tracker = WhaleTracker::new(
            &config,
            ingestor,
            enrichment,
            Arc::clone(&cache),
            Arc::clone(&metrics),
            Arc::clone(&whales),
        );

        let monitor = AlertMonitor::new(
            marketplace,
            Arc::clone(&alerts),
            Arc::clone(&cache),
            whales,
            AlertThresholds::from_config(&config),
            config.contract_address.clone(),
            config.collection_slug.clone(),
            config.alert_interval_secs,
        );

        Ok(Self {
            config,
            cache,
            alerts,
            metrics,
            tracker,
            monitor,
        })
    }

    /// Start WhaleWatch
    pub async fn start(&self) -> Result<()> {
        println!("{}", BANNER);

        info!(target: "WHALEWATCH", "Initializing WhaleWatch Monitor...");
        info!(
            target: "WHALEWATCH",
            "Tracking contract {} ({})",
            self.config.contract_address,
            if self.config.collection_slug.is_empty() {
                "no slug"
            } else {
                &self.config.collection_slug
            }
        );

        // Link alert stream into metrics before anything can emit
        self.link_modules();

        // Seed the ledger once so the alert monitor starts with a whale set
        if let Err(e) = self.tracker.refresh_ledger().await {
            error!(target: "WHALEWATCH", "Initial ledger build failed, loops will retry: {}", e);
        }

        self.tracker.start();
        self.monitor.start();

        self.metrics.set_module_status("tracker", true);
        self.metrics.set_module_status("alert_monitor", true);

        info!(target: "WHALEWATCH", "All modules started successfully");
        Ok(())
    }

    /// Link modules together
    fn link_modules(&self) {
        let mut alert_rx = self.alerts.subscribe();
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            loop {
                match alert_rx.recv().await {
                    Ok(alert) => metrics.record_alert(&alert),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        error!(target: "WHALEWATCH", "Alert metrics link lagged {} messages", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Graceful shutdown
    pub fn shutdown(&self) {
        info!(target: "WHALEWATCH", "Shutting down...");

        self.tracker.stop();
        self.monitor.stop();
        self.metrics.set_module_status("tracker", false);
        self.metrics.set_module_status("alert_monitor", false);
        self.cache.clear();

        info!(target: "WHALEWATCH", "Shutdown complete");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let whalewatch = match WhaleWatch::new() {
        Ok(ww) => ww,
        Err(e) => {
            error!(target: "WHALEWATCH", "Failed to initialize: {}", e);
            return Err(e);
        }
    };

    if let Err(e) = whalewatch.start().await {
        error!(target: "WHALEWATCH", "Fatal error: {}", e);
        return Err(e);
    }

    // Run until a shutdown signal arrives
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    whalewatch.shutdown();
    Ok(())
}
