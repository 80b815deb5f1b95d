//! Configuration module for WhaleWatch

use anyhow::Result;
use std::env;

use crate::error::WatchError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Chain RPC (read-only)
    pub rpc_url: String,

    // Tracked collection
    pub contract_address: String,
    pub collection_slug: String,

    // Marketplace sales feed (detectors no-op without a key)
    pub marketplace_api_url: String,
    pub marketplace_api_key: Option<String>,

    // Enrichment upstreams
    pub identity_api_url: String,
    pub portfolio_api_url: String,
    pub identity_timeout_secs: u64,

    // Whale tracking
    pub whale_threshold: usize,

    // Alert thresholds
    pub large_sale_threshold: f64,
    pub floor_change_percent: f64,
    pub pump_threshold_percent: f64,
    pub dump_threshold_percent: f64,
    pub pump_window_minutes: i64,
    pub min_sales_for_pattern: usize,

    // Background loop intervals
    pub alert_interval_secs: u64,
    pub ledger_refresh_secs: u64,
    pub metrics_refresh_secs: u64,
    pub whale_refresh_secs: u64,

    // Enrichment pacing
    pub enrich_batch_size: usize,
    pub enrich_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A missing contract address is a construction-time error; everything
    /// else falls back to a sensible default.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let contract_address = env::var("CONTRACT_ADDRESS")
            .map_err(|_| WatchError::Config("CONTRACT_ADDRESS is required".to_string()))?
            .to_lowercase();

        Ok(Self {
            rpc_url: env::var("RPC_URL")
                .unwrap_or_else(|_| "https://eth.llamarpc.com".to_string()),

            contract_address,
            collection_slug: env::var("COLLECTION_SLUG").unwrap_or_default(),

            marketplace_api_url: env::var("MARKETPLACE_API_URL")
                .unwrap_or_else(|_| "https://api.opensea.io/api/v2".to_string()),
            marketplace_api_key: env::var("MARKETPLACE_API_KEY").ok(),

            identity_api_url: env::var("IDENTITY_API_URL")
                .unwrap_or_else(|_| "https://api.ensideas.com/ens/resolve".to_string()),
            portfolio_api_url: env::var("PORTFOLIO_API_URL")
                .unwrap_or_else(|_| "https://api.opensea.io/api/v2".to_string()),
            identity_timeout_secs: env::var("IDENTITY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            whale_threshold: env::var("WHALE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),

            large_sale_threshold: env::var("LARGE_SALE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5.0),
            floor_change_percent: env::var("FLOOR_CHANGE_PERCENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            pump_threshold_percent: env::var("PUMP_THRESHOLD_PERCENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20.0),
            dump_threshold_percent: env::var("DUMP_THRESHOLD_PERCENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(-20.0),
            pump_window_minutes: env::var("PUMP_WINDOW_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            min_sales_for_pattern: env::var("MIN_SALES_FOR_PATTERN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            alert_interval_secs: env::var("ALERT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            ledger_refresh_secs: env::var("LEDGER_REFRESH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            metrics_refresh_secs: env::var("METRICS_REFRESH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            whale_refresh_secs: env::var("WHALE_REFRESH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),

            enrich_batch_size: env::var("ENRICH_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            enrich_delay_ms: env::var("ENRICH_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_contract_address_is_fatal() {
        env::remove_var("CONTRACT_ADDRESS");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("CONTRACT_ADDRESS"));
    }
}
