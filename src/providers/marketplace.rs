//! Marketplace sales-feed provider (REST, credentialed)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::WatchError;

/// A completed sale reported by the marketplace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceSale {
    pub token_id: u64,
    pub price: f64,
    pub from: String,
    pub to: String,
    pub timestamp: i64,
    pub tx_hash: String,
}

/// Collection-level stats snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub floor_price: Option<f64>,
    pub volume_24h: f64,
    pub volume_7d: f64,
}

/// Upstream seam for the marketplace sales feed
#[async_trait]
pub trait MarketplaceProvider: Send + Sync {
    async fn get_recent_sales(&self, contract: &str, limit: usize) -> Result<Vec<MarketplaceSale>>;
    async fn get_collection_stats(&self, slug: &str) -> Result<CollectionStats>;
}

/// REST implementation of [`MarketplaceProvider`]
pub struct HttpMarketplaceProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpMarketplaceProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .header("X-API-KEY", &self.api_key)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| WatchError::Upstream(format!("marketplace request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(
                WatchError::Upstream(format!("marketplace status {}", resp.status())).into(),
            );
        }

        resp.json()
            .await
            .map_err(|e| WatchError::Upstream(format!("marketplace decode: {}", e)).into())
    }
}

#[async_trait]
impl MarketplaceProvider for HttpMarketplaceProvider {
    async fn get_recent_sales(&self, contract: &str, limit: usize) -> Result<Vec<MarketplaceSale>> {
        let url = format!(
            "{}/events/collection/{}?event_type=sale&limit={}",
            self.base_url, contract, limit
        );
        let json = self.get_json(&url).await?;

        let events = json
            .get("asset_events")
            .and_then(|e| e.as_array())
            .cloned()
            .unwrap_or_default();

        let mut sales = Vec::with_capacity(events.len());
        for event in &events {
            // Malformed events are skipped, not fatal to the batch
            let Some(sale) = parse_sale_event(event) else {
                debug!(target: "MARKET", "Skipping malformed sale event");
                continue;
            };
            sales.push(sale);
        }
        Ok(sales)
    }

    async fn get_collection_stats(&self, slug: &str) -> Result<CollectionStats> {
        let url = format!("{}/collections/{}/stats", self.base_url, slug);
        let json = self.get_json(&url).await?;

        let total = json.get("total").cloned().unwrap_or_default();
        let intervals = json
            .get("intervals")
            .and_then(|i| i.as_array())
            .cloned()
            .unwrap_or_default();

        let volume_for = |name: &str| -> f64 {
            intervals
                .iter()
                .find(|i| i.get("interval").and_then(|v| v.as_str()) == Some(name))
                .and_then(|i| i.get("volume").and_then(|v| v.as_f64()))
                .unwrap_or(0.0)
        };

        Ok(CollectionStats {
            floor_price: total.get("floor_price").and_then(|v| v.as_f64()),
            volume_24h: volume_for("one_day"),
            volume_7d: volume_for("seven_day"),
        })
    }
}

fn parse_sale_event(event: &serde_json::Value) -> Option<MarketplaceSale> {
    let token_id = event
        .get("nft")
        .and_then(|n| n.get("identifier"))
        .and_then(|i| i.as_str())
        .and_then(|s| s.parse().ok())?;
    let quantity: f64 = event
        .get("payment")
        .and_then(|p| p.get("quantity"))
        .and_then(|q| q.as_str())
        .and_then(|s| s.parse().ok())?;
    let decimals = event
        .get("payment")
        .and_then(|p| p.get("decimals"))
        .and_then(|d| d.as_u64())
        .unwrap_or(18);

    Some(MarketplaceSale {
        token_id,
        price: quantity / 10f64.powi(decimals as i32),
        from: event.get("seller")?.as_str()?.to_lowercase(),
        to: event.get("buyer")?.as_str()?.to_lowercase(),
        timestamp: event.get("event_timestamp")?.as_i64()?,
        tx_hash: event
            .get("transaction")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
    })
}
