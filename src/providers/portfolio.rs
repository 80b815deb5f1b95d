//! Portfolio and balance provider

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::WatchError;

/// A single NFT owned by an address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedAsset {
    pub contract: String,
    pub name: String,
    pub symbol: String,
    pub token_id: u64,
}

/// Upstream seam for holdings, balances, and floor prices
#[async_trait]
pub trait PortfolioProvider: Send + Sync {
    async fn get_assets_owned_by(&self, address: &str) -> Result<Vec<OwnedAsset>>;
    /// Native balance in whole units, as a decimal string
    async fn get_native_balance(&self, address: &str) -> Result<String>;
    /// Current floor price for a contract; `None` when unlisted
    async fn get_floor_price(&self, contract: &str) -> Result<Option<f64>>;
}

/// REST implementation of [`PortfolioProvider`]
pub struct HttpPortfolioProvider {
    client: reqwest::Client,
    base_url: String,
    rpc_url: String,
}

impl HttpPortfolioProvider {
    pub fn new(base_url: String, rpc_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            rpc_url,
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| WatchError::Upstream(format!("portfolio request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(WatchError::Upstream(format!("portfolio status {}", resp.status())).into());
        }

        resp.json()
            .await
            .map_err(|e| WatchError::Upstream(format!("portfolio decode: {}", e)).into())
    }
}

#[async_trait]
impl PortfolioProvider for HttpPortfolioProvider {
    async fn get_assets_owned_by(&self, address: &str) -> Result<Vec<OwnedAsset>> {
        let url = format!("{}/chain/ethereum/account/{}/nfts", self.base_url, address);
        let json = self.get_json(&url).await?;

        let nfts = json
            .get("nfts")
            .and_then(|n| n.as_array())
            .cloned()
            .unwrap_or_default();

        let assets = nfts
            .iter()
            .filter_map(|nft| {
                Some(OwnedAsset {
                    contract: nft.get("contract")?.as_str()?.to_lowercase(),
                    name: nft
                        .get("collection")
                        .and_then(|c| c.as_str())
                        .unwrap_or("Unknown")
                        .to_string(),
                    symbol: nft
                        .get("token_standard")
                        .and_then(|s| s.as_str())
                        .unwrap_or("NFT")
                        .to_uppercase(),
                    token_id: nft
                        .get("identifier")
                        .and_then(|i| i.as_str())
                        .and_then(|s| s.parse().ok())?,
                })
            })
            .collect();
        Ok(assets)
    }

    async fn get_native_balance(&self, address: &str) -> Result<String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_getBalance",
            "params": [address, "latest"],
            "id": 1,
        });

        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| WatchError::Upstream(format!("balance request failed: {}", e)))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| WatchError::Upstream(format!("balance decode: {}", e)))?;

        let hex = json
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| WatchError::Upstream("invalid balance result".to_string()))?;

        let native = super::chain::wei_hex_to_native(hex)?;
        Ok(format!("{:.6}", native))
    }

    async fn get_floor_price(&self, contract: &str) -> Result<Option<f64>> {
        let url = format!("{}/listings/collection/{}/best", self.base_url, contract);
        let json = self.get_json(&url).await?;

        Ok(json
            .get("listings")
            .and_then(|l| l.as_array())
            .and_then(|l| l.first())
            .and_then(|l| l.get("price"))
            .and_then(|p| p.get("current"))
            .and_then(|c| c.get("value"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .map(|wei| wei / 1e18))
    }
}
