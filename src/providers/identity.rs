//! Name-service identity provider

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::error::WatchError;

/// Upstream seam for reverse name resolution
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve an address to a display name; `None` when no name is set
    async fn lookup(&self, address: &str) -> Result<Option<String>>;
}

/// REST implementation of [`IdentityProvider`]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn lookup(&self, address: &str) -> Result<Option<String>> {
        let url = format!("{}/{}", self.base_url, address);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| WatchError::Upstream(format!("identity request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(WatchError::Upstream(format!("identity status {}", resp.status())).into());
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| WatchError::Upstream(format!("identity decode: {}", e)))?;

        Ok(json
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .map(String::from))
    }
}
