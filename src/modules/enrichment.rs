//! Enrichment Pipeline - augments holders with off-chain identity and
//! portfolio data
//!
//! Three independent sub-steps per holder (identity, native balance,
//! portfolio valuation), each cached under its own namespace and each
//! failing into a safe default instead of aborting the record. Batches are
//! chunked and paced to stay polite toward rate-limited upstreams.

use chrono::Utc;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ledger::Holder;
use crate::providers::{IdentityProvider, OwnedAsset, PortfolioProvider};
use crate::utils::CacheStore;

const IDENTITY_TTL: Duration = Duration::from_secs(24 * 3600);
const BALANCE_TTL: Duration = Duration::from_secs(30 * 60);
const PORTFOLIO_TTL: Duration = Duration::from_secs(3600);
const FLOOR_TTL: Duration = Duration::from_secs(30 * 60);

/// Enrichment completeness, degraded one level per failing sub-step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Complete,
    Partial,
    Failed,
}

impl EnrichmentStatus {
    fn degrade(self) -> Self {
        match self {
            EnrichmentStatus::Complete => EnrichmentStatus::Partial,
            _ => EnrichmentStatus::Failed,
        }
    }
}

/// Per-contract slice of a holder's portfolio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioCollection {
    pub contract: String,
    pub name: String,
    pub symbol: String,
    pub count: usize,
    pub floor_price: Option<f64>,
    pub estimated_value: Option<f64>,
}

/// A holder's NFT portfolio grouped by source contract
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    pub total_collections: usize,
    pub total_nfts: usize,
    pub collections: Vec<PortfolioCollection>,
}

/// A holder augmented with off-chain identity and portfolio data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedHolder {
    #[serde(flatten)]
    pub holder: Holder,
    pub identity_name: Option<String>,
    pub native_balance: String,
    pub portfolio: Portfolio,
    pub portfolio_value: Option<f64>,
    pub enriched_at: i64,
    pub status: EnrichmentStatus,
}

/// Internal sub-step outcome; the nullable-field contract only appears at
/// the record boundary.
enum StepOutcome<T> {
    Resolved(T),
    Degraded,
}

/// Batched, rate-limited, fault-isolated enrichment
pub struct EnrichmentPipeline {
    identity: Arc<dyn IdentityProvider>,
    portfolio: Arc<dyn PortfolioProvider>,
    cache: Arc<CacheStore>,
    identity_timeout: Duration,
}

impl EnrichmentPipeline {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        portfolio: Arc<dyn PortfolioProvider>,
        cache: Arc<CacheStore>,
        identity_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            portfolio,
            cache,
            identity_timeout,
        }
    }

    /// Enrich a single holder. Never errors: each failing sub-step sets its
    /// safe default and degrades `status` by one level.
    pub async fn enrich_one(&self, holder: &Holder) -> EnrichedHolder {
        let (identity, balance, portfolio) = tokio::join!(
            self.resolve_identity(&holder.address),
            self.resolve_balance(&holder.address),
            self.resolve_portfolio(&holder.address),
        );

        let mut status = EnrichmentStatus::Complete;

        let identity_name = match identity {
            StepOutcome::Resolved(name) => name,
            StepOutcome::Degraded => {
                status = status.degrade();
                None
            }
        };

        let native_balance = match balance {
            StepOutcome::Resolved(balance) => balance,
            StepOutcome::Degraded => {
                status = status.degrade();
                "0".to_string()
            }
        };

        let (portfolio, portfolio_value) = match portfolio {
            StepOutcome::Resolved(p) => {
                let value = portfolio_total(&p);
                (p, value)
            }
            StepOutcome::Degraded => {
                status = status.degrade();
                (Portfolio::default(), None)
            }
        };

        EnrichedHolder {
            holder: holder.clone(),
            identity_name,
            native_balance,
            portfolio,
            portfolio_value,
            enriched_at: Utc::now().timestamp(),
            status,
        }
    }

    /// Enrich holders in sequential fixed-size chunks with concurrent
    /// fan-out inside each chunk and a fixed delay between chunks. A
    /// failing holder never fails its siblings.
    pub async fn enrich_batch(
        &self,
        holders: &[Holder],
        batch_size: usize,
        delay_ms: u64,
    ) -> Vec<EnrichedHolder> {
        let batch_size = batch_size.max(1);
        let mut enriched = Vec::with_capacity(holders.len());
        let chunks: Vec<&[Holder]> = holders.chunks(batch_size).collect();
        let total_chunks = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let results = join_all(chunk.iter().map(|h| self.enrich_one(h))).await;
            enriched.extend(results);

            if i + 1 < total_chunks {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        let complete = enriched
            .iter()
            .filter(|e| e.status == EnrichmentStatus::Complete)
            .count();
        info!(
            target: "ENRICH",
            "Enriched {} holders ({} complete, {} degraded)",
            enriched.len(),
            complete,
            enriched.len() - complete
        );
        enriched
    }

    /// Identity resolution under the imposed timeout. A successful lookup
    /// with no name is a cacheable null, not a failure.
    async fn resolve_identity(&self, address: &str) -> StepOutcome<Option<String>> {
        let key = format!("identity:{}", address);
        if let Some(cached) = self.cache.get(&key) {
            let name: Option<String> = serde_json::from_value(cached).unwrap_or(None);
            return StepOutcome::Resolved(name);
        }

        match tokio::time::timeout(self.identity_timeout, self.identity.lookup(address)).await {
            Ok(Ok(name)) => {
                self.cache.set_as(&key, &name, IDENTITY_TTL);
                StepOutcome::Resolved(name)
            }
            Ok(Err(e)) => {
                warn!(target: "ENRICH", "Identity lookup failed for {}: {}", address, e);
                StepOutcome::Degraded
            }
            Err(_) => {
                warn!(target: "ENRICH", "Identity lookup timed out for {}", address);
                StepOutcome::Degraded
            }
        }
    }

    async fn resolve_balance(&self, address: &str) -> StepOutcome<String> {
        let key = format!("balance:{}", address);
        if let Some(cached) = self.cache.get_as::<String>(&key) {
            return StepOutcome::Resolved(cached);
        }

        match self.portfolio.get_native_balance(address).await {
            Ok(balance) => {
                self.cache.set_as(&key, &balance, BALANCE_TTL);
                StepOutcome::Resolved(balance)
            }
            Err(e) => {
                warn!(target: "ENRICH", "Balance lookup failed for {}: {}", address, e);
                StepOutcome::Degraded
            }
        }
    }

    async fn resolve_portfolio(&self, address: &str) -> StepOutcome<Portfolio> {
        let key = format!("portfolio:{}", address);
        if let Some(cached) = self.cache.get_as::<Portfolio>(&key) {
            return StepOutcome::Resolved(cached);
        }

        let assets = match self.portfolio.get_assets_owned_by(address).await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(target: "ENRICH", "Portfolio lookup failed for {}: {}", address, e);
                return StepOutcome::Degraded;
            }
        };

        let portfolio = self.value_portfolio(assets).await;
        self.cache.set_as(&key, &portfolio, PORTFOLIO_TTL);
        StepOutcome::Resolved(portfolio)
    }

    /// Group assets by contract and price each group at its floor.
    /// Contracts without a resolvable floor contribute a null estimated
    /// value and are excluded from the sum, never treated as zero.
    async fn value_portfolio(&self, assets: Vec<OwnedAsset>) -> Portfolio {
        let total_nfts = assets.len();

        let mut grouped: BTreeMap<String, (String, String, usize)> = BTreeMap::new();
        for asset in assets {
            let entry = grouped
                .entry(asset.contract.clone())
                .or_insert((asset.name, asset.symbol, 0));
            entry.2 += 1;
        }

        let mut collections = Vec::with_capacity(grouped.len());
        for (contract, (name, symbol, count)) in grouped {
            let floor_price = self.resolve_floor(&contract).await;
            let estimated_value = floor_price.map(|f| f * count as f64);
            collections.push(PortfolioCollection {
                contract,
                name,
                symbol,
                count,
                floor_price,
                estimated_value,
            });
        }

        Portfolio {
            total_collections: collections.len(),
            total_nfts,
            collections,
        }
    }

    /// Floor price per contract, cached. A provider error resolves to no
    /// floor rather than failing the portfolio step.
    async fn resolve_floor(&self, contract: &str) -> Option<f64> {
        let key = format!("floor:{}", contract);
        if let Some(cached) = self.cache.get(&key) {
            return serde_json::from_value(cached).unwrap_or(None);
        }

        match self.portfolio.get_floor_price(contract).await {
            Ok(floor) => {
                self.cache.set_as(&key, &floor, FLOOR_TTL);
                floor
            }
            Err(e) => {
                debug!(target: "ENRICH", "Floor lookup failed for {}: {}", contract, e);
                None
            }
        }
    }
}

/// Sum of resolvable per-contract estimates; `None` when nothing resolved
fn portfolio_total(portfolio: &Portfolio) -> Option<f64> {
    let values: Vec<f64> = portfolio
        .collections
        .iter()
        .filter_map(|c| c.estimated_value)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum())
    }
}
