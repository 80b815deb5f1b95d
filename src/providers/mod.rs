//! Upstream collaborator seams and their HTTP implementations

pub mod chain;
pub mod identity;
pub mod marketplace;
pub mod portfolio;

pub use chain::{ChainLogProvider, JsonRpcChainProvider, RawLog, TRANSFER_TOPIC};
pub use identity::{HttpIdentityProvider, IdentityProvider};
pub use marketplace::{CollectionStats, HttpMarketplaceProvider, MarketplaceProvider, MarketplaceSale};
pub use portfolio::{HttpPortfolioProvider, OwnedAsset, PortfolioProvider};
