//! Utility modules

pub mod alerts;
pub mod cache;
pub mod logger;
pub mod metrics;

pub use alerts::AlertService;
pub use cache::CacheStore;
pub use logger::init_logger;
pub use metrics::MetricsService;
