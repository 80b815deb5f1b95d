//! WhaleWatch tracking modules

pub mod alert_monitor;
pub mod analytics;
pub mod enrichment;
pub mod ingestion;
pub mod ledger;
pub mod tracker;

pub use alert_monitor::AlertMonitor;
pub use enrichment::EnrichmentPipeline;
pub use ingestion::EventIngestor;
pub use tracker::WhaleTracker;
