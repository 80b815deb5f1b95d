//! Error taxonomy for WhaleWatch

use thiserror::Error;

/// Error classes used across the tracker core.
///
/// `Upstream` covers transient provider failures (rate limit, timeout,
/// network); callers retry at the next scheduled cycle or fall back to
/// stale cache. `Parse` covers malformed per-item data; the affected item
/// is skipped. `Config` is fatal at construction time.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),
}
