//! Alert service - bounded history plus push delivery to subscribers

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::error;

use crate::utils::CacheStore;

const HISTORY_LIMIT: usize = 100;
const HISTORY_TTL_SECS: i64 = 3600;

/// Alert classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LargeSale,
    WhaleBuy,
    WhaleSell,
    FloorPriceChange,
    PumpDetected,
    DumpDetected,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LargeSale => "large_sale",
            AlertType::WhaleBuy => "whale_buy",
            AlertType::WhaleSell => "whale_sell",
            AlertType::FloorPriceChange => "floor_price_change",
            AlertType::PumpDetected => "pump_detected",
            AlertType::DumpDetected => "dump_detected",
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Structured context attached to an alert
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertMetadata {
    pub token_id: Option<u64>,
    pub address: Option<String>,
    pub price: Option<f64>,
    pub tx_hash: Option<String>,
}

/// An emitted alert, immutable once constructed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub timestamp: i64,
    pub title: String,
    pub message: String,
    pub metadata: AlertMetadata,
}

/// Downstream delivery callback; errors are caught and logged
pub type AlertCallback = Box<dyn Fn(&Alert) -> anyhow::Result<()> + Send + Sync>;

/// Alert sink: bounded ring-buffer history, broadcast channel, and
/// registered callbacks. The core has no knowledge of downstream
/// transports.
pub struct AlertService {
    history: Arc<RwLock<VecDeque<Alert>>>,
    sender: broadcast::Sender<Alert>,
    callbacks: Arc<RwLock<Vec<AlertCallback>>>,
    cache: Arc<CacheStore>,
    next_id: AtomicI64,
}

impl AlertService {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            history: Arc::new(RwLock::new(VecDeque::with_capacity(HISTORY_LIMIT))),
            sender,
            callbacks: Arc::new(RwLock::new(Vec::new())),
            cache,
            next_id: AtomicI64::new(1),
        }
    }

    /// Subscribe to the alert broadcast channel
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }

    /// Register a delivery callback. A callback error is logged and never
    /// prevents delivery to the remaining callbacks.
    pub fn on_alert(&self, callback: AlertCallback) {
        self.callbacks.write().push(callback);
    }

    /// Emit an alert: record it in the bounded history, mirror the recent
    /// window into the cache, and deliver to every subscriber.
    pub fn emit(
        &self,
        alert_type: AlertType,
        severity: Severity,
        title: &str,
        message: &str,
        metadata: AlertMetadata,
    ) -> Alert {
        let alert = Alert {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            alert_type,
            severity,
            timestamp: Utc::now().timestamp(),
            title: title.to_string(),
            message: message.to_string(),
            metadata,
        };

        {
            let mut history = self.history.write();
            history.push_front(alert.clone());
            history.truncate(HISTORY_LIMIT);
        }

        self.cache.set_as(
            "alerts:recent",
            &self.recent(HISTORY_LIMIT),
            Duration::from_secs(HISTORY_TTL_SECS as u64),
        );

        let _ = self.sender.send(alert.clone());

        for callback in self.callbacks.read().iter() {
            if let Err(e) = callback(&alert) {
                error!(target: "ALERTS", "Alert callback failed: {}", e);
            }
        }

        alert
    }

    /// Most recent alerts, newest first, bounded by count and age
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let cutoff = Utc::now().timestamp() - HISTORY_TTL_SECS;
        self.history
            .read()
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AlertService {
        AlertService::new(Arc::new(CacheStore::new()))
    }

    #[test]
    fn emit_records_history_newest_first() {
        let alerts = service();
        alerts.emit(
            AlertType::LargeSale,
            Severity::Warning,
            "Large Sale",
            "first",
            AlertMetadata::default(),
        );
        alerts.emit(
            AlertType::WhaleBuy,
            Severity::Info,
            "Whale Buy",
            "second",
            AlertMetadata::default(),
        );

        let recent = alerts.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].alert_type, AlertType::WhaleBuy);
        assert_eq!(recent[1].alert_type, AlertType::LargeSale);
        assert!(recent[0].id > recent[1].id);
    }

    #[test]
    fn history_is_bounded() {
        let alerts = service();
        for i in 0..150 {
            alerts.emit(
                AlertType::LargeSale,
                Severity::Info,
                "Large Sale",
                &format!("sale {}", i),
                AlertMetadata::default(),
            );
        }
        assert_eq!(alerts.recent(500).len(), 100);
    }

    #[test]
    fn failing_callback_does_not_block_others() {
        let alerts = service();
        let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        alerts.on_alert(Box::new(|_| anyhow::bail!("downstream broken")));
        let counter = Arc::clone(&delivered);
        alerts.on_alert(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        alerts.emit(
            AlertType::DumpDetected,
            Severity::Critical,
            "Dump",
            "price collapsing",
            AlertMetadata::default(),
        );
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn recent_window_is_mirrored_into_cache() {
        let cache = Arc::new(CacheStore::new());
        let alerts = AlertService::new(Arc::clone(&cache));
        alerts.emit(
            AlertType::FloorPriceChange,
            Severity::Warning,
            "Floor Move",
            "floor moved",
            AlertMetadata::default(),
        );
        let cached: Vec<Alert> = cache.get_as("alerts:recent").unwrap();
        assert_eq!(cached.len(), 1);
    }
}
