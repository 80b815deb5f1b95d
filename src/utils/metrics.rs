//! Prometheus metrics service for WhaleWatch

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Instant;
use tracing::info;

use crate::utils::alerts::Alert;

/// Metrics service for Prometheus
pub struct MetricsService {
    registry: Registry,
    start_time: Instant,

    // Ledger / ingestion
    pub events_in_window: Gauge,
    pub holders_tracked: Gauge,
    pub whales_tracked: Gauge,

    // Enrichment
    pub enrichment_results: CounterVec,

    // Alerts
    pub alerts_emitted: CounterVec,

    // Background loops
    pub refresh_cycles: CounterVec,
    pub refresh_duration: HistogramVec,

    // System
    pub module_status: GaugeVec,
    pub uptime: Gauge,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_in_window = Gauge::new(
            "whalewatch_events_in_window",
            "Transfer events in the tracked block window",
        )
        .unwrap();
        let holders_tracked =
            Gauge::new("whalewatch_holders_tracked", "Holders in the current ledger").unwrap();
        let whales_tracked =
            Gauge::new("whalewatch_whales_tracked", "Whale addresses tracked").unwrap();

        let enrichment_results = CounterVec::new(
            Opts::new(
                "whalewatch_enrichment_results_total",
                "Enriched holder records by status",
            ),
            &["status"],
        )
        .unwrap();

        let alerts_emitted = CounterVec::new(
            Opts::new("whalewatch_alerts_emitted_total", "Alerts emitted"),
            &["type", "severity"],
        )
        .unwrap();

        let refresh_cycles = CounterVec::new(
            Opts::new("whalewatch_refresh_cycles_total", "Background refresh cycles"),
            &["task", "status"],
        )
        .unwrap();
        let refresh_duration = HistogramVec::new(
            HistogramOpts::new(
                "whalewatch_refresh_duration_seconds",
                "Background refresh duration",
            )
            .buckets(vec![0.05, 0.25, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["task"],
        )
        .unwrap();

        let module_status = GaugeVec::new(
            Opts::new("whalewatch_module_running", "Module status"),
            &["module"],
        )
        .unwrap();
        let uptime = Gauge::new("whalewatch_uptime_seconds", "Application uptime").unwrap();

        registry.register(Box::new(events_in_window.clone())).unwrap();
        registry.register(Box::new(holders_tracked.clone())).unwrap();
        registry.register(Box::new(whales_tracked.clone())).unwrap();
        registry.register(Box::new(enrichment_results.clone())).unwrap();
        registry.register(Box::new(alerts_emitted.clone())).unwrap();
        registry.register(Box::new(refresh_cycles.clone())).unwrap();
        registry.register(Box::new(refresh_duration.clone())).unwrap();
        registry.register(Box::new(module_status.clone())).unwrap();
        registry.register(Box::new(uptime.clone())).unwrap();

        info!(target: "METRICS", "Prometheus metrics initialized");

        Self {
            registry,
            start_time: Instant::now(),
            events_in_window,
            holders_tracked,
            whales_tracked,
            enrichment_results,
            alerts_emitted,
            refresh_cycles,
            refresh_duration,
            module_status,
            uptime,
        }
    }

    /// Record a ledger rebuild
    pub fn record_ledger(&self, events: usize, holders: usize, whales: usize) {
        self.events_in_window.set(events as f64);
        self.holders_tracked.set(holders as f64);
        self.whales_tracked.set(whales as f64);
    }

    /// Record one enriched holder result
    pub fn record_enrichment(&self, status: &str) {
        self.enrichment_results.with_label_values(&[status]).inc();
    }

    /// Record an emitted alert
    pub fn record_alert(&self, alert: &Alert) {
        self.alerts_emitted
            .with_label_values(&[alert.alert_type.as_str(), alert.severity.as_str()])
            .inc();
    }

    /// Record a background refresh cycle
    pub fn record_refresh(&self, task: &str, ok: bool, seconds: f64) {
        let status = if ok { "ok" } else { "error" };
        self.refresh_cycles.with_label_values(&[task, status]).inc();
        self.refresh_duration
            .with_label_values(&[task])
            .observe(seconds);
    }

    /// Set module status
    pub fn set_module_status(&self, module: &str, running: bool) {
        self.module_status
            .with_label_values(&[module])
            .set(if running { 1.0 } else { 0.0 });
    }

    /// Get metrics as Prometheus text format
    pub fn get_metrics(&self) -> String {
        self.uptime.set(self.start_time.elapsed().as_secs_f64());

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_values_appear_in_text_encoding() {
        let metrics = MetricsService::new();
        metrics.record_ledger(120, 40, 3);
        metrics.record_refresh("ledger", true, 0.8);
        metrics.record_enrichment("complete");
        metrics.set_module_status("tracker", true);

        let text = metrics.get_metrics();
        assert!(text.contains("whalewatch_holders_tracked 40"));
        assert!(text.contains("whalewatch_whales_tracked 3"));
        assert!(text.contains("whalewatch_module_running"));
    }
}
