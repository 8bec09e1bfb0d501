//! Metrics sink abstraction.
//!
//! The lifecycle manager reports counters and latencies through an
//! injected sink instead of a global registry, so tests can swap in a
//! recording sink and embedders can bridge to their own telemetry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Destination for runtime telemetry.
///
/// Implementations must be cheap: the lifecycle manager calls these on
/// every tool invocation, inside the request path.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Increment a named counter by one.
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Record one observed duration (call latency).
    fn observe_duration(&self, name: &str, duration: Duration, labels: &[(&str, &str)]);
}

/// Sink that drops everything. The default when the embedder does not care.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn observe_duration(&self, _name: &str, _duration: Duration, _labels: &[(&str, &str)]) {}
}

/// Recording sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    durations: Mutex<HashMap<String, Vec<Duration>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if never incremented.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.get(&series_key(name, labels)).copied().unwrap_or(0)
    }

    /// All recorded durations for a series.
    pub fn recorded_durations(&self, name: &str, labels: &[(&str, &str)]) -> Vec<Duration> {
        let durations = self.durations.lock().unwrap_or_else(|e| e.into_inner());
        durations
            .get(&series_key(name, labels))
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        *counters.entry(series_key(name, labels)).or_insert(0) += 1;
    }

    fn observe_duration(&self, name: &str, duration: Duration, labels: &[(&str, &str)]) {
        let mut durations = self.durations.lock().unwrap_or_else(|e| e.into_inner());
        durations
            .entry(series_key(name, labels))
            .or_default()
            .push(duration);
    }
}

/// Stable series identity: `name{k1=v1,k2=v2}` with labels in given order.
fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", rendered.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates_per_series() {
        let sink = InMemoryMetrics::new();
        sink.incr_counter("tool_call_total", &[("alias", "echo")]);
        sink.incr_counter("tool_call_total", &[("alias", "echo")]);
        sink.incr_counter("tool_call_total", &[("alias", "scraper")]);

        assert_eq!(sink.counter_value("tool_call_total", &[("alias", "echo")]), 2);
        assert_eq!(sink.counter_value("tool_call_total", &[("alias", "scraper")]), 1);
        assert_eq!(sink.counter_value("tool_call_total", &[("alias", "ghost")]), 0);
    }

    #[test]
    fn test_durations_are_recorded() {
        let sink = InMemoryMetrics::new();
        sink.observe_duration("tool_call_duration", Duration::from_millis(7), &[]);
        sink.observe_duration("tool_call_duration", Duration::from_millis(9), &[]);

        let recorded = sink.recorded_durations("tool_call_duration", &[]);
        assert_eq!(recorded, vec![Duration::from_millis(7), Duration::from_millis(9)]);
    }

    #[test]
    fn test_noop_is_silent() {
        let sink = NoopMetrics;
        sink.incr_counter("anything", &[]);
        sink.observe_duration("anything", Duration::ZERO, &[("a", "b")]);
    }
}
