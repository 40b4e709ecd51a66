//! Prometheus metrics

use std::time::Duration;

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Bars forwarded to a strategy
    BarsProcessed,
    /// Signals received from a strategy
    SignalsReceived,
    /// Historical data requests handled
    BootstrapRequests,
    /// Historical data requests answered with a failure
    BootstrapErrors,
    /// Failed broker publishes
    PublishErrors,
    /// Malformed archive rows skipped
    RowsSkipped,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// 1 when the strategy has reported ready
    StrategyReady,
}

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Time to answer one historical data request
    BootstrapRequest,
    /// Time spent waiting for a signal after a bar
    SignalWait,
}

fn counter_name(metric: CounterMetric) -> &'static str {
    match metric {
        CounterMetric::BarsProcessed => "bridge_bars_processed_total",
        CounterMetric::SignalsReceived => "bridge_signals_total",
        CounterMetric::BootstrapRequests => "bootstrap_requests_total",
        CounterMetric::BootstrapErrors => "bootstrap_errors_total",
        CounterMetric::PublishErrors => "broker_publish_errors_total",
        CounterMetric::RowsSkipped => "store_rows_skipped_total",
    }
}

/// Increment a counter
pub fn increment(metric: CounterMetric, value: u64) {
    metrics::counter!(counter_name(metric)).increment(value);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let metric_name = match metric {
        GaugeMetric::StrategyReady => "bridge_strategy_ready",
    };
    metrics::gauge!(metric_name).set(value);
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let metric_name = match metric {
        LatencyMetric::BootstrapRequest => "bootstrap_request_latency_ms",
        LatencyMetric::SignalWait => "bridge_signal_wait_latency_ms",
    };
    metrics::histogram!(metric_name).record(duration.as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_names_are_prefixed() {
        assert!(counter_name(CounterMetric::BarsProcessed).starts_with("bridge_"));
        assert!(counter_name(CounterMetric::BootstrapErrors).starts_with("bootstrap_"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        increment(CounterMetric::RowsSkipped, 3);
        set_gauge(GaugeMetric::StrategyReady, 1.0);
        record_latency(LatencyMetric::SignalWait, Duration::from_millis(5));
    }
}
