//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the research pipeline
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ResearchForge metrics
pub const METRICS_PREFIX: &str = "researchforge";

/// Histogram buckets for request latency (in seconds)
/// Research requests run for seconds, not milliseconds
pub const LATENCY_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    20.00,  // 20s - quick deadline
    45.00,  // 45s - standard deadline
    90.00,  // 90s - deep deadline
    120.0,  // 120s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Research metrics
    describe_counter!(
        format!("{}_research_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Total research runs by depth and outcome"
    );

    describe_histogram!(
        format!("{}_research_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Research run latency in seconds"
    );

    describe_histogram!(
        format!("{}_research_sources", METRICS_PREFIX),
        Unit::Count,
        "Sources returned per research run"
    );

    // Provider metrics
    describe_counter!(
        format!("{}_provider_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total search and news provider requests"
    );

    describe_histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Provider call latency in seconds"
    );

    // Fetch metrics
    describe_counter!(
        format!("{}_fetches_total", METRICS_PREFIX),
        Unit::Count,
        "Total page fetches by outcome"
    );

    // LLM metrics
    describe_counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total language model requests"
    );

    describe_histogram!(
        format!("{}_llm_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Language model latency in seconds"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a completed research run
pub fn record_research(duration_secs: f64, depth: &str, source_count: usize, success: bool) {
    let outcome = if success { "success" } else { "error" };

    counter!(
        format!("{}_research_runs_total", METRICS_PREFIX),
        "depth" => depth.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        format!("{}_research_duration_seconds", METRICS_PREFIX),
        "depth" => depth.to_string()
    )
    .record(duration_secs);

    histogram!(
        format!("{}_research_sources", METRICS_PREFIX),
        "depth" => depth.to_string()
    )
    .record(source_count as f64);
}

/// Helper to record provider metrics
pub fn record_provider(duration_secs: f64, provider: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_provider_requests_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        "provider" => provider.to_string()
    )
    .record(duration_secs);
}

/// Helper to record a page fetch outcome
pub fn record_fetch(outcome: &str) {
    counter!(
        format!("{}_fetches_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record language model metrics
pub fn record_llm(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_llm_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_llm_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
