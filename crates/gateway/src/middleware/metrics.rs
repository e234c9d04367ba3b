//! Per-request counters and latency histograms

use axum::{extract::MatchedPath, extract::Request, middleware::Next, response::Response};
use researchforge_common::metrics::RequestMetrics;

/// Record method, matched route and status for every request
pub async fn track_requests(request: Request, next: Next) -> Response {
    // Label by route template so unknown paths share one series
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", |p| p.as_str())
        .to_string();
    let tracker = RequestMetrics::start(request.method().as_str(), &endpoint);

    let response = next.run(request).await;
    tracker.finish(response.status().as_u16());
    response
}
