//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub cache: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: researchforge_common::VERSION.to_string(),
    })
}

/// Readiness probe - checks the cache backend
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let cache = state.service.cache();
    let start = std::time::Instant::now();

    let cache_check = match cache.ping().await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            backend: cache.backend_name().to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            backend: cache.backend_name().to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let ready = cache_check.status == "up";
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks { cache: cache_check },
        }),
    )
}

#[cfg(test)]
mod tests {
    use crate::test_support::router_with;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use researchforge_common::config::AppConfig;
    use researchforge_search::mock::MockSearchProvider;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = router_with(AppConfig::default(), Arc::new(MockSearchProvider::new()));
        let health = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let ready = app.oneshot(get("/ready")).await.unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
        assert!(ready.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_api_routes_only() {
        let mut config = AppConfig::default();
        config.rate_limit.requests_per_second = 1;
        config.rate_limit.burst = 1;
        config.rate_limit.enabled = true;
        let app = router_with(config, Arc::new(MockSearchProvider::new()));

        let search = || {
            Request::builder()
                .method("POST")
                .uri("/search")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"query": "rust", "user_id": "u1"}"#))
                .unwrap()
        };
        let first = app.clone().oneshot(search()).await.unwrap();
        assert_ne!(first.status(), StatusCode::TOO_MANY_REQUESTS);
        let second = app.clone().oneshot(search()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let health = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);
    }
}
