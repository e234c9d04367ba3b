//! Scrape handler

use axum::{extract::State, http::StatusCode, response::Response, Json};
use researchforge_common::{errors::Result, models::api::ResponseStatus};
use serde::Deserialize;
use validator::Validate;

use super::{envelope, validated};
use crate::AppState;

/// Scrape request
#[derive(Debug, Deserialize, Validate)]
pub struct ScrapeRequest {
    #[validate(url)]
    pub url: String,

    pub user_id: String,

    #[serde(default)]
    #[validate(length(max = 500))]
    pub selector_query: Option<String>,

    /// Seconds allowed for fetch and extraction
    #[serde(default = "default_timeout")]
    #[validate(range(min = 5, max = 30))]
    pub timeout: u64,
}

fn default_timeout() -> u64 { 15 }

/// Fetch, extract and summarize one page
pub async fn scrape(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Response> {
    let request = validated(request)?;
    let response = state
        .service
        .scrape(
            &request.url,
            &request.user_id,
            request.selector_query.as_deref(),
            request.timeout,
        )
        .await;
    Ok(envelope(
        response.status == ResponseStatus::Success,
        StatusCode::BAD_GATEWAY,
        response,
    ))
}

#[cfg(test)]
mod tests {
    use crate::test_support::router_with;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use researchforge_common::config::AppConfig;
    use researchforge_search::mock::MockSearchProvider;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn post(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/scrape")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_unreachable_page_is_error_envelope() {
        let app = router_with(AppConfig::default(), Arc::new(MockSearchProvider::new()));
        let response = app
            .oneshot(post(json!({"url": "https://example.com/unreachable", "user_id": "u1", "timeout": 5})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert!(!body["message"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let app = router_with(AppConfig::default(), Arc::new(MockSearchProvider::new()));
        let response = app
            .oneshot(post(json!({"url": "not a url", "user_id": "u1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
