//! Web search and news handlers

use axum::{extract::State, http::StatusCode, response::Response, Json};
use researchforge_common::{errors::Result, models::api::ResponseStatus};
use serde::Deserialize;
use validator::Validate;

use super::{envelope, validated};
use crate::AppState;

/// Search request
#[derive(Debug, Deserialize, Validate)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    pub user_id: String,
}

/// News request
#[derive(Debug, Deserialize, Validate)]
pub struct NewsRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    #[serde(default = "default_days_back")]
    #[validate(range(min = 1, max = 30))]
    pub days_back: u32,

    #[serde(default = "default_max_results")]
    #[validate(range(min = 5, max = 50))]
    pub max_results: usize,

    pub user_id: String,
}

fn default_days_back() -> u32 { 7 }
fn default_max_results() -> usize { 10 }

/// Perform a web search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Response> {
    let request = validated(request)?;
    let response = state.service.search(&request.query, &request.user_id).await;
    Ok(envelope(!response.is_error(), StatusCode::BAD_GATEWAY, response))
}

/// Fetch recent news articles
pub async fn news(
    State(state): State<AppState>,
    Json(request): Json<NewsRequest>,
) -> Result<Response> {
    let request = validated(request)?;
    let response = state
        .service
        .news(
            &request.query,
            request.days_back,
            request.max_results,
            &request.user_id,
        )
        .await;
    Ok(envelope(
        response.status == ResponseStatus::Success,
        StatusCode::BAD_GATEWAY,
        response,
    ))
}
