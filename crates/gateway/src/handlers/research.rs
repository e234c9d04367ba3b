//! Research handler

use axum::{extract::State, http::StatusCode, response::Response, Json};
use researchforge_common::{
    errors::Result,
    models::{api::ResponseStatus, ResearchDepth},
};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use super::{envelope, validated};
use crate::AppState;

/// Research request
#[derive(Debug, Deserialize, Validate)]
pub struct ResearchRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    #[serde(default)]
    pub depth: ResearchDepth,

    pub user_id: String,
}

/// Run the full research pipeline
pub async fn research(
    State(state): State<AppState>,
    Json(request): Json<ResearchRequest>,
) -> Result<Response> {
    let request = validated(request)?;
    info!(user_id = %request.user_id, depth = %request.depth, "Research request");

    let response = state
        .service
        .research(&request.query, request.depth, &request.user_id)
        .await;
    // Only input errors escape the pipeline
    Ok(envelope(
        response.status == ResponseStatus::Success,
        StatusCode::BAD_REQUEST,
        response,
    ))
}
