//! Chat handler

use axum::{extract::State, Json};
use researchforge_common::{errors::Result, models::api::ChatResponse};
use serde::Deserialize;
use validator::Validate;

use super::validated;
use crate::AppState;

/// Chat request
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    pub message: String,

    pub user_id: String,

    #[serde(default)]
    pub session_id: Option<String>,
}

/// One conversational turn; a new session is opened when none is given
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    let request = validated(request)?;
    let response = state
        .service
        .chat(&request.message, &request.user_id, request.session_id.as_deref())
        .await;
    Ok(Json(response))
}
