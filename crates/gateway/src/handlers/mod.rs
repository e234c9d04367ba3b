//! API handlers module

pub mod chat;
pub mod health;
pub mod research;
pub mod scrape;
pub mod search;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use researchforge_common::errors::{AppError, Result};
use serde::Serialize;
use validator::Validate;

/// Run the request's validation rules, naming the first offending field
pub(crate) fn validated<T: Validate>(request: T) -> Result<T> {
    match request.validate() {
        Ok(()) => Ok(request),
        Err(errors) => {
            let field = errors.field_errors().keys().next().map(|f| f.to_string());
            Err(AppError::Validation {
                message: errors.to_string(),
                field,
            })
        }
    }
}

/// Render a service envelope; error envelopes get `failure` as their status
pub(crate) fn envelope<T: Serialize>(succeeded: bool, failure: StatusCode, body: T) -> Response {
    let status = if succeeded { StatusCode::OK } else { failure };
    (status, Json(body)).into_response()
}
