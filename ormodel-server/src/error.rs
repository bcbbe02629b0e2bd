//! API error types with IntoResponse
//!
//! Errors are converted to JSON responses with appropriate status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ormodel_core::OrmError;
use serde_json::json;

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Request could not be applied (400)
    BadRequest { message: String },

    /// Resource not found (404)
    NotFound { message: String },

    /// Unique value already taken (409)
    Conflict { message: String },

    /// Unknown field or wrong value type (422)
    Unprocessable { message: String },

    /// Anything else from the ORM layer (500, logged)
    Orm(OrmError),
}

impl ApiError {
    /// Keep 404/409/422 classification, report everything else as a 400
    /// prefixed with `context`.
    pub fn bad_request(context: &'static str) -> impl FnOnce(OrmError) -> ApiError {
        move |e| match ApiError::from(e) {
            ApiError::Orm(e) => ApiError::BadRequest {
                message: format!("{context}: {e}"),
            },
            classified => classified,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest { message } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "bad_request",
                    "message": message
                }),
            ),
            Self::NotFound { message } => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "not_found",
                    "message": message
                }),
            ),
            Self::Conflict { message } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "conflict",
                    "message": message
                }),
            ),
            Self::Unprocessable { message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({
                    "error": "validation_error",
                    "message": message
                }),
            ),
            Self::Orm(e) => {
                // Log the actual error, return generic message
                tracing::error!("ORM error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "internal_error",
                        "message": "an internal error occurred"
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<OrmError> for ApiError {
    fn from(e: OrmError) -> Self {
        if e.is_does_not_exist() {
            Self::NotFound {
                message: e.to_string(),
            }
        } else if e.is_unique_violation() {
            Self::Conflict {
                message: e.to_string(),
            }
        } else if e.is_validation() {
            Self::Unprocessable {
                message: e.to_string(),
            }
        } else {
            Self::Orm(e)
        }
    }
}
