//! One session per request
//!
//! Every request runs inside a unit of work: handlers reach the session
//! through the managers, and the session is committed afterwards if it is
//! still active. A session failure after the handler ran turns into a 500;
//! this layer always answers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ormodel_core::OrmError;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let result = state
        .db
        .unit_of_work(|session| async move {
            debug!(session = %session.id(), %method, %path, "request session acquired");
            Ok::<_, OrmError>(next.run(request).await)
        })
        .await;

    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "request unit of work failed");
            ApiError::Orm(e).into_response()
        }
    }
}
