//! Team endpoints

use std::sync::Arc;

use axum::{
    extract::Query,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use ormodel_core::prelude::*;
use serde::Deserialize;

use super::PageParams;
use crate::error::ApiError;
use crate::models::Team;
use crate::state::AppState;

/// Create team request
#[derive(Debug, Deserialize)]
pub struct TeamCreate {
    pub name: String,
    pub headquarters: String,
}

/// POST /teams - create a team; an existing name is a conflict
async fn create_team(
    Json(req): Json<TeamCreate>,
) -> Result<(StatusCode, Json<Team>), ApiError> {
    let (team, created) = Team::objects()
        .get_or_create(
            fields! { name: req.name.as_str() },
            fields! { headquarters: req.headquarters.as_str() },
        )
        .await?;

    if !created {
        return Err(ApiError::Conflict {
            message: format!("Team with name '{}' already exists", req.name),
        });
    }
    Ok((StatusCode::CREATED, Json(team)))
}

/// GET /teams - list teams by id
async fn list_teams(Query(page): Query<PageParams>) -> Result<Json<Vec<Team>>, ApiError> {
    let teams = page.apply(Team::objects().order_by("id")).all().await?;
    Ok(Json(teams))
}

/// Team routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/teams", get(list_teams).post(create_team))
}
