//! Hero endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use ormodel_core::prelude::*;
use serde::Deserialize;

use super::PageParams;
use crate::error::ApiError;
use crate::models::{Hero, Team};
use crate::state::AppState;

/// Create hero request
#[derive(Debug, Deserialize)]
pub struct HeroCreate {
    pub name: String,
    pub secret_name: String,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub team_id: Option<i64>,
}

impl HeroCreate {
    /// Only fields that were provided.
    fn into_fields(self) -> Fields {
        let mut fields = fields! {
            name: self.name,
            secret_name: self.secret_name,
        };
        if let Some(age) = self.age {
            fields.insert("age", age);
        }
        if let Some(team_id) = self.team_id {
            fields.insert("team_id", team_id);
        }
        fields
    }
}

/// Hero list filters
#[derive(Debug, Default, Deserialize)]
pub struct HeroFilters {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    /// Case-insensitive substring of the hero name
    pub name: Option<String>,
    pub min_age: Option<i64>,
    /// Exact team name, matched through a join
    pub team_name: Option<String>,
}

/// POST /heroes
async fn create_hero(
    Json(req): Json<HeroCreate>,
) -> Result<(StatusCode, Json<Hero>), ApiError> {
    let hero = Hero::objects()
        .create(req.into_fields())
        .await
        .map_err(ApiError::bad_request("Error creating hero"))?;
    Ok((StatusCode::CREATED, Json(hero)))
}

/// GET /heroes - filtered, ordered by id
async fn list_heroes(Query(filters): Query<HeroFilters>) -> Result<Json<Vec<Hero>>, ApiError> {
    let mut query = Hero::objects().query();
    if let Some(name) = filters.name.as_deref().filter(|n| !n.is_empty()) {
        query = query.filter(Hero::column("name").ilike(format!("%{name}%")));
    }
    if let Some(min_age) = filters.min_age {
        query = query.filter(Hero::column("age").ge(min_age));
    }
    if let Some(team_name) = filters.team_name.as_deref().filter(|n| !n.is_empty()) {
        query = query
            .join::<Team>()
            .filter(Team::column("name").eq(team_name));
    }

    let page = PageParams {
        skip: filters.skip,
        limit: filters.limit,
    };
    let heroes = page
        .apply(query.order_by(Hero::column("id")))
        .all()
        .await?;
    Ok(Json(heroes))
}

/// GET /heroes/{id}
async fn get_hero(Path(id): Path<i64>) -> Result<Json<Hero>, ApiError> {
    let hero = Hero::objects().get(col("id").eq(id)).await?;
    Ok(Json(hero))
}

/// PATCH /heroes/{id} - partial update with any subset of columns
async fn update_hero(
    Path(id): Path<i64>,
    Json(changes): Json<Fields>,
) -> Result<Json<Hero>, ApiError> {
    let hero = Hero::objects().get(col("id").eq(id)).await?;
    if changes.is_empty() {
        return Err(ApiError::BadRequest {
            message: "No update data provided".into(),
        });
    }

    let updated = Hero::objects()
        .update(&hero, changes)
        .await
        .map_err(ApiError::bad_request("Error updating hero"))?;
    Ok(Json(updated))
}

/// DELETE /heroes/{id}
async fn delete_hero(Path(id): Path<i64>) -> Result<StatusCode, ApiError> {
    let hero = Hero::objects().get(col("id").eq(id)).await?;
    Hero::objects()
        .delete(&hero)
        .await
        .map_err(ApiError::bad_request("Error deleting hero"))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Hero routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/heroes", get(list_heroes).post(create_hero))
        .route(
            "/heroes/{id}",
            get(get_hero).patch(update_hero).delete(delete_hero),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_payload_skips_unset_fields() {
        let req: HeroCreate =
            serde_json::from_str(r#"{"name": "Deadpond", "secret_name": "Dive Wilson"}"#).unwrap();
        let fields = req.into_fields();
        assert_eq!(fields.len(), 2);
        assert!(!fields.contains("age"));
    }
}
