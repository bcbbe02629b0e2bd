use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{middleware, Router};
use once_cell::sync::Lazy;
use ormodel_core::prelude::*;
use ormodel_core::Schema;
use ormodel_server::{session_middleware, ApiError, AppState};
use serde_json::Value as Json;
use sqlx::FromRow;
use tower::ServiceExt;

static LEAGUE: Lazy<EntityDefinition> = Lazy::new(|| {
    EntityDefinition::new("League", "league")
        .field(FieldDef::id("id"))
        .field(FieldDef::text("name"))
});

// foreign key checked only when the transaction commits
static PLEDGE: Lazy<EntityDefinition> = Lazy::new(|| {
    EntityDefinition::new("Pledge", "pledge")
        .field(FieldDef::id("id"))
        .field(FieldDef::integer("league_id").references("league", "id").deferred())
});

#[derive(Debug, Clone, FromRow)]
struct Pledge {
    id: Option<i64>,
    league_id: i64,
}

impl Model for Pledge {
    fn entity() -> &'static EntityDefinition {
        &PLEDGE
    }

    fn values(&self) -> Fields {
        fields! { id: self.id, league_id: self.league_id }
    }
}

async fn pledge_to(league_id: i64) -> Result<StatusCode, ApiError> {
    Pledge::objects().create(fields! { league_id: league_id }).await?;
    Ok(StatusCode::CREATED)
}

async fn app() -> (Router, Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("mw.db").display());
    let db = Database::connect_url(&url).await.unwrap();
    let schema = Schema::builder()
        .register(&LEAGUE)
        .and_then(|b| b.register(&PLEDGE))
        .and_then(|b| b.build())
        .unwrap();
    db.create_all(&schema).await.unwrap();

    let state = AppState::new(db.clone());
    let router = Router::new()
        .route("/orphan", post(|| pledge_to(999)))
        .layer(middleware::from_fn_with_state(state.clone(), session_middleware))
        .with_state(state);
    (router, db, dir)
}

#[tokio::test]
async fn commit_failure_becomes_500() {
    let (app, db, _dir) = app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/orphan")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "internal_error");

    let stored = db
        .scope(|_| async { Pledge::objects().count().await })
        .await
        .unwrap();
    assert_eq!(stored, 0);
}
