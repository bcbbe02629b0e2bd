//! Shared fixtures: Team/Hero models on a throwaway SQLite file.

#![allow(dead_code)]

use once_cell::sync::Lazy;
use ormodel_core::prelude::*;
use ormodel_core::Schema;
use sqlx::FromRow;
use tempfile::TempDir;

pub static TEAM: Lazy<EntityDefinition> = Lazy::new(|| {
    EntityDefinition::new("Team", "team")
        .field(FieldDef::id("id"))
        .field(FieldDef::text("name").unique().index())
        .field(FieldDef::text("headquarters").default_value("Unknown"))
        .relationship(Relationship::one_to_many("heroes", "hero", "id", "team_id").back_populates("team"))
});

pub static HERO: Lazy<EntityDefinition> = Lazy::new(|| {
    EntityDefinition::new("Hero", "hero")
        .field(FieldDef::id("id"))
        .field(FieldDef::text("name").index())
        .field(FieldDef::text("secret_name"))
        .field(FieldDef::integer("age").nullable().index())
        .field(FieldDef::integer("team_id").nullable().references("team", "id"))
        .relationship(Relationship::many_to_one("team", "team", "team_id", "id").back_populates("heroes"))
});

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
    pub headquarters: String,
}

impl Model for Team {
    fn entity() -> &'static EntityDefinition {
        &TEAM
    }

    fn values(&self) -> Fields {
        fields! {
            id: self.id,
            name: self.name.as_str(),
            headquarters: self.headquarters.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Hero {
    pub id: Option<i64>,
    pub name: String,
    pub secret_name: String,
    pub age: Option<i64>,
    pub team_id: Option<i64>,
}

impl Model for Hero {
    fn entity() -> &'static EntityDefinition {
        &HERO
    }

    fn values(&self) -> Fields {
        fields! {
            id: self.id,
            name: self.name.as_str(),
            secret_name: self.secret_name.as_str(),
            age: self.age,
            team_id: self.team_id,
        }
    }
}

pub fn schema() -> Schema {
    Schema::builder()
        .register(&TEAM)
        .and_then(|b| b.register(&HERO))
        .and_then(|b| b.build())
        .expect("test schema is valid")
}

/// Database on a fresh temp file with the schema created. Keep the value
/// alive for the duration of the test; dropping it removes the file.
pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

impl TestDb {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let db = Database::connect_url(&url).await.expect("connect");
        db.create_all(&schema()).await.expect("create_all");
        Self { db, _dir: dir }
    }
}

pub fn hero(name: &str, secret_name: &str, age: Option<i64>) -> Fields {
    fields! { name: name, secret_name: secret_name, age: age }
}
