//! Example models: teams and their heroes

use once_cell::sync::Lazy;
use ormodel_core::prelude::*;
use ormodel_core::{Result, Schema};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

static TEAM: Lazy<EntityDefinition> = Lazy::new(|| {
    EntityDefinition::new("Team", "team")
        .field(FieldDef::id("id"))
        .field(FieldDef::text("name").index().unique())
        .field(FieldDef::text("headquarters"))
        .relationship(
            Relationship::one_to_many("heroes", "hero", "id", "team_id").back_populates("team"),
        )
});

static HERO: Lazy<EntityDefinition> = Lazy::new(|| {
    EntityDefinition::new("Hero", "hero")
        .field(FieldDef::id("id"))
        .field(FieldDef::text("name").index())
        .field(FieldDef::text("secret_name"))
        .field(FieldDef::integer("age").nullable().index())
        .field(FieldDef::integer("team_id").nullable().references("team", "id"))
        .relationship(
            Relationship::many_to_one("team", "team", "team_id", "id").back_populates("heroes"),
        )
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
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

/// The example schema: `team` and `hero`.
pub fn schema() -> Result<Schema> {
    Schema::builder().register(&TEAM)?.register(&HERO)?.build()
}
