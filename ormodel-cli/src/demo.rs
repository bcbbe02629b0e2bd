//! Standalone scenario: teams and heroes in one unit of work

use anyhow::{Context, Result};
use ormodel_core::prelude::*;
use ormodel_server::{schema, Hero, Team};
use tracing::info;

/// What the scenario observed, for printing.
#[derive(Debug)]
pub struct DemoSummary {
    pub teams: Vec<String>,
    pub heroes: Vec<String>,
    pub deadpond_age: Option<i64>,
    pub preventers_count: i64,
    pub spider_boy_age: Option<i64>,
}

const HEROES: [(&str, &str, i64, &str); 3] = [
    ("Deadpond", "Dive Wilson", 28, "Z-Force"),
    ("Spider-Boy", "Pedro Parqueador", 16, "Preventers"),
    ("Rusty-Man", "Tommy Sharp", 48, "Preventers"),
];

/// Recreate the example tables, then run the scenario and commit it.
pub async fn run(db: &Database) -> Result<DemoSummary> {
    let schema = schema().context("Invalid example schema")?;
    db.drop_all(&schema).await.context("Failed to drop tables")?;
    db.create_all(&schema).await.context("Failed to create tables")?;
    info!(tables = ?schema.table_names(), "schema ready");

    let summary = db
        .unit_of_work(|session| async move {
            let teams = Team::objects();
            let (preventers, _) = teams
                .update_or_create(
                    fields! { name: "Preventers" },
                    fields! { headquarters: "Sharp Tower" },
                )
                .await?;
            let (z_force, _) = teams
                .update_or_create(
                    fields! { name: "Z-Force" },
                    fields! { headquarters: "Sister Margaret's Bar" },
                )
                .await?;

            let heroes = Hero::objects();
            let mut names = Vec::new();
            for (name, secret_name, age, team) in HEROES {
                let team_id = if team == preventers.name {
                    preventers.id
                } else {
                    z_force.id
                };
                let (hero, created) = heroes
                    .update_or_create(
                        fields! { name: name, secret_name: secret_name },
                        fields! { age: age, team_id: team_id },
                    )
                    .await?;
                info!(hero = %hero.name, created, "hero stored");
                names.push(hero.name);
            }

            let deadpond = heroes.get(fields! { name: "Deadpond" }).await?;
            let preventers_count = heroes
                .filter(fields! { team_id: preventers.id })
                .count()
                .await?;

            // fetch, mutate, flush
            let mut spider_boy = heroes.get(fields! { name: "Spider-Boy" }).await?;
            spider_boy.age = Some(17);
            session.add(&spider_boy).await?;
            session.flush().await?;
            let spider_boy = heroes.get(col("id").eq(spider_boy.id)).await?;

            Ok::<_, OrmError>(DemoSummary {
                teams: vec![preventers.name, z_force.name],
                heroes: names,
                deadpond_age: deadpond.age,
                preventers_count,
                spider_boy_age: spider_boy.age,
            })
        })
        .await
        .context("Demo scenario failed")?;

    Ok(summary)
}
