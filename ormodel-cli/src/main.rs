//! ormodel CLI
//!
//! - `schema`: print the DDL of the example schema (for migration tooling)
//! - `init-db`: create the example tables on the migration database
//! - `demo`: run the standalone Team/Hero scenario
//! - `serve`: run the example HTTP API

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ormodel_core::{Database, Settings};
use ormodel_server::{run_server, schema, ServerConfig};
use tracing::info;

mod demo;
mod tracing_setup;

use tracing_setup::TracingConfig;

#[derive(Parser, Debug)]
#[command(
    name = "ormodel",
    author,
    version,
    about = "Active-record managers over task-scoped SQLite sessions"
)]
struct Cli {
    /// Enable debug logging (includes every SQL statement)
    #[arg(long, global = true)]
    debug: bool,

    /// Database URL (overrides settings)
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log every SQL statement at info level
    #[arg(long, global = true)]
    echo_sql: bool,

    /// TOML settings file instead of environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print CREATE statements for the example schema
    Schema,

    /// Create the example tables
    InitDb {
        /// Drop existing tables first
        #[arg(long)]
        drop: bool,
    },

    /// Run the standalone scenario against a fresh schema
    Demo,

    /// Serve the example Team/Hero API
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: IpAddr,

        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,

        /// Allow any CORS origin
        #[arg(long)]
        cors_permissive: bool,
    },
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_file(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => Settings::from_env().context("Failed to load settings from environment")?,
        };
        if let Some(url) = &self.database_url {
            if settings.migration_database_url == settings.database_url {
                settings.migration_database_url = url.clone();
            }
            settings.database_url = url.clone();
        }
        if self.echo_sql {
            settings.echo_sql = true;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    ormodel_core::config::load_dotenv();
    let cli = Cli::parse();
    tracing_setup::init(&TracingConfig { debug: cli.debug })?;

    match &cli.command {
        Commands::Schema => {
            let schema = schema().context("Invalid example schema")?;
            println!("-- tables: {}", schema.table_names().join(", "));
            for stmt in schema.create_statements() {
                println!("{stmt};\n");
            }
        }
        Commands::InitDb { drop } => {
            let settings = cli.settings()?;
            let schema = schema().context("Invalid example schema")?;
            let db = Database::connect_with(
                &settings.migration_database_url,
                settings.max_connections,
                settings.echo_sql,
            )
            .await
            .with_context(|| format!("Failed to connect to {}", settings.migration_database_url))?;
            if *drop {
                db.drop_all(&schema).await.context("Failed to drop tables")?;
            }
            db.create_all(&schema).await.context("Failed to create tables")?;
            db.shutdown().await;
            println!("Created tables: {}", schema.table_names().join(", "));
        }
        Commands::Demo => {
            let settings = cli.settings()?;
            let db = Database::connect(&settings)
                .await
                .with_context(|| format!("Failed to connect to {}", settings.database_url))?;
            let summary = demo::run(&db).await?;
            db.shutdown().await;

            println!("Teams: {}", summary.teams.join(", "));
            println!("Heroes: {}", summary.heroes.join(", "));
            match summary.deadpond_age {
                Some(age) => println!("Deadpond age: {age}"),
                None => println!("Deadpond age: unknown"),
            }
            println!("Preventers count: {}", summary.preventers_count);
            match summary.spider_boy_age {
                Some(age) => println!("Spider-Boy age after update: {age}"),
                None => println!("Spider-Boy age after update: unknown"),
            }
        }
        Commands::Serve {
            host,
            port,
            cors_permissive,
        } => {
            let settings = cli.settings()?;
            let db = Database::connect(&settings)
                .await
                .with_context(|| format!("Failed to connect to {}", settings.database_url))?;
            let config = ServerConfig {
                bind_addr: SocketAddr::new(*host, *port),
                cors_permissive: *cors_permissive,
            };
            info!(addr = %config.bind_addr, "starting server");
            run_server(db, config).await.context("Server failed")?;
        }
    }

    Ok(())
}
