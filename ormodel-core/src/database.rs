//! Connection source and session scopes
//!
//! `Database` wraps one `SqlitePool` shared by every session. A scope binds
//! a session into the task-local ambient slot for the duration of a
//! closure; nested scopes reuse the outer session instead of opening a
//! second connection.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::ambient::{self, SlotGuard};
use crate::config::{Settings, DEFAULT_MAX_CONNECTIONS};
use crate::error::{OrmError, Result};
use crate::schema::Schema;
use crate::session::Session;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled SQLite connection source. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    pool: SqlitePool,
    echo_sql: bool,
}

impl Database {
    /// Connect using `settings.database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the first connection
    /// fails.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        Self::connect_with(
            &settings.database_url,
            settings.max_connections,
            settings.echo_sql,
        )
        .await
    }

    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect_with(url, DEFAULT_MAX_CONNECTIONS, false).await
    }

    /// Connect with explicit pool size and statement echo.
    ///
    /// Every connection runs with foreign keys enforced, WAL journaling and
    /// a busy timeout, and the database file is created when missing.
    pub async fn connect_with(url: &str, max_connections: u32, echo_sql: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!(url, max_connections, "database pool ready");
        Ok(Self::from_pool(pool, echo_sql))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool, echo_sql: bool) -> Self {
        Self {
            inner: Arc::new(DatabaseInner { pool, echo_sql }),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    /// A detached session, not bound to the ambient slot. Its connection
    /// is acquired on first use.
    pub fn session(&self) -> Session {
        Session::new(self.inner.pool.clone(), self.inner.echo_sql)
    }

    /// A detached session with its connection already acquired.
    pub async fn open_session(&self) -> Result<Session> {
        Session::open(self.inner.pool.clone(), self.inner.echo_sql).await
    }

    /// Close every pooled connection. Sessions still open fail afterwards.
    pub async fn shutdown(&self) {
        self.inner.pool.close().await;
        info!("database pool closed");
    }

    /// Create every table and index of `schema` in dependency order.
    pub async fn create_all(&self, schema: &Schema) -> Result<()> {
        let mut tx = self.inner.pool.begin().await?;
        for stmt in schema.create_statements() {
            debug!(target: "ormodel::sql", "{}", stmt);
            sqlx::query(&stmt).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!(tables = schema.table_names().len(), "schema created");
        Ok(())
    }

    /// Drop every table of `schema`, dependents first.
    pub async fn drop_all(&self, schema: &Schema) -> Result<()> {
        let mut tx = self.inner.pool.begin().await?;
        for stmt in schema.drop_statements() {
            debug!(target: "ormodel::sql", "{}", stmt);
            sqlx::query(&stmt).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!(tables = schema.table_names().len(), "schema dropped");
        Ok(())
    }

    /// Run `f` inside a session scope.
    ///
    /// If the current task already has an active ambient session, `f` gets
    /// that session and the scope leaves its lifecycle alone. Otherwise a
    /// new session is opened and bound; on `Err` it is rolled back, and in
    /// every case it is closed and the previous ambient value restored.
    /// Nothing is committed.
    ///
    /// ```ignore
    /// let heroes = db.scope(|_| async { Hero::objects().all().await }).await?;
    /// ```
    pub async fn scope<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<OrmError>,
    {
        self.enter_scope(f, false).await
    }

    /// [`scope`](Self::scope) that also commits when it owns the session and
    /// the session is still active after `f` succeeds. A nested unit of work
    /// reusing an outer session never commits it.
    pub async fn unit_of_work<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<OrmError>,
    {
        self.enter_scope(f, true).await
    }

    async fn enter_scope<F, Fut, T, E>(&self, f: F, commit: bool) -> std::result::Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<OrmError>,
    {
        if let Some(current) = ambient::get() {
            if current.is_active() {
                debug!(session = %current.id(), "reusing ambient session");
                return f(current).await;
            }
        }

        let session = self.open_session().await.map_err(E::from)?;
        if ambient::is_available() {
            run_owned(session, f, commit).await
        } else {
            ambient::enter(run_owned(session, f, commit)).await
        }
    }
}

async fn run_owned<F, Fut, T, E>(session: Session, f: F, commit: bool) -> std::result::Result<T, E>
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<OrmError>,
{
    let guard = match SlotGuard::bind(session.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            session.close().await;
            return Err(E::from(e));
        }
    };
    debug!(session = %session.id(), "session scope entered");

    let mut result = f(session.clone()).await;

    if commit && result.is_ok() && session.is_active() {
        if let Err(e) = session.commit().await {
            result = Err(E::from(e));
        }
    }
    if result.is_err() {
        if let Err(e) = session.rollback().await {
            warn!(session = %session.id(), error = %e, "rollback on scope exit failed");
        }
    }
    session.close().await;
    drop(guard);

    debug!(session = %session.id(), "session scope exited");
    result
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool_size", &self.inner.pool.size())
            .field("echo_sql", &self.inner.echo_sql)
            .finish()
    }
}
