//! Unit-of-work sessions
//!
//! A session holds one pooled connection, a queue of pending writes and an
//! identity map with the last persisted values of every instance it loaded
//! or wrote. Reads run in autocommit; the first write opens a
//! `BEGIN IMMEDIATE` transaction, so a second writer waits on the busy
//! timeout instead of failing to upgrade a read lock.
//!
//! A failed flush rolls the transaction back and leaves the session
//! inactive; everything but `rollback()` and `close()` then fails with
//! `PendingRollback`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrmError, Result};
use crate::model::Model;
use crate::schema::EntityDefinition;
use crate::sql::{self, Statement};
use crate::value::{Fields, Value};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Handle to one unit of work. Clones share the same session; equality is
/// handle identity.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    pool: SqlitePool,
    echo_sql: bool,
    failed: AtomicBool,
    closed: AtomicBool,
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    conn: Option<PoolConnection<Sqlite>>,
    in_transaction: bool,
    pending: Vec<PendingWrite>,
    identity: HashMap<IdentityKey, Fields>,
}

impl SessionState {
    /// Close the connection instead of returning it to the pool.
    fn discard_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
        self.in_transaction = false;
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        // an open transaction never goes back to the pool
        if self.in_transaction {
            self.discard_connection();
        }
    }
}

/// (table, primary key)
type IdentityKey = (String, String);

fn identity_key(entity: &EntityDefinition, key: &Value) -> IdentityKey {
    (entity.table().to_owned(), key.to_string())
}

enum PendingWrite {
    Insert {
        entity: &'static EntityDefinition,
        values: Fields,
    },
    Update {
        entity: &'static EntityDefinition,
        key: Value,
        changes: Fields,
    },
    Delete {
        entity: &'static EntityDefinition,
        key: Value,
    },
}

fn bind_params<'q>(stmt: &'q Statement) -> SqliteQuery<'q> {
    stmt.params
        .iter()
        .fold(sqlx::query(&stmt.sql), |q, value| match value {
            Value::Null => q.bind(None::<i64>),
            Value::Bool(b) => q.bind(*b),
            Value::Integer(i) => q.bind(*i),
            Value::Real(r) => q.bind(*r),
            Value::Text(s) => q.bind(s.as_str()),
        })
}

impl Session {
    /// New session; the first statement acquires its connection.
    pub(crate) fn new(pool: SqlitePool, echo_sql: bool) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                pool,
                echo_sql,
                failed: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// New session with its connection already acquired, so connection
    /// failures surface here.
    pub(crate) async fn open(pool: SqlitePool, echo_sql: bool) -> Result<Self> {
        let session = Self::new(pool, echo_sql);
        {
            let mut state = session.inner.state.lock().await;
            session.connection(&mut state).await?;
        }
        debug!(session = %session.id(), "session opened");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Not closed and not waiting for a rollback after a failed flush.
    pub fn is_active(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst) && !self.inner.failed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(OrmError::SessionClosed);
        }
        if self.inner.failed.load(Ordering::SeqCst) {
            return Err(OrmError::PendingRollback);
        }
        Ok(())
    }

    async fn connection<'s>(&self, state: &'s mut SessionState) -> Result<&'s mut SqliteConnection> {
        if state.conn.is_none() {
            state.conn = Some(self.inner.pool.acquire().await?);
            debug!(session = %self.id(), "connection acquired");
        }
        state.conn.as_deref_mut().ok_or(OrmError::SessionClosed)
    }

    /// Take the write lock before the first write of a transaction.
    async fn begin_write(&self, state: &mut SessionState) -> Result<()> {
        if state.in_transaction {
            return Ok(());
        }
        self.connection(state).await?;
        state.in_transaction = true;
        let begun = match state.conn.as_deref_mut() {
            Some(conn) => sqlx::query("BEGIN IMMEDIATE").execute(conn).await,
            None => Err(sqlx::Error::PoolClosed),
        };
        if let Err(e) = begun {
            state.in_transaction = false;
            return Err(e.into());
        }
        debug!(session = %self.id(), "transaction begun");
        Ok(())
    }

    async fn commit_locked(&self, state: &mut SessionState) -> Result<()> {
        if !state.in_transaction {
            return Ok(());
        }
        let conn = state.conn.as_deref_mut().ok_or(OrmError::SessionClosed)?;
        sqlx::query("COMMIT").execute(conn).await?;
        state.in_transaction = false;
        debug!(session = %self.id(), "committed");
        Ok(())
    }

    async fn rollback_locked(&self, state: &mut SessionState) -> Result<()> {
        if !state.in_transaction {
            return Ok(());
        }
        let rolled_back = match state.conn.as_deref_mut() {
            Some(conn) => sqlx::query("ROLLBACK").execute(conn).await.map(|_| ()),
            None => Ok(()),
        };
        match rolled_back {
            Ok(()) => {
                state.in_transaction = false;
                debug!(session = %self.id(), "rolled back");
                Ok(())
            }
            Err(e) => {
                state.discard_connection();
                Err(e.into())
            }
        }
    }

    fn log_statement(&self, stmt: &Statement) {
        if self.inner.echo_sql {
            info!(target: "ormodel::sql", session = %self.id(), params = ?stmt.params, "{}", stmt.sql);
        } else {
            debug!(target: "ormodel::sql", session = %self.id(), params = ?stmt.params, "{}", stmt.sql);
        }
    }

    async fn fetch_all_locked(
        &self,
        state: &mut SessionState,
        stmt: &Statement,
    ) -> Result<Vec<SqliteRow>> {
        self.log_statement(stmt);
        let conn = self.connection(state).await?;
        Ok(bind_params(stmt).fetch_all(conn).await?)
    }

    async fn fetch_optional_locked(
        &self,
        state: &mut SessionState,
        stmt: &Statement,
    ) -> Result<Option<SqliteRow>> {
        self.log_statement(stmt);
        let conn = self.connection(state).await?;
        Ok(bind_params(stmt).fetch_optional(conn).await?)
    }

    /// Begin the write transaction if needed, then run a `RETURNING` write.
    async fn write_returning(
        &self,
        state: &mut SessionState,
        stmt: &Statement,
    ) -> Result<Option<SqliteRow>> {
        self.begin_write(state).await?;
        self.fetch_optional_locked(state, stmt).await
    }

    async fn execute_locked(&self, state: &mut SessionState, stmt: &Statement) -> Result<u64> {
        self.log_statement(stmt);
        let conn = self.connection(state).await?;
        Ok(bind_params(stmt).execute(conn).await?.rows_affected())
    }

    /// Roll back after a failed write and require an explicit rollback().
    async fn fail_locked(&self, state: &mut SessionState) {
        state.pending.clear();
        if let Err(e) = self.rollback_locked(state).await {
            warn!(session = %self.id(), error = %e, "rollback after failed flush also failed");
        }
        self.inner.failed.store(true, Ordering::SeqCst);
        debug!(session = %self.id(), "flush failed; session requires rollback");
    }

    async fn apply_pending(&self, state: &mut SessionState) -> Result<()> {
        let pending = std::mem::take(&mut state.pending);
        self.begin_write(state).await?;
        for write in pending {
            match write {
                PendingWrite::Insert { entity, values } => {
                    self.write_returning(state, &sql::insert(entity, &values))
                        .await?;
                }
                PendingWrite::Update {
                    entity,
                    key,
                    changes,
                } => {
                    let row = self
                        .write_returning(state, &sql::update(entity, &key, &changes))
                        .await?;
                    if row.is_none() {
                        return Err(OrmError::StaleData {
                            entity: entity.name().to_owned(),
                            key: key.to_string(),
                        });
                    }
                    let id = identity_key(entity, &key);
                    if let Some(snapshot) = state.identity.get(&id) {
                        let merged = snapshot.merged(&changes);
                        state.identity.insert(id, merged);
                    }
                }
                PendingWrite::Delete { entity, key } => {
                    let affected = self
                        .execute_locked(state, &sql::delete(entity, &key))
                        .await?;
                    if affected == 0 {
                        return Err(OrmError::StaleData {
                            entity: entity.name().to_owned(),
                            key: key.to_string(),
                        });
                    }
                    state.identity.remove(&identity_key(entity, &key));
                }
            }
        }
        Ok(())
    }

    async fn flush_locked(&self, state: &mut SessionState) -> Result<()> {
        if state.pending.is_empty() {
            return Ok(());
        }
        let count = state.pending.len();
        match self.apply_pending(state).await {
            Ok(()) => {
                debug!(session = %self.id(), writes = count, "flushed");
                Ok(())
            }
            Err(e) => {
                self.fail_locked(state).await;
                Err(e)
            }
        }
    }

    /// Apply pending writes without ending the transaction.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_usable()?;
        let mut state = self.inner.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// Flush, then commit the open transaction. The next write begins a
    /// new one.
    pub async fn commit(&self) -> Result<()> {
        self.ensure_usable()?;
        let mut state = self.inner.state.lock().await;
        self.flush_locked(&mut state).await?;
        if let Err(e) = self.commit_locked(&mut state).await {
            self.inner.failed.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Discard pending writes and the open transaction; reactivates a
    /// session left inactive by a failed flush.
    pub async fn rollback(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut state = self.inner.state.lock().await;
        state.pending.clear();
        state.identity.clear();
        self.inner.failed.store(false, Ordering::SeqCst);
        self.rollback_locked(&mut state).await
    }

    /// Roll back anything uncommitted and give the connection back.
    /// Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.inner.state.lock().await;
        state.pending.clear();
        state.identity.clear();
        if let Err(e) = self.rollback_locked(&mut state).await {
            warn!(session = %self.id(), error = %e, "rollback on close failed");
        }
        state.conn = None;
        debug!(session = %self.id(), "session closed");
    }

    /// Queue `instance` for writing at the next flush: an insert when it
    /// has no primary key, otherwise an update of the columns that differ
    /// from what this session last persisted.
    pub async fn add<M: Model>(&self, instance: &M) -> Result<()> {
        self.ensure_usable()?;
        let entity = M::entity();
        let mut values = instance.values();
        let key = values.remove(entity.primary_key()).unwrap_or_default();
        let mut state = self.inner.state.lock().await;
        if key.is_null() {
            state.pending.push(PendingWrite::Insert { entity, values });
            return Ok(());
        }
        let changes = Self::changes_locked(&state, entity, &key, values);
        if !changes.is_empty() {
            state.pending.push(PendingWrite::Update {
                entity,
                key,
                changes,
            });
        }
        Ok(())
    }

    /// Queue deletion of a stored instance.
    pub async fn delete<M: Model>(&self, instance: &M) -> Result<()> {
        self.ensure_usable()?;
        let entity = M::entity();
        let key = instance.primary_key();
        if key.is_null() {
            return Err(OrmError::NotPersisted {
                entity: entity.name().to_owned(),
            });
        }
        let mut state = self.inner.state.lock().await;
        state.pending.push(PendingWrite::Delete { entity, key });
        Ok(())
    }

    fn changes_locked(
        state: &SessionState,
        entity: &EntityDefinition,
        key: &Value,
        mut values: Fields,
    ) -> Fields {
        values.remove(entity.primary_key());
        match state.identity.get(&identity_key(entity, key)) {
            Some(snapshot) => values.changed_from(snapshot),
            None => values,
        }
    }

    /// Columns of `instance` that differ from the last persisted values;
    /// every column when the instance is not tracked.
    pub(crate) async fn pending_changes<M: Model>(&self, instance: &M) -> Fields {
        let state = self.inner.state.lock().await;
        Self::changes_locked(
            &state,
            M::entity(),
            &instance.primary_key(),
            instance.values(),
        )
    }

    fn track<M: Model>(state: &mut SessionState, model: &M) {
        state
            .identity
            .insert(identity_key(M::entity(), &model.primary_key()), model.values());
    }

    /// Autoflush, run a SELECT and decode the rows.
    pub(crate) async fn fetch_models<M: Model>(&self, stmt: &Statement) -> Result<Vec<M>> {
        self.ensure_usable()?;
        let mut state = self.inner.state.lock().await;
        self.flush_locked(&mut state).await?;
        let rows = self.fetch_all_locked(&mut state, stmt).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let model = M::from_row(row)?;
            Self::track(&mut state, &model);
            out.push(model);
        }
        Ok(out)
    }

    /// Autoflush, run a single-column COUNT.
    pub(crate) async fn fetch_count(&self, stmt: &Statement) -> Result<i64> {
        self.ensure_usable()?;
        let mut state = self.inner.state.lock().await;
        self.flush_locked(&mut state).await?;
        let row = self.fetch_optional_locked(&mut state, stmt).await?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>(0)?),
            None => Ok(0),
        }
    }

    /// Flush pending work and insert one row immediately.
    pub(crate) async fn insert_model<M: Model>(&self, values: Fields) -> Result<M> {
        self.ensure_usable()?;
        let mut state = self.inner.state.lock().await;
        self.flush_locked(&mut state).await?;
        let stmt = sql::insert(M::entity(), &values);
        let row = match self.write_returning(&mut state, &stmt).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.fail_locked(&mut state).await;
                return Err(sqlx::Error::RowNotFound.into());
            }
            Err(e) => {
                self.fail_locked(&mut state).await;
                return Err(e);
            }
        };
        let model = M::from_row(&row)?;
        Self::track(&mut state, &model);
        Ok(model)
    }

    /// Flush pending work and update one row immediately.
    pub(crate) async fn update_model<M: Model>(&self, key: Value, changes: Fields) -> Result<M> {
        self.ensure_usable()?;
        let entity = M::entity();
        let mut state = self.inner.state.lock().await;
        self.flush_locked(&mut state).await?;
        let stmt = sql::update(entity, &key, &changes);
        let row = match self.write_returning(&mut state, &stmt).await {
            Ok(Some(row)) => row,
            Ok(None) => {
                self.fail_locked(&mut state).await;
                return Err(OrmError::StaleData {
                    entity: entity.name().to_owned(),
                    key: key.to_string(),
                });
            }
            Err(e) => {
                self.fail_locked(&mut state).await;
                return Err(e);
            }
        };
        let model = M::from_row(&row)?;
        Self::track(&mut state, &model);
        Ok(model)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("closed", &self.is_closed())
            .finish()
    }
}
