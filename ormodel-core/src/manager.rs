//! Per-model manager: the Django-style verb surface
//!
//! A `Manager<M>` holds no state. Every verb looks up the ambient session
//! when it runs, so managers are usable from any scope without passing a
//! session around.

use std::marker::PhantomData;

use tracing::debug;

use crate::ambient;
use crate::error::{OrmError, Result};
use crate::expr::{Column, Expr, OrderBy};
use crate::model::Model;
use crate::query::Query;
use crate::schema::EntityDefinition;
use crate::value::{Fields, Value};

pub struct Manager<M> {
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Manager<M> {
    fn clone(&self) -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<M> Copy for Manager<M> {}

impl<M: Model> Default for Manager<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Manager<M> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }

    pub fn entity(&self) -> &'static EntityDefinition {
        M::entity()
    }

    /// Query over every row.
    pub fn query(&self) -> Query<M> {
        Query::new()
    }

    pub fn filter(&self, expr: impl Into<Expr>) -> Query<M> {
        self.query().filter(expr)
    }

    pub fn exclude(&self, expr: impl Into<Expr>) -> Query<M> {
        self.query().exclude(expr)
    }

    pub fn order_by(&self, key: impl Into<OrderBy>) -> Query<M> {
        self.query().order_by(key)
    }

    pub fn join<R: Model>(&self) -> Query<M> {
        self.query().join::<R>()
    }

    pub async fn all(&self) -> Result<Vec<M>> {
        self.query().all().await
    }

    pub async fn count(&self) -> Result<i64> {
        self.query().count().await
    }

    pub async fn first(&self) -> Result<Option<M>> {
        self.query().first().await
    }

    pub async fn exists(&self) -> Result<bool> {
        self.query().exists().await
    }

    /// Exactly one row matching `lookup`.
    pub async fn get(&self, lookup: impl Into<Expr>) -> Result<M> {
        self.query().get(lookup).await
    }

    /// Check names and types against the definition.
    fn validate(&self, fields: &Fields) -> Result<()> {
        let entity = M::entity();
        for (name, value) in fields.iter() {
            let def = entity
                .get_field(name)
                .ok_or_else(|| OrmError::unknown_field(entity.name(), name.as_str()))?;
            if !def.field_type.accepts(value) {
                return Err(OrmError::TypeMismatch {
                    entity: entity.name().to_owned(),
                    field: name.clone(),
                    expected: def.field_type.name(),
                    found: value.kind(),
                });
            }
        }
        Ok(())
    }

    /// Insert a new row and flush it immediately, so the returned instance
    /// carries its generated primary key.
    ///
    /// Declared defaults fill absent fields; a null primary key is left for
    /// the store to assign.
    pub async fn create(&self, fields: Fields) -> Result<M> {
        self.validate(&fields)?;
        let entity = M::entity();
        let mut values = fields;
        for def in entity.fields() {
            if let Some(default) = &def.default {
                if !values.contains(&def.name) {
                    values.insert(def.name.clone(), default.clone());
                }
            }
        }
        if values.get(entity.primary_key()).is_some_and(Value::is_null) {
            values.remove(entity.primary_key());
        }
        let session = ambient::current()?;
        let created = session.insert_model::<M>(values).await?;
        debug!(entity = entity.name(), key = %created.primary_key(), "created");
        Ok(created)
    }

    /// Fetch the row matching `lookup`, or create it from `lookup` merged
    /// with `defaults`. Returns the instance and whether it was created.
    ///
    /// Not atomic: a concurrent insert between the read and the write
    /// surfaces as the store's integrity error.
    pub async fn get_or_create(&self, lookup: Fields, defaults: Fields) -> Result<(M, bool)> {
        match self.get(&lookup).await {
            Ok(found) => Ok((found, false)),
            Err(e) if e.is_does_not_exist() => {
                let created = self.create(lookup.merged(&defaults)).await?;
                Ok((created, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the row matching `lookup` and assign every entry of
    /// `defaults`, or create it from both. Returns the instance and whether
    /// it was created.
    pub async fn update_or_create(&self, lookup: Fields, defaults: Fields) -> Result<(M, bool)> {
        match self.get(&lookup).await {
            Ok(found) => Ok((self.update(&found, defaults).await?, false)),
            Err(e) if e.is_does_not_exist() => {
                let created = self.create(lookup.merged(&defaults)).await?;
                Ok((created, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Assign `changes` to a stored instance and flush, returning the
    /// updated row. Changing the primary key is refused.
    pub async fn update(&self, instance: &M, changes: Fields) -> Result<M> {
        self.validate(&changes)?;
        let entity = M::entity();
        let key = self.persisted_key(instance)?;
        let session = ambient::current()?;
        let diff = changes.changed_from(&instance.values());
        if diff.contains(entity.primary_key()) {
            return Err(OrmError::PrimaryKeyChange {
                entity: entity.name().to_owned(),
                field: entity.primary_key().to_owned(),
            });
        }
        if diff.is_empty() {
            session.flush().await?;
            return Ok(instance.clone());
        }
        let updated = session.update_model::<M>(key, diff).await?;
        debug!(entity = entity.name(), key = %updated.primary_key(), "updated");
        Ok(updated)
    }

    /// Persist a mutated instance: inserts when it has no primary key,
    /// otherwise writes the fields changed since it was loaded.
    pub async fn save(&self, instance: &M) -> Result<M> {
        let key = instance.primary_key();
        if key.is_null() {
            return self.create(instance.values()).await;
        }
        let session = ambient::current()?;
        let changes = session.pending_changes(instance).await;
        if changes.is_empty() {
            session.flush().await?;
            return Ok(instance.clone());
        }
        self.validate(&changes)?;
        session.update_model::<M>(key, changes).await
    }

    /// Delete a stored instance and flush immediately.
    pub async fn delete(&self, instance: &M) -> Result<()> {
        let key = self.persisted_key(instance)?;
        let session = ambient::current()?;
        session.delete(instance).await?;
        session.flush().await?;
        debug!(entity = M::entity().name(), key = %key, "deleted");
        Ok(())
    }

    /// Rows of `R` on the other side of the relationship declared between
    /// the two tables, in either direction.
    pub async fn related<R: Model>(&self, instance: &M) -> Result<Vec<R>> {
        let this = M::entity();
        let other = R::entity();
        let values = instance.values();

        let (other_column, local_column) = if let Some(rel) = this.relationship_to(other.table()) {
            (rel.remote_column.as_str(), rel.local_column.as_str())
        } else if let Some(inv) = other.relationship_to(this.table()) {
            (inv.local_column.as_str(), inv.remote_column.as_str())
        } else {
            return Err(OrmError::NoRelationship {
                from: this.table().to_owned(),
                to: other.table().to_owned(),
            });
        };

        let value = values.get(local_column).cloned().unwrap_or_default();
        if value.is_null() {
            return Ok(Vec::new());
        }
        Query::<R>::new()
            .filter(Column::new(other_column).eq(value))
            .order_by(other.primary_key())
            .all()
            .await
    }

    fn persisted_key(&self, instance: &M) -> Result<Value> {
        let key = instance.primary_key();
        if key.is_null() {
            return Err(OrmError::NotPersisted {
                entity: M::entity().name().to_owned(),
            });
        }
        Ok(key)
    }
}
