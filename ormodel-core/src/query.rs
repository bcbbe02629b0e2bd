//! Lazy, immutable query values
//!
//! Builders never touch the store; each returns a new `Query`. Terminal
//! verbs resolve the ambient session at call time.

use std::fmt;
use std::marker::PhantomData;

use crate::ambient;
use crate::error::{OrmError, Result};
use crate::expr::{Expr, OrderBy};
use crate::model::Model;
use crate::schema::EntityDefinition;
use crate::sql::{SelectPlan, Statement};

pub struct Query<M> {
    filters: Vec<Expr>,
    ordering: Vec<OrderBy>,
    joins: Vec<&'static EntityDefinition>,
    limit: Option<u64>,
    offset: Option<u64>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Query<M> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            ordering: self.ordering.clone(),
            joins: self.joins.clone(),
            limit: self.limit,
            offset: self.offset,
            _model: PhantomData,
        }
    }
}

impl<M: Model> Default for Query<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Query<M> {
    /// Every row of the table, unordered.
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            ordering: Vec::new(),
            joins: Vec::new(),
            limit: None,
            offset: None,
            _model: PhantomData,
        }
    }

    /// Narrow by `expr`, ANDed with existing predicates.
    pub fn filter(&self, expr: impl Into<Expr>) -> Self {
        let mut next = self.clone();
        next.filters.push(expr.into());
        next
    }

    /// Drop rows matching `expr`.
    pub fn exclude(&self, expr: impl Into<Expr>) -> Self {
        let mut next = self.clone();
        next.filters.push(!expr.into());
        next
    }

    /// Append an ordering key; earlier keys take precedence.
    pub fn order_by(&self, key: impl Into<OrderBy>) -> Self {
        let mut next = self.clone();
        next.ordering.push(key.into());
        next
    }

    /// Join `R` through the relationship declared between the two tables,
    /// making `R`'s columns usable in filters and ordering.
    pub fn join<R: Model>(&self) -> Self {
        let mut next = self.clone();
        let entity = R::entity();
        if !next.joins.iter().any(|j| j.table() == entity.table()) {
            next.joins.push(entity);
        }
        next
    }

    pub fn limit(&self, n: u64) -> Self {
        let mut next = self.clone();
        next.limit = Some(n);
        next
    }

    pub fn offset(&self, n: u64) -> Self {
        let mut next = self.clone();
        next.offset = Some(n);
        next
    }

    fn plan(&self) -> SelectPlan<'_> {
        SelectPlan {
            base: M::entity(),
            joins: &self.joins,
            filters: &self.filters,
            ordering: &self.ordering,
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// The SELECT this query would run.
    pub fn statement(&self) -> Result<Statement> {
        self.plan().select()
    }

    pub fn count_statement(&self) -> Result<Statement> {
        self.plan().count()
    }

    fn describe(&self) -> String {
        match self.filters.as_slice() {
            [] => "all rows".to_owned(),
            filters => filters
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }

    /// Materialize every matching row.
    pub async fn all(&self) -> Result<Vec<M>> {
        let stmt = self.statement()?;
        let session = ambient::current()?;
        session.fetch_models::<M>(&stmt).await
    }

    /// Number of matching rows, ignoring ordering and paging.
    pub async fn count(&self) -> Result<i64> {
        let stmt = self.count_statement()?;
        let session = ambient::current()?;
        session.fetch_count(&stmt).await
    }

    pub async fn first(&self) -> Result<Option<M>> {
        Ok(self.limit(1).all().await?.into_iter().next())
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.first().await?.is_some())
    }

    /// Exactly one row matching `lookup` within this query.
    ///
    /// # Errors
    ///
    /// `DoesNotExist` when nothing matches, `MultipleObjectsReturned` when
    /// more than one row does.
    pub async fn get(&self, lookup: impl Into<Expr>) -> Result<M> {
        let query = self.filter(lookup);
        let limit = query.limit.map_or(2, |n| n.min(2));
        let mut rows = query.limit(limit).all().await?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => Err(OrmError::does_not_exist(M::entity().name(), query.describe())),
            _ => Err(OrmError::multiple_objects(M::entity().name(), query.describe())),
        }
    }
}

impl<M: Model> fmt::Debug for Query<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &M::entity().name())
            .field("filters", &self.filters)
            .field("ordering", &self.ordering)
            .field("joins", &self.joins.iter().map(|j| j.table()).collect::<Vec<_>>())
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}
