//! The `Model` trait implemented by every table type

use sqlx::sqlite::SqliteRow;
use sqlx::FromRow;

use crate::expr::Column;
use crate::manager::Manager;
use crate::schema::EntityDefinition;
use crate::value::{Fields, Value};

/// A row type backed by one registered table.
///
/// Implementors decode themselves with `sqlx::FromRow` and describe their
/// table through a `'static` [`EntityDefinition`], typically held in a
/// `once_cell::sync::Lazy`.
///
/// ```ignore
/// static TEAM: Lazy<EntityDefinition> = Lazy::new(|| {
///     EntityDefinition::new("Team", "team")
///         .field(FieldDef::id("id"))
///         .field(FieldDef::text("name").unique())
/// });
///
/// impl Model for Team {
///     fn entity() -> &'static EntityDefinition { &TEAM }
///     fn values(&self) -> Fields { fields! { id: self.id, name: self.name.as_str() } }
/// }
///
/// let team = Team::objects().create(fields! { name: "Preventers" }).await?;
/// ```
pub trait Model: for<'r> FromRow<'r, SqliteRow> + Clone + Send + Sync + Unpin + 'static {
    fn entity() -> &'static EntityDefinition;

    /// Every column value of this instance, primary key included.
    fn values(&self) -> Fields;

    fn objects() -> Manager<Self> {
        Manager::new()
    }

    /// Column of this table, qualified for use in joined queries.
    fn column(name: &str) -> Column {
        Column::qualified(Self::entity().table(), name)
    }

    /// Primary key value; `Null` for an instance not yet stored.
    fn primary_key(&self) -> Value {
        self.values()
            .remove(Self::entity().primary_key())
            .unwrap_or_default()
    }
}
