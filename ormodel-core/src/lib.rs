pub mod ambient;
pub mod config;
pub mod database;
pub mod error;
pub mod expr;
pub mod manager;
pub mod model;
pub mod query;
pub mod schema;
pub mod session;
pub mod sql;
pub mod value;

pub use config::Settings;
pub use database::Database;
pub use error::{OrmError, Result};
pub use expr::{col, Column, CompareOp, Expr, OrderBy};
pub use manager::Manager;
pub use model::Model;
pub use query::Query;
pub use schema::{
    Cardinality, EntityDefinition, FieldDef, FieldType, ForeignKey, Relationship, Schema,
    SchemaBuilder,
};
pub use session::Session;
pub use sql::Statement;
pub use value::{Fields, Value};

/// Everything a model module or handler usually needs.
pub mod prelude {
    pub use crate::expr::{col, Column, Expr, OrderBy};
    pub use crate::fields;
    pub use crate::schema::{EntityDefinition, FieldDef, Relationship};
    pub use crate::value::{Fields, Value};
    pub use crate::{Database, Manager, Model, OrmError, Query, Session};
}
