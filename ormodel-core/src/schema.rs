//! Entity definitions and the schema registry
//!
//! Definitions are registered explicitly through [`SchemaBuilder`], which
//! checks cross-table references and hands back an immutable [`Schema`].
//! Nothing is registered as a side effect of declaring a model type.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{OrmError, Result};
use crate::value::Value;

/// Semantic column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl FieldType {
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Boolean => "boolean",
        }
    }

    /// Whether a value can be stored in a column of this type. Null is
    /// accepted here; nullability is the store's concern.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Real, Value::Real(_) | Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Bool(_) | Value::Integer(0 | 1)) => true,
            _ => false,
        }
    }
}

/// Target of a foreign key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    /// Checked at COMMIT instead of per statement.
    pub deferred: bool,
}

/// One column of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub primary_key: bool,
    pub unique: bool,
    pub index: bool,
    pub foreign_key: Option<ForeignKey>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            default: None,
            primary_key: false,
            unique: false,
            index: false,
            foreign_key: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn real(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Real)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// Integer primary key, generated by the store when omitted.
    pub fn id(name: impl Into<String>) -> Self {
        Self::integer(name).primary_key()
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
            deferred: false,
        });
        self
    }

    /// Make the foreign key `DEFERRABLE INITIALLY DEFERRED`. No effect
    /// without [`references`](Self::references).
    pub fn deferred(mut self) -> Self {
        if let Some(fk) = self.foreign_key.as_mut() {
            fk.deferred = true;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ManyToOne,
    OneToMany,
}

/// Named link to another entity.
///
/// Rows are related when `target.remote_column = self.local_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub local_column: String,
    pub remote_column: String,
    pub back_populates: Option<String>,
}

impl Relationship {
    /// `hero.team`: local foreign key column pointing at the target's key.
    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ManyToOne,
            local_column: foreign_key.into(),
            remote_column: target_key.into(),
            back_populates: None,
        }
    }

    /// `team.heroes`: the target holds a foreign key to our key.
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        target_foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::OneToMany,
            local_column: local_key.into(),
            remote_column: target_foreign_key.into(),
            back_populates: None,
        }
    }

    pub fn back_populates(mut self, name: impl Into<String>) -> Self {
        self.back_populates = Some(name.into());
        self
    }
}

/// Static description of one table
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDefinition {
    name: String,
    table: String,
    fields: Vec<FieldDef>,
    relationships: Vec<Relationship>,
}

impl EntityDefinition {
    /// `name` is the type name used in error messages; `table` the store name.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// Primary key column name; falls back to `id` when none is flagged.
    pub fn primary_key(&self) -> &str {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .unwrap_or("id")
    }

    pub fn relationship_to(&self, target_table: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.target == target_table)
    }

    pub fn get_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Tables this one depends on through foreign keys.
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.fields
            .iter()
            .filter_map(|f| f.foreign_key.as_ref())
            .map(|fk| fk.table.as_str())
            .filter(|t| *t != self.table)
            .collect()
    }

    /// `CREATE TABLE` followed by its index statements.
    pub fn create_statements(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.fields.len());
        for f in &self.fields {
            let mut col = format!("{} {}", quote(&f.name), f.field_type.sql_type());
            if f.primary_key {
                col.push_str(" PRIMARY KEY");
            } else if !f.nullable {
                col.push_str(" NOT NULL");
            }
            if f.unique && !f.primary_key {
                col.push_str(" UNIQUE");
            }
            if let Some(default) = &f.default {
                col.push_str(&format!(" DEFAULT {}", default.to_sql_literal()));
            }
            if let Some(fk) = &f.foreign_key {
                col.push_str(&format!(" REFERENCES {} ({})", quote(&fk.table), quote(&fk.column)));
                if fk.deferred {
                    col.push_str(" DEFERRABLE INITIALLY DEFERRED");
                }
            }
            columns.push(col);
        }

        let mut out = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(&self.table),
            columns.join(",\n    ")
        )];
        for f in self.fields.iter().filter(|f| f.index && !f.primary_key) {
            out.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("ix_{}_{}", self.table, f.name)),
                quote(&self.table),
                quote(&f.name)
            ));
        }
        out
    }

    pub fn drop_statement(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote(&self.table))
    }
}

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Collects entity definitions before the schema is frozen
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: BTreeMap<String, EntityDefinition>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition keyed by table name. Re-registering an identical
    /// definition is a no-op.
    pub fn register(mut self, entity: &EntityDefinition) -> Result<Self> {
        match self.tables.get(entity.table()) {
            Some(existing) if existing == entity => {}
            Some(_) => {
                return Err(OrmError::DuplicateTable {
                    table: entity.table().to_owned(),
                })
            }
            None => {
                self.tables.insert(entity.table().to_owned(), entity.clone());
            }
        }
        Ok(self)
    }

    /// Freeze the registry after checking every cross-table reference.
    pub fn build(self) -> Result<Schema> {
        for entity in self.tables.values() {
            for f in &entity.fields {
                if let Some(fk) = &f.foreign_key {
                    let target = self
                        .tables
                        .get(&fk.table)
                        .ok_or_else(|| OrmError::unresolved(entity.table(), &fk.table))?;
                    if !target.has_field(&fk.column) {
                        return Err(OrmError::unresolved(
                            entity.table(),
                            format!("{}.{}", fk.table, fk.column),
                        ));
                    }
                }
            }
            for rel in &entity.relationships {
                let target = self
                    .tables
                    .get(&rel.target)
                    .ok_or_else(|| OrmError::unresolved(entity.table(), &rel.target))?;
                if !entity.has_field(&rel.local_column) || !target.has_field(&rel.remote_column) {
                    return Err(OrmError::unresolved(
                        entity.table(),
                        format!("{}.{}", rel.target, rel.remote_column),
                    ));
                }
                if let Some(inverse) = &rel.back_populates {
                    let points_back = target
                        .get_relationship(inverse)
                        .is_some_and(|r| r.target == entity.table());
                    if !points_back {
                        return Err(OrmError::unresolved(
                            entity.table(),
                            format!("{}.{}", rel.target, inverse),
                        ));
                    }
                }
            }
        }
        tracing::debug!(tables = ?self.tables.keys().collect::<Vec<_>>(), "schema registry built");
        Ok(Schema {
            tables: Arc::new(self.tables),
        })
    }
}

/// Immutable snapshot of all registered tables
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Arc<BTreeMap<String, EntityDefinition>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn all_tables(&self) -> &BTreeMap<String, EntityDefinition> {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&EntityDefinition> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Tables ordered so referenced tables come before referencing ones.
    /// Cyclic leftovers are appended in name order.
    pub fn creation_order(&self) -> Vec<&EntityDefinition> {
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.tables.len());

        loop {
            let ready: Vec<&EntityDefinition> = self
                .tables
                .values()
                .filter(|e| !placed.contains(e.table()))
                .filter(|e| e.dependencies().iter().all(|d| placed.contains(d)))
                .collect();
            if ready.is_empty() {
                break;
            }
            for e in ready {
                placed.insert(e.table());
                order.push(e);
            }
        }

        order.extend(self.tables.values().filter(|e| !placed.contains(e.table())));
        order
    }

    pub fn create_statements(&self) -> Vec<String> {
        self.creation_order()
            .into_iter()
            .flat_map(EntityDefinition::create_statements)
            .collect()
    }

    pub fn drop_statements(&self) -> Vec<String> {
        self.creation_order()
            .into_iter()
            .rev()
            .map(EntityDefinition::drop_statement)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team() -> EntityDefinition {
        EntityDefinition::new("Team", "team")
            .field(FieldDef::id("id"))
            .field(FieldDef::text("name").unique().index())
            .field(FieldDef::text("headquarters"))
            .relationship(Relationship::one_to_many("heroes", "hero", "id", "team_id").back_populates("team"))
    }

    fn hero() -> EntityDefinition {
        EntityDefinition::new("Hero", "hero")
            .field(FieldDef::id("id"))
            .field(FieldDef::text("name").index())
            .field(FieldDef::integer("team_id").nullable().references("team", "id"))
            .relationship(Relationship::many_to_one("team", "team", "team_id", "id").back_populates("heroes"))
    }

    #[test]
    fn identical_redefinition_is_tolerated() {
        let schema = Schema::builder()
            .register(&team())
            .and_then(|b| b.register(&team()))
            .and_then(|b| b.register(&hero()))
            .and_then(SchemaBuilder::build)
            .unwrap();
        assert_eq!(schema.table_names(), vec!["hero", "team"]);
    }

    #[test]
    fn conflicting_redefinition_fails() {
        let other = EntityDefinition::new("Team", "team").field(FieldDef::id("id"));
        let err = Schema::builder()
            .register(&team())
            .and_then(|b| b.register(&other))
            .unwrap_err();
        assert!(matches!(err, OrmError::DuplicateTable { ref table } if table == "team"));
    }

    #[test]
    fn missing_reference_detected_at_build() {
        let err = Schema::builder()
            .register(&hero())
            .and_then(SchemaBuilder::build)
            .unwrap_err();
        assert!(matches!(err, OrmError::UnresolvedReference { .. }));
    }

    #[test]
    fn referenced_tables_created_first() {
        let schema = Schema::builder()
            .register(&hero())
            .and_then(|b| b.register(&team()))
            .and_then(SchemaBuilder::build)
            .unwrap();
        let order: Vec<&str> = schema.creation_order().iter().map(|e| e.table()).collect();
        assert_eq!(order, vec!["team", "hero"]);

        let drops = schema.drop_statements();
        assert_eq!(drops[0], "DROP TABLE IF EXISTS \"hero\"");
    }

    #[test]
    fn ddl_carries_constraints() {
        let stmts = team().create_statements();
        assert!(stmts[0].contains("\"id\" INTEGER PRIMARY KEY"));
        assert!(stmts[0].contains("\"name\" TEXT NOT NULL UNIQUE"));
        assert_eq!(
            stmts[1],
            "CREATE INDEX IF NOT EXISTS \"ix_team_name\" ON \"team\" (\"name\")"
        );
        let hero_ddl = hero().create_statements();
        assert!(hero_ddl[0].contains("\"team_id\" INTEGER REFERENCES \"team\" (\"id\")"));
        assert!(!hero_ddl[0].contains("DEFERRABLE"));
    }

    #[test]
    fn deferred_foreign_key_ddl() {
        let field = FieldDef::integer("team_id").references("team", "id").deferred();
        let entity = EntityDefinition::new("Member", "member")
            .field(FieldDef::id("id"))
            .field(field);
        assert!(entity.create_statements()[0]
            .contains("REFERENCES \"team\" (\"id\") DEFERRABLE INITIALLY DEFERRED"));
        assert!(!FieldDef::integer("x").deferred().foreign_key.is_some());
    }

    #[test]
    fn field_type_acceptance() {
        assert!(FieldType::Integer.accepts(&Value::Integer(1)));
        assert!(FieldType::Real.accepts(&Value::Integer(1)));
        assert!(!FieldType::Integer.accepts(&Value::from("1")));
        assert!(FieldType::Text.accepts(&Value::Null));
    }
}
