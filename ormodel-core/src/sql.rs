//! SQL statement rendering for the SQLite backing store
//!
//! Every identifier comes from a registered definition and is quoted; every
//! value is bound as a `?` parameter.

use std::fmt;

use crate::error::{OrmError, Result};
use crate::expr::{Column, CompareOp, Expr, OrderBy};
use crate::schema::{quote, Cardinality, EntityDefinition};
use crate::value::{Fields, Value};

/// Rendered SQL plus its bound parameters, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Everything a SELECT needs
pub(crate) struct SelectPlan<'a> {
    pub base: &'a EntityDefinition,
    pub joins: &'a [&'static EntityDefinition],
    pub filters: &'a [Expr],
    pub ordering: &'a [OrderBy],
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

struct JoinClause {
    sql: String,
    fans_out: bool,
}

impl<'a> SelectPlan<'a> {
    fn resolve(&self, column: &Column) -> Result<String> {
        let entity = match column.table() {
            None => self.base,
            Some(t) if t == self.base.table() => self.base,
            Some(t) => self
                .joins
                .iter()
                .copied()
                .find(|j| j.table() == t)
                .ok_or_else(|| OrmError::MissingJoin {
                    table: self.base.table().to_owned(),
                    referenced: t.to_owned(),
                })?,
        };
        if !entity.has_field(column.name()) {
            return Err(OrmError::unknown_field(entity.name(), column.name()));
        }
        Ok(format!("{}.{}", quote(entity.table()), quote(column.name())))
    }

    fn join_clauses(&self) -> Result<Vec<JoinClause>> {
        let base = self.base;
        self.joins
            .iter()
            .map(|joined| {
                if let Some(rel) = base.relationship_to(joined.table()) {
                    return Ok(JoinClause {
                        sql: format!(
                            " JOIN {t} ON {t}.{r} = {b}.{l}",
                            t = quote(joined.table()),
                            r = quote(&rel.remote_column),
                            b = quote(base.table()),
                            l = quote(&rel.local_column),
                        ),
                        fans_out: rel.cardinality == Cardinality::OneToMany,
                    });
                }
                if let Some(inv) = joined.relationship_to(base.table()) {
                    return Ok(JoinClause {
                        sql: format!(
                            " JOIN {t} ON {t}.{l} = {b}.{r}",
                            t = quote(joined.table()),
                            l = quote(&inv.local_column),
                            b = quote(base.table()),
                            r = quote(&inv.remote_column),
                        ),
                        fans_out: inv.cardinality == Cardinality::ManyToOne,
                    });
                }
                Err(OrmError::NoRelationship {
                    from: base.table().to_owned(),
                    to: joined.table().to_owned(),
                })
            })
            .collect()
    }

    fn render_expr(&self, expr: &Expr, params: &mut Vec<Value>) -> Result<String> {
        Ok(match expr {
            Expr::Compare { column, op, value } => {
                let c = self.resolve(column)?;
                match (op, value) {
                    (CompareOp::Eq, Value::Null) => format!("{} IS NULL", c),
                    (CompareOp::Ne, Value::Null) => format!("{} IS NOT NULL", c),
                    _ => {
                        params.push(value.clone());
                        format!("{} {} ?", c, op.as_sql())
                    }
                }
            }
            Expr::IsNull { column, negated } => {
                let c = self.resolve(column)?;
                format!("{} IS {}NULL", c, if *negated { "NOT " } else { "" })
            }
            Expr::In { column, values } => {
                let c = self.resolve(column)?;
                if values.is_empty() {
                    "1 = 0".to_owned()
                } else {
                    params.extend(values.iter().cloned());
                    let marks = vec!["?"; values.len()].join(", ");
                    format!("{} IN ({})", c, marks)
                }
            }
            Expr::Like {
                column,
                pattern,
                case_insensitive,
            } => {
                let c = self.resolve(column)?;
                if *case_insensitive {
                    params.push(Value::Text(pattern.clone()));
                    format!("LOWER({}) LIKE LOWER(?)", c)
                } else {
                    // SQLite's LIKE ignores ASCII case; GLOB does not.
                    params.push(Value::Text(like_to_glob(pattern)));
                    format!("{} GLOB ?", c)
                }
            }
            Expr::And(items) => self.render_group(items, " AND ", "1 = 1", params)?,
            Expr::Or(items) => self.render_group(items, " OR ", "1 = 0", params)?,
            Expr::Not(inner) => format!("NOT ({})", self.render_expr(inner, params)?),
        })
    }

    fn render_group(
        &self,
        items: &[Expr],
        sep: &str,
        empty: &str,
        params: &mut Vec<Value>,
    ) -> Result<String> {
        if items.is_empty() {
            return Ok(empty.to_owned());
        }
        let parts = items
            .iter()
            .map(|e| self.render_expr(e, params).map(|s| format!("({})", s)))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(sep))
    }

    fn render_from_where(&self, params: &mut Vec<Value>) -> Result<(String, bool)> {
        let joins = self.join_clauses()?;
        let fans_out = joins.iter().any(|j| j.fans_out);
        let mut sql = format!(" FROM {}", quote(self.base.table()));
        for j in &joins {
            sql.push_str(&j.sql);
        }
        if !self.filters.is_empty() {
            let clauses = self
                .filters
                .iter()
                .map(|f| self.render_expr(f, params).map(|s| format!("({})", s)))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        Ok((sql, fans_out))
    }

    pub fn select(&self) -> Result<Statement> {
        let mut params = Vec::new();
        let (from_where, fans_out) = self.render_from_where(&mut params)?;
        let mut sql = format!(
            "SELECT {}{}.*{}",
            if fans_out { "DISTINCT " } else { "" },
            quote(self.base.table()),
            from_where
        );
        if !self.ordering.is_empty() {
            let keys = self
                .ordering
                .iter()
                .map(|o| {
                    self.resolve(&o.column)
                        .map(|c| format!("{} {}", c, if o.descending { "DESC" } else { "ASC" }))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        // SQLite takes signed 64-bit LIMIT/OFFSET
        let bound = |n: u64| n.min(i64::MAX as u64);
        match (self.limit.map(bound), self.offset.map(bound)) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }
        Ok(Statement { sql, params })
    }

    /// Count over the predicate set only; ordering and paging are ignored.
    pub fn count(&self) -> Result<Statement> {
        let mut params = Vec::new();
        let (from_where, fans_out) = self.render_from_where(&mut params)?;
        let counted = if fans_out {
            format!(
                "COUNT(DISTINCT {}.{})",
                quote(self.base.table()),
                quote(self.base.primary_key())
            )
        } else {
            "COUNT(*)".to_owned()
        };
        Ok(Statement {
            sql: format!("SELECT {}{}", counted, from_where),
            params,
        })
    }
}

pub(crate) fn insert(entity: &EntityDefinition, values: &Fields) -> Statement {
    if values.is_empty() {
        return Statement::new(format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING *",
            quote(entity.table())
        ));
    }
    let columns: Vec<String> = values.keys().map(quote).collect();
    let marks = vec!["?"; values.len()].join(", ");
    Statement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            quote(entity.table()),
            columns.join(", "),
            marks
        ),
        params: values.iter().map(|(_, v)| v.clone()).collect(),
    }
}

pub(crate) fn update(entity: &EntityDefinition, key: &Value, changes: &Fields) -> Statement {
    let assignments: Vec<String> = changes.keys().map(|k| format!("{} = ?", quote(k))).collect();
    let mut params: Vec<Value> = changes.iter().map(|(_, v)| v.clone()).collect();
    params.push(key.clone());
    Statement {
        sql: format!(
            "UPDATE {} SET {} WHERE {} = ? RETURNING *",
            quote(entity.table()),
            assignments.join(", "),
            quote(entity.primary_key())
        ),
        params,
    }
}

pub(crate) fn delete(entity: &EntityDefinition, key: &Value) -> Statement {
    Statement {
        sql: format!(
            "DELETE FROM {} WHERE {} = ?",
            quote(entity.table()),
            quote(entity.primary_key())
        ),
        params: vec![key.clone()],
    }
}

/// Translate a LIKE pattern into the equivalent GLOB pattern.
fn like_to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '%' => out.push('*'),
            '_' => out.push('?'),
            '*' => out.push_str("[*]"),
            '?' => out.push_str("[?]"),
            '[' => out.push_str("[[]"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::col;
    use crate::schema::{FieldDef, Relationship};
    use once_cell::sync::Lazy;

    static TEAM: Lazy<EntityDefinition> = Lazy::new(|| {
        EntityDefinition::new("Team", "team")
            .field(FieldDef::id("id"))
            .field(FieldDef::text("name").unique())
            .relationship(Relationship::one_to_many("heroes", "hero", "id", "team_id"))
    });

    static HERO: Lazy<EntityDefinition> = Lazy::new(|| {
        EntityDefinition::new("Hero", "hero")
            .field(FieldDef::id("id"))
            .field(FieldDef::text("name"))
            .field(FieldDef::integer("age").nullable())
            .field(FieldDef::integer("team_id").nullable().references("team", "id"))
            .relationship(Relationship::many_to_one("team", "team", "team_id", "id"))
    });

    fn plan<'a>(
        joins: &'a [&'static EntityDefinition],
        filters: &'a [Expr],
        ordering: &'a [OrderBy],
    ) -> SelectPlan<'a> {
        SelectPlan {
            base: &*HERO,
            joins,
            filters,
            ordering,
            limit: None,
            offset: None,
        }
    }

    #[test]
    fn select_with_filters_and_order() {
        let filters = [col("age").ge(18), col("name").eq("Deadpond")];
        let ordering = [OrderBy::from("-age")];
        let stmt = plan(&[], &filters, &ordering).select().unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"hero\".* FROM \"hero\" WHERE (\"hero\".\"age\" >= ?) AND (\"hero\".\"name\" = ?) ORDER BY \"hero\".\"age\" DESC"
        );
        assert_eq!(stmt.params, vec![Value::Integer(18), Value::from("Deadpond")]);
    }

    #[test]
    fn null_equality_is_is_null() {
        let filters = [col("team_id").eq(Value::Null)];
        let stmt = plan(&[], &filters, &[]).select().unwrap();
        assert!(stmt.sql.ends_with("WHERE (\"hero\".\"team_id\" IS NULL)"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn related_column_requires_join() {
        let filters = [Column::qualified("team", "name").eq("Preventers")];
        let err = plan(&[], &filters, &[]).select().unwrap_err();
        assert!(matches!(err, OrmError::MissingJoin { .. }));

        let joins: [&'static EntityDefinition; 1] = [&*TEAM];
        let stmt = plan(&joins, &filters, &[]).select().unwrap();
        assert!(stmt
            .sql
            .contains("JOIN \"team\" ON \"team\".\"id\" = \"hero\".\"team_id\""));
    }

    #[test]
    fn unknown_field_rejected() {
        let filters = [col("power").eq(1)];
        let err = plan(&[], &filters, &[]).count().unwrap_err();
        assert!(matches!(err, OrmError::UnknownField { .. }));
    }

    #[test]
    fn one_to_many_join_counts_distinct() {
        let joins: [&'static EntityDefinition; 1] = [&*HERO];
        let s = SelectPlan {
            base: &*TEAM,
            joins: &joins,
            filters: &[],
            ordering: &[],
            limit: Some(10),
            offset: Some(5),
        };
        assert!(s.select().unwrap().sql.starts_with("SELECT DISTINCT"));
        assert!(s.select().unwrap().sql.ends_with("LIMIT 10 OFFSET 5"));
        assert!(s.count().unwrap().sql.starts_with("SELECT COUNT(DISTINCT \"team\".\"id\")"));
    }

    #[test]
    fn insert_update_delete_shapes() {
        let values = Fields::new().with("name", "Rusty-Man").with("age", 48);
        let stmt = insert(&*HERO, &values);
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"hero\" (\"age\", \"name\") VALUES (?, ?) RETURNING *"
        );

        let stmt = update(&*HERO, &Value::Integer(3), &Fields::new().with("age", 49));
        assert_eq!(
            stmt.sql,
            "UPDATE \"hero\" SET \"age\" = ? WHERE \"id\" = ? RETURNING *"
        );
        assert_eq!(stmt.params, vec![Value::Integer(49), Value::Integer(3)]);

        assert_eq!(
            delete(&*HERO, &Value::Integer(3)).sql,
            "DELETE FROM \"hero\" WHERE \"id\" = ?"
        );
    }

    #[test]
    fn like_pattern_translation() {
        assert_eq!(like_to_glob("%man_"), "*man?");
        assert_eq!(like_to_glob("a*b"), "a[*]b");
    }
}
