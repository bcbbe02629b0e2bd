//! Route handlers organized by resource

pub mod health;
pub mod heroes;
pub mod teams;

use ormodel_core::{Model, Query};
use serde::Deserialize;

/// Default page size when `limit` is absent
const DEFAULT_LIMIT: u64 = 100;

/// Larger requested pages are clamped to this
pub const MAX_LIMIT: u64 = 1000;

/// `?skip=&limit=` paging
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl PageParams {
    pub fn apply<M: Model>(&self, query: Query<M>) -> Query<M> {
        query
            .offset(self.skip.unwrap_or(0).min(i64::MAX as u64))
            .limit(self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormodel_core::{EntityDefinition, FieldDef, Fields};
    use once_cell::sync::Lazy;

    static ROW: Lazy<EntityDefinition> =
        Lazy::new(|| EntityDefinition::new("Row", "row").field(FieldDef::id("id")));

    #[derive(Debug, Clone, sqlx::FromRow)]
    struct Row {
        id: i64,
    }

    impl Model for Row {
        fn entity() -> &'static EntityDefinition {
            &ROW
        }

        fn values(&self) -> Fields {
            Fields::new().with("id", self.id)
        }
    }

    #[test]
    fn oversized_pages_are_clamped() {
        let page = PageParams {
            skip: Some(u64::MAX),
            limit: Some(u64::MAX),
        };
        let sql = page.apply(Row::objects().query()).statement().unwrap().sql;
        assert!(sql.ends_with(&format!("LIMIT {MAX_LIMIT} OFFSET {}", i64::MAX)));
    }

    #[test]
    fn default_page() {
        let sql = PageParams::default()
            .apply(Row::objects().query())
            .statement()
            .unwrap()
            .sql;
        assert!(sql.ends_with("LIMIT 100 OFFSET 0"));
    }
}
