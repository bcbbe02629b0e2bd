mod common;

use common::Hero;
use ormodel_core::prelude::*;
use proptest::prelude::*;

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        ".{0,8}".prop_map(Value::Text),
    ]
}

fn arb_column() -> impl Strategy<Value = Column> {
    prop_oneof![
        Just(col("name")),
        Just(col("age")),
        Just(col("team_id")),
        Just(Hero::column("secret_name")),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        (arb_column(), arb_value()).prop_map(|(c, v)| c.eq(v)),
        (arb_column(), arb_value()).prop_map(|(c, v)| c.ne(v)),
        (arb_column(), any::<i64>()).prop_map(|(c, v)| c.ge(v)),
        (arb_column(), prop::collection::vec(arb_value(), 0..4)).prop_map(|(c, vs)| c.is_in(vs)),
        (arb_column(), "[a-z%_]{0,6}").prop_map(|(c, p)| c.like(p)),
        (arb_column(), "[a-z%_]{0,6}").prop_map(|(c, p)| c.ilike(p)),
        arb_column().prop_map(|c| c.is_null()),
    ]
}

fn arb_expr() -> impl Strategy<Value = Expr> {
    arb_leaf().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Expr::And),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Expr::Or),
            inner.prop_map(|e| !e),
        ]
    })
}

proptest! {
    /// Property: every bound value has exactly one placeholder
    #[test]
    fn prop_placeholders_match_params(filters in prop::collection::vec(arb_expr(), 0..4)) {
        let query = filters
            .into_iter()
            .fold(Hero::objects().query(), |q, f| q.filter(f));

        let select = query.statement().unwrap();
        prop_assert_eq!(select.sql.matches('?').count(), select.params.len());

        let count = query.count_statement().unwrap();
        prop_assert_eq!(count.sql.matches('?').count(), count.params.len());
    }

    /// Property: rendering never references a table that was not joined
    #[test]
    fn prop_rendered_tables_are_known(expr in arb_expr()) {
        let stmt = Hero::objects().filter(expr).statement().unwrap();
        prop_assert!(!stmt.sql.contains("\"team\""));
    }
}
