//! Typed filter predicates and ordering keys
//!
//! A closed set of predicate variants built through `Column` methods and
//! combined with `&`, `|` and `!`.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use crate::value::{Fields, Value};

/// A column reference, optionally qualified with its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    table: Option<String>,
    name: String,
}

/// Unqualified column on the query's own table.
pub fn col(name: impl Into<String>) -> Column {
    Column::new(name)
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn compare(&self, op: CompareOp, value: impl Into<Value>) -> Expr {
        Expr::Compare {
            column: self.clone(),
            op,
            value: value.into(),
        }
    }

    /// Equality; comparing with `Null` means `IS NULL`.
    pub fn eq(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Ne, value)
    }

    pub fn lt(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Le, value)
    }

    pub fn gt(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Ge, value)
    }

    pub fn is_in<I, V>(&self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::In {
            column: self.clone(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn like(&self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            column: self.clone(),
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    pub fn ilike(&self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            column: self.clone(),
            pattern: pattern.into(),
            case_insensitive: true,
        }
    }

    pub fn is_null(&self) -> Expr {
        Expr::IsNull {
            column: self.clone(),
            negated: false,
        }
    }

    pub fn is_not_null(&self) -> Expr {
        Expr::IsNull {
            column: self.clone(),
            negated: true,
        }
    }

    pub fn asc(&self) -> OrderBy {
        OrderBy {
            column: self.clone(),
            descending: false,
        }
    }

    pub fn desc(&self) -> OrderBy {
        OrderBy {
            column: self.clone(),
            descending: true,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(t) => write!(f, "{}.{}", t, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Boolean filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        column: Column,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        column: Column,
        negated: bool,
    },
    In {
        column: Column,
        values: Vec<Value>,
    },
    Like {
        column: Column,
        pattern: String,
        case_insensitive: bool,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut items) => {
                items.push(other);
                Expr::And(items)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut items) => {
                items.push(other);
                Expr::Or(items)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    /// Columns referenced anywhere in the expression.
    pub fn columns(&self) -> Vec<&Column> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a Column>) {
        match self {
            Expr::Compare { column, .. }
            | Expr::IsNull { column, .. }
            | Expr::In { column, .. }
            | Expr::Like { column, .. } => out.push(column),
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_columns(out);
                }
            }
            Expr::Not(inner) => inner.collect_columns(out),
        }
    }
}

impl BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// Equality lookup on every entry, ANDed.
impl From<Fields> for Expr {
    fn from(fields: Fields) -> Self {
        Expr::And(
            fields
                .into_iter()
                .map(|(name, value)| Column::new(name).eq(value))
                .collect(),
        )
    }
}

impl From<&Fields> for Expr {
    fn from(fields: &Fields) -> Self {
        Expr::from(fields.clone())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Compare { column, op, value } => write!(f, "{} {} {}", column, op.as_sql(), value),
            Expr::IsNull { column, negated } => {
                write!(f, "{} IS {}NULL", column, if *negated { "NOT " } else { "" })
            }
            Expr::In { column, values } => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{} IN ({})", column, items.join(", "))
            }
            Expr::Like {
                column,
                pattern,
                case_insensitive,
            } => write!(
                f,
                "{} {} {:?}",
                column,
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                pattern
            ),
            Expr::And(items) => join_display(f, items, " AND "),
            Expr::Or(items) => join_display(f, items, " OR "),
            Expr::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn join_display(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
    write!(f, "{}", parts.join(sep))
}

/// One ordering key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: Column,
    pub descending: bool,
}

impl From<Column> for OrderBy {
    fn from(column: Column) -> Self {
        column.asc()
    }
}

/// `"age"` ascending, `"-age"` descending.
impl From<&str> for OrderBy {
    fn from(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(name) => Column::new(name).desc(),
            None => Column::new(key).asc(),
        }
    }
}
