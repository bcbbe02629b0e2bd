//! Field values and field maps
//!
//! `Fields` stands in for keyword arguments: create payloads, lookups and
//! defaults are all name → `Value` maps.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single column value as the store sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// SQL literal form, used for DDL defaults.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_owned(),
            Self::Bool(b) => i64::from(*b).to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Real(r) => r.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Real(r) => write!(f, "{}", r),
            Self::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Ordered field-name → value map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Lookup overlaid with defaults; defaults win on collision.
    pub fn merged(&self, defaults: &Fields) -> Fields {
        let mut out = self.clone();
        for (k, v) in defaults.iter() {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    /// Entries of `self` whose value differs from (or is missing in) `current`.
    pub fn changed_from(&self, current: &Fields) -> Fields {
        Fields(
            self.0
                .iter()
                .filter(|(k, v)| current.get(k) != Some(*v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join(", "))
    }
}

impl IntoIterator for Fields {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Fields(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Build a [`Fields`] map with keyword-like syntax.
///
/// ```
/// use ormodel_core::fields;
///
/// let lookup = fields! { name: "Spider-Boy", age: 16 };
/// assert_eq!(lookup.len(), 2);
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        $crate::Fields::new()
    };
    ($($key:ident : $value:expr),+ $(,)?) => {
        $crate::Fields::new()$(.with(stringify!($key), $value))+
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3)), Value::Integer(3));
    }

    #[test]
    fn merged_prefers_defaults() {
        let lookup = Fields::new().with("name", "a").with("age", 1);
        let defaults = Fields::new().with("age", 2).with("team_id", 7);
        let merged = lookup.merged(&defaults);
        assert_eq!(merged.get("name"), Some(&Value::from("a")));
        assert_eq!(merged.get("age"), Some(&Value::Integer(2)));
        assert_eq!(merged.get("team_id"), Some(&Value::Integer(7)));
    }

    #[test]
    fn changed_from_skips_equal_values() {
        let current = Fields::new().with("age", 16).with("name", "x");
        let update = Fields::new().with("age", 17).with("name", "x");
        let changed = update.changed_from(&current);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed.get("age"), Some(&Value::Integer(17)));
    }

    #[test]
    fn macro_builds_fields() {
        let f = fields! { name: "Deadpond", age: 28 };
        assert_eq!(f.get("name"), Some(&Value::from("Deadpond")));
        assert!(fields! {}.is_empty());
    }

    #[test]
    fn deserializes_untagged_values() {
        let f: Fields = toml::from_str("age = 17\nname = \"Rusty-Man\"\nactive = true")
            .expect("valid toml");
        assert_eq!(f.get("age"), Some(&Value::Integer(17)));
        assert_eq!(f.get("name"), Some(&Value::from("Rusty-Man")));
        assert_eq!(f.get("active"), Some(&Value::Bool(true)));
    }

    #[test]
    fn text_literal_escapes_quotes() {
        assert_eq!(Value::from("O'Neil").to_sql_literal(), "'O''Neil'");
    }
}
