//! Alternate field names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mapping alternate name → canonical field name.
///
/// Reads and writes through an alias behave exactly like reads and writes
/// through the canonical name; the canonical name stays addressable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasTable(HashMap<String, String>);

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias` as another name for `canonical`.
    pub fn with(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.insert(alias, canonical);
        self
    }

    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.0.insert(alias.into(), canonical.into());
    }

    /// Canonical name for `alias`, if it is one.
    pub fn get(&self, alias: &str) -> Option<&str> {
        self.0.get(alias).map(String::as_str)
    }

    /// `name` itself unless it is an alias.
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.get(name).unwrap_or(name)
    }

    /// Resolve every entry of a declared field list.
    pub fn resolve_all(&self, names: &[String]) -> Vec<String> {
        names.iter().map(|n| self.canonical(n).to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<HashMap<String, String>> for AliasTable {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<A: Into<String>, C: Into<String>> FromIterator<(A, C)> for AliasTable {
    fn from_iter<T: IntoIterator<Item = (A, C)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(a, c)| (a.into(), c.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_declared_fields() {
        let aliases = AliasTable::new().with("f", "foo").with("b", "bar");
        let declared = vec!["f".to_string(), "bar".to_string()];
        assert_eq!(aliases.resolve_all(&declared), vec!["foo", "bar"]);

        let declared = vec!["foo".to_string(), "bar".to_string()];
        assert_eq!(aliases.resolve_all(&declared), vec!["foo", "bar"]);
    }

    #[test]
    fn test_transparent_serde() {
        let aliases: AliasTable = serde_json::from_str(r#"{"price": "Price"}"#).unwrap();
        assert_eq!(aliases.get("price"), Some("Price"));
        assert_eq!(aliases.canonical("Other"), "Other");
        assert_eq!(aliases.len(), 1);
    }
}
