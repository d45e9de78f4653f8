//! The mutable record handed to controllers.
//!
//! A [`Row`] holds the current field values of one decoded record next to
//! an immutable snapshot of the values it was decoded with (its *origin*).
//! Change detection is a structural comparison of the two, so setting a
//! field back to its original value makes the row unchanged again.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::alias::AliasTable;
use crate::error::{PipelineResult, RowError, RowResult};
use crate::join::JoinRegistry;

/// Field name → value mapping of one record.
pub type Fields = Map<String, Value>;

/// One record's current values plus its decode-time snapshot.
#[derive(Clone)]
pub struct Row {
    fields: Fields,
    origin: Fields,
    aliases: Arc<AliasTable>,
    joins: JoinRegistry,
    source_id: Option<Arc<str>>,
}

impl Row {
    /// A row without aliases, joins or source label.
    pub fn new(fields: Fields) -> Self {
        Self::with_context(fields, Arc::new(AliasTable::new()), JoinRegistry::new(), None)
    }

    pub fn with_context(
        fields: Fields,
        aliases: Arc<AliasTable>,
        joins: JoinRegistry,
        source_id: Option<Arc<str>>,
    ) -> Self {
        Self {
            origin: fields.clone(),
            fields,
            aliases,
            joins,
            source_id,
        }
    }

    /// Value of `key`, resolved through the alias table.
    pub fn get(&self, key: &str) -> RowResult<&Value> {
        self.resolve(key)
            .and_then(|name| self.fields.get(name))
            .ok_or_else(|| RowError::UnknownField {
                field: key.to_string(),
                source_id: self.source_id.as_deref().map(str::to_string),
            })
    }

    /// Set `key` (or the field it aliases); unknown names create a new field.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let name = if self.fields.contains_key(key) {
            key
        } else {
            self.aliases.get(key).unwrap_or(key)
        };
        self.fields.insert(name.to_string(), value.into());
    }

    /// Whether `key` resolves to an existing field.
    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    fn resolve<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        if self.fields.contains_key(key) {
            return Some(key);
        }
        self.aliases
            .get(key)
            .filter(|canonical| self.fields.contains_key(*canonical))
    }

    pub fn is_changed(&self) -> bool {
        self.fields != self.origin
    }

    /// Names of fields whose value differs from origin, then new fields.
    pub fn changed_fields(&self) -> Vec<&str> {
        let mut changed: Vec<&str> = self
            .origin
            .iter()
            .filter(|(name, value)| self.fields.get(name.as_str()) != Some(*value))
            .map(|(name, _)| name.as_str())
            .collect();
        changed.extend(
            self.fields
                .keys()
                .filter(|name| !self.origin.contains_key(name.as_str()))
                .map(String::as_str),
        );
        changed
    }

    /// Values as decoded, before any controller changes.
    pub fn origin(&self) -> &Fields {
        &self.origin
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn has_join(&self, name: &str) -> bool {
        self.joins.contains(name)
    }

    /// Row of join `name` matching this row, or `None` when nothing matches.
    pub fn join(&self, name: &str) -> PipelineResult<Option<Row>> {
        let source = self
            .joins
            .get(name)
            .ok_or_else(|| RowError::UnknownJoin(name.to_string()))?;
        let joined = source.borrow_mut().auto_join(self)?;
        Ok(joined)
    }

    /// Single field of the joined row, resolved through that row's aliases.
    pub fn join_field(&self, name: &str, field: &str) -> PipelineResult<Option<Value>> {
        match self.join(name)? {
            Some(joined) => Ok(Some(joined.get(field)?.clone())),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row")
            .field("source", &self.source_id)
            .field("fields", &self.fields)
            .field("changed", &self.is_changed())
            .field("joins", &self.joins)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JoinCatalog, JoinSpec, SourceConfig};
    use crate::join::JoinSet;
    use crate::parser::Location;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn sample() -> Row {
        Row::with_context(
            fields(json!({"foo": "bar", "bar": "foo"})),
            Arc::new(AliasTable::new().with("test", "bar")),
            JoinRegistry::new(),
            Some(Arc::from("main")),
        )
    }

    #[test]
    fn test_get_resolves_aliases() {
        let row = sample();
        assert_eq!(row.get("foo").unwrap(), "bar");
        assert_eq!(row.get("bar").unwrap(), "foo");
        assert_eq!(row.get("test").unwrap(), row.get("bar").unwrap());
    }

    #[test]
    fn test_unknown_field_names_key_and_source() {
        let row = sample();
        assert_eq!(
            row.get("nonexistent").unwrap_err(),
            RowError::UnknownField {
                field: "nonexistent".into(),
                source_id: Some("main".into()),
            }
        );
    }

    #[test]
    fn test_alias_to_missing_field_is_unknown() {
        let row = Row::with_context(
            fields(json!({"a": 1})),
            Arc::new(AliasTable::new().with("x", "missing")),
            JoinRegistry::new(),
            None,
        );
        assert!(row.get("x").is_err());
        assert!(!row.contains("x"));
    }

    #[test]
    fn test_is_changed_round_trip() {
        let mut row = sample();
        assert!(!row.is_changed());

        row.set("foo", "bar");
        assert!(!row.is_changed());

        row.set("foo", "something else");
        assert!(row.is_changed());
        assert_eq!(row.changed_fields(), vec!["foo"]);

        row.set("foo", "bar");
        assert!(!row.is_changed());
    }

    #[test]
    fn test_set_through_alias_matches_canonical() {
        let mut via_alias = sample();
        let mut via_canonical = sample();
        via_alias.set("test", 42);
        via_canonical.set("bar", 42);

        assert_eq!(via_alias.fields(), via_canonical.fields());
        assert!(!via_alias.fields().contains_key("test"));
    }

    #[test]
    fn test_set_new_field_marks_changed() {
        let mut row = sample();
        row.set("Dispatch", 1);
        assert!(row.is_changed());
        assert_eq!(row.changed_fields(), vec!["Dispatch"]);
        assert_eq!(row.origin().get("Dispatch"), None);
    }

    #[test]
    fn test_origin_is_snapshot() {
        let mut row = sample();
        row.set("foo", "changed");
        assert_eq!(row.origin()["foo"], "bar");
        assert_eq!(row.fields()["foo"], "changed");
    }

    #[test]
    fn test_join_lookup() {
        let mut catalog = JoinCatalog::new();
        catalog.add(JoinSpec::new(
            SourceConfig::new("remote").with_location(Location::inline("jkey;jfoo\nbar;jbar\n")),
            "foo",
            "jkey",
        ));
        let joins = JoinSet::build(&catalog, &["remote".to_string()]).unwrap();

        let row = Row::with_context(fields(json!({"foo": "bar"})), Arc::new(AliasTable::new()), joins, None);

        assert!(row.has_join("remote"));
        assert!(!row.has_join("baz"));

        let joined = row.join("remote").unwrap().unwrap();
        assert_eq!(joined.get("jfoo").unwrap(), "jbar");
        assert_eq!(joined.source_id(), Some("remote"));
        assert_eq!(row.join_field("remote", "jfoo").unwrap(), Some(json!("jbar")));
    }

    #[test]
    fn test_unknown_join() {
        let row = sample();
        let err = row.join("bar").unwrap_err();
        assert!(matches!(
            err,
            crate::error::PipelineError::Row(RowError::UnknownJoin(name)) if name == "bar"
        ));
    }
}
