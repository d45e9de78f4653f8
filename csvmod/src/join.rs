//! Keyed lookups into secondary tables.
//!
//! A [`JoinSource`] answers "which record of this table has `remote == v`"
//! for the value `v` of a requesting row's `local` field. The underlying
//! table is a single forward-only stream that is never rewound:
//!
//! - [`JoinPolicy::Cached`] memoizes every record it scans past, so any key
//!   seen once is answered without touching the stream again.
//! - [`JoinPolicy::Uncached`] resumes scanning at the cursor on every call.
//!   Keys behind the cursor are misses, so queried keys must appear in
//!   non-decreasing stream order.
//!
//! Join trees are declared as a flat [`JoinCatalog`] and instantiated once
//! by [`JoinSet::build`], which rejects cycles and shares a join referenced
//! from several parents.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::config::{JoinCatalog, JoinSpec};
use crate::error::{JoinError, PipelineError, PipelineResult};
use crate::logs::log_info_indent;
use crate::row::Row;
use crate::table::TableReader;

pub use crate::config::JoinPolicy;

/// Scan counters of one join source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinMetrics {
    /// Records pulled from the underlying stream
    pub scanned: usize,
    /// Lookups answered from the cache
    pub hits: usize,
    /// Lookups that ended without a match
    pub misses: usize,
}

impl fmt::Display for JoinMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scanned, {} cache hits, {} misses",
            self.scanned, self.hits, self.misses
        )
    }
}

pub type SharedJoin = Rc<RefCell<JoinSource>>;

// =============================================================================
// Registry
// =============================================================================

/// Named joins reachable from a row. Cloning shares the same sources.
#[derive(Clone, Default)]
pub struct JoinRegistry(Rc<BTreeMap<String, SharedJoin>>);

impl JoinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(joins: BTreeMap<String, SharedJoin>) -> Self {
        Self(Rc::new(joins))
    }

    pub fn get(&self, name: &str) -> Option<&SharedJoin> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Open every join and, recursively, its nested joins.
    pub fn begin_all(&self) -> PipelineResult<()> {
        for join in self.0.values() {
            join.borrow_mut().begin()?;
        }
        Ok(())
    }

    /// Close every join recursively. All joins are closed even when one
    /// fails; the first failure is returned.
    pub fn end_all(&self) -> PipelineResult<()> {
        let mut first_error = None;
        for join in self.0.values() {
            if let Err(e) = join.borrow_mut().end() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Metrics of every join in the tree, by name.
    pub fn metrics(&self) -> BTreeMap<String, JoinMetrics> {
        let mut out = BTreeMap::new();
        self.collect_metrics(&mut out);
        out
    }

    fn collect_metrics(&self, out: &mut BTreeMap<String, JoinMetrics>) {
        for (name, join) in self.0.iter() {
            let join = join.borrow();
            out.insert(name.clone(), join.metrics());
            join.nested.collect_metrics(out);
        }
    }
}

impl fmt::Debug for JoinRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}

// =============================================================================
// Join source
// =============================================================================

pub struct JoinSource {
    spec: JoinSpec,
    nested: JoinRegistry,
    reader: Option<TableReader>,
    closed: bool,
    cache: HashMap<String, Row>,
    metrics: JoinMetrics,
}

impl JoinSource {
    pub fn new(spec: JoinSpec, nested: JoinRegistry) -> Self {
        Self {
            spec,
            nested,
            reader: None,
            closed: false,
            cache: HashMap::new(),
            metrics: JoinMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &JoinSpec {
        &self.spec
    }

    pub fn nested(&self) -> &JoinRegistry {
        &self.nested
    }

    pub fn metrics(&self) -> JoinMetrics {
        self.metrics
    }

    /// Number of distinct remote keys memoized so far
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Open the table and every nested join. Idempotent.
    pub fn begin(&mut self) -> PipelineResult<()> {
        if self.closed {
            return Err(PipelineError::InvalidState {
                operation: "open join",
                state: "closed",
            });
        }

        if self.reader.is_none() {
            let reader = TableReader::open(&self.spec.source)?.with_joins(self.nested.clone());
            log_info_indent(
                format!(
                    "Join '{}' on {} = {}: {}",
                    self.name(),
                    self.spec.local,
                    self.spec.remote,
                    reader.fields().join(", ")
                ),
                1,
            );
            self.reader = Some(reader);
        }

        self.nested.begin_all()
    }

    /// Close the table and every nested join. Idempotent.
    pub fn end(&mut self) -> PipelineResult<()> {
        let own = match self.reader.take() {
            Some(mut reader) => reader.close(),
            None => Ok(()),
        };
        self.closed = true;
        let nested = self.nested.end_all();
        own.and(nested)
    }

    /// Look up the record matching `row`'s local key.
    pub fn auto_join(&mut self, row: &Row) -> PipelineResult<Option<Row>> {
        let criterion = row.get(&self.spec.local)?.clone();
        self.get_row(&criterion)
    }

    /// Look up the record whose remote key equals `criterion`.
    pub fn get_row(&mut self, criterion: &Value) -> PipelineResult<Option<Row>> {
        if self.closed {
            return Err(PipelineError::InvalidState {
                operation: "look up join",
                state: "closed",
            });
        }
        if self.reader.is_none() {
            self.begin()?;
        }

        let key = cache_key(criterion);
        match self.spec.policy {
            JoinPolicy::Cached => self.get_row_cached(&key),
            JoinPolicy::Uncached => self.get_row_uncached(&key),
        }
    }

    fn get_row_cached(&mut self, key: &str) -> PipelineResult<Option<Row>> {
        if let Some(row) = self.cache.get(key) {
            self.metrics.hits += 1;
            return Ok(Some(row.clone()));
        }

        while let Some(row) = self.next_row()? {
            let remote = cache_key(row.get(&self.spec.remote)?);
            let matched = remote == key;
            self.cache.insert(remote, row.clone());
            if matched {
                return Ok(Some(row));
            }
        }

        self.metrics.misses += 1;
        Ok(None)
    }

    fn get_row_uncached(&mut self, key: &str) -> PipelineResult<Option<Row>> {
        while let Some(row) = self.next_row()? {
            if cache_key(row.get(&self.spec.remote)?) == key {
                return Ok(Some(row));
            }
        }

        self.metrics.misses += 1;
        Ok(None)
    }

    fn next_row(&mut self) -> PipelineResult<Option<Row>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let row = reader.next_row()?;
        if row.is_some() {
            self.metrics.scanned += 1;
        }
        Ok(row)
    }
}

impl fmt::Debug for JoinSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinSource")
            .field("name", &self.name())
            .field("policy", &self.spec.policy)
            .field("nested", &self.nested)
            .field("metrics", &self.metrics)
            .finish()
    }
}

/// Canonical JSON text of a key, so `"1"` and `1` stay distinct.
fn cache_key(value: &Value) -> String {
    value.to_string()
}

// =============================================================================
// Construction
// =============================================================================

/// Instantiates a join tree from a flat catalog.
pub struct JoinSet<'a> {
    catalog: &'a JoinCatalog,
    built: HashMap<String, SharedJoin>,
    path: Vec<String>,
}

impl<'a> JoinSet<'a> {
    /// Build the registry of `roots`, instantiating nested joins by name.
    pub fn build(catalog: &'a JoinCatalog, roots: &[String]) -> Result<JoinRegistry, JoinError> {
        let mut set = Self {
            catalog,
            built: HashMap::new(),
            path: Vec::new(),
        };
        set.registry(roots)
    }

    fn registry(&mut self, names: &[String]) -> Result<JoinRegistry, JoinError> {
        let mut joins = BTreeMap::new();
        for name in names {
            joins.insert(name.clone(), self.instantiate(name)?);
        }
        Ok(JoinRegistry::from_map(joins))
    }

    fn instantiate(&mut self, name: &str) -> Result<SharedJoin, JoinError> {
        if let Some(pos) = self.path.iter().position(|n| n == name) {
            let mut cycle = self.path[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(JoinError::Cycle(cycle));
        }
        if let Some(join) = self.built.get(name) {
            return Ok(Rc::clone(join));
        }

        let spec = self
            .catalog
            .get(name)
            .ok_or_else(|| JoinError::Undefined(name.to_string()))?;

        self.path.push(name.to_string());
        let nested = self.registry(spec.nested())?;
        self.path.pop();

        let join = Rc::new(RefCell::new(JoinSource::new(spec.clone(), nested)));
        self.built.insert(name.to_string(), Rc::clone(&join));
        Ok(join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::parser::Location;
    use serde_json::json;

    fn roots(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn letters(policy: JoinPolicy) -> JoinSource {
        let mut spec = JoinSpec::new(
            SourceConfig::new("letters").with_location(Location::inline("key;value\nA;1\nB;2\nC;3\nD;4\n")),
            "letter",
            "key",
        );
        spec.policy = policy;
        JoinSource::new(spec, JoinRegistry::new())
    }

    #[test]
    fn test_cached_lookup_does_not_rescan() {
        let mut join = letters(JoinPolicy::Cached);
        join.begin().unwrap();

        let c = join.get_row(&json!("C")).unwrap().unwrap();
        assert_eq!(c.get("value").unwrap(), "3");
        assert_eq!(join.metrics().scanned, 3);
        assert_eq!(join.cached(), 3);

        let b = join.get_row(&json!("B")).unwrap().unwrap();
        assert_eq!(b.get("value").unwrap(), "2");
        assert_eq!(join.metrics().scanned, 3);
        assert_eq!(join.metrics().hits, 1);
    }

    #[test]
    fn test_cached_miss_keeps_scanned_rows() {
        let mut join = letters(JoinPolicy::Cached);
        assert!(join.get_row(&json!("Z")).unwrap().is_none());
        assert_eq!(join.metrics().scanned, 4);
        assert_eq!(join.metrics().misses, 1);

        // Everything is cached now, later lookups never touch the stream
        assert!(join.get_row(&json!("A")).unwrap().is_some());
        assert_eq!(join.metrics().scanned, 4);
    }

    #[test]
    fn test_cache_keys_are_typed() {
        let mut join = letters(JoinPolicy::Cached);
        assert!(join.get_row(&json!(1)).unwrap().is_none());
        assert!(join.get_row(&json!("A")).unwrap().is_some());
    }

    #[test]
    fn test_uncached_forward_resume() {
        let mut join = letters(JoinPolicy::Uncached);
        assert!(join.get_row(&json!("B")).unwrap().is_some());
        assert!(join.get_row(&json!("C")).unwrap().is_some());
        assert_eq!(join.metrics().scanned, 3);

        // A lies behind the cursor
        assert!(join.get_row(&json!("A")).unwrap().is_none());
        assert_eq!(join.metrics().misses, 1);
    }

    #[test]
    fn test_auto_join_reads_local_key() {
        let mut join = letters(JoinPolicy::Cached);
        let row = Row::new(match json!({"letter": "D"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        });
        let joined = join.auto_join(&row).unwrap().unwrap();
        assert_eq!(joined.get("value").unwrap(), "4");
        assert_eq!(joined.source_id(), Some("letters"));
    }

    #[test]
    fn test_lookup_after_end_fails() {
        let mut join = letters(JoinPolicy::Cached);
        join.begin().unwrap();
        join.end().unwrap();
        join.end().unwrap();
        assert!(join.is_closed());
        assert!(matches!(
            join.get_row(&json!("A")),
            Err(PipelineError::InvalidState { .. })
        ));
    }

    fn nested_catalog() -> JoinCatalog {
        JoinCatalog::new()
            .with(JoinSpec::new(
                SourceConfig::new("test")
                    .with_location(Location::inline("auction_id;listing_id\n10;L1\n11;L2\n"))
                    .with_join("nested"),
                "AuctionID",
                "auction_id",
            ))
            .with(JoinSpec::new(
                SourceConfig::new("nested").with_location(Location::inline("ID;Name\nL1;Lamp\nL2;Chair\n")),
                "listing_id",
                "ID",
            ))
    }

    #[test]
    fn test_nested_joins_chain() {
        let catalog = nested_catalog();
        let joins = JoinSet::build(&catalog, &roots(&["test"])).unwrap();
        joins.begin_all().unwrap();

        let row = Row::with_context(
            match json!({"AuctionID": "11"}) {
                Value::Object(map) => map,
                _ => unreachable!(),
            },
            Default::default(),
            joins.clone(),
            None,
        );

        let auction = row.join("test").unwrap().unwrap();
        assert!(auction.has_join("nested"));
        assert_eq!(auction.join_field("nested", "Name").unwrap(), Some(json!("Chair")));

        let metrics = joins.metrics();
        assert_eq!(metrics["test"].scanned, 2);
        assert_eq!(metrics["nested"].scanned, 2);

        joins.end_all().unwrap();
        let test = joins.get("test").unwrap().borrow();
        assert!(test.is_closed());
        assert!(test.nested().get("nested").unwrap().borrow().is_closed());
    }

    #[test]
    fn test_cycle_rejected() {
        let catalog = JoinCatalog::new()
            .with(JoinSpec::new(SourceConfig::new("a").with_join("b"), "x", "x"))
            .with(JoinSpec::new(SourceConfig::new("b").with_join("c"), "x", "x"))
            .with(JoinSpec::new(SourceConfig::new("c").with_join("a"), "x", "x"));

        let err = JoinSet::build(&catalog, &roots(&["a"])).unwrap_err();
        assert_eq!(err, JoinError::Cycle(roots(&["a", "b", "c", "a"])));

        let selfish = JoinCatalog::new().with(JoinSpec::new(SourceConfig::new("me").with_join("me"), "x", "x"));
        assert!(matches!(
            JoinSet::build(&selfish, &roots(&["me"])),
            Err(JoinError::Cycle(_))
        ));
    }

    #[test]
    fn test_undefined_join() {
        let catalog = JoinCatalog::new().with(JoinSpec::new(SourceConfig::new("a").with_join("ghost"), "x", "x"));
        assert_eq!(
            JoinSet::build(&catalog, &roots(&["a"])).unwrap_err(),
            JoinError::Undefined("ghost".into())
        );
    }

    #[test]
    fn test_shared_join_instantiated_once() {
        let catalog = JoinCatalog::new()
            .with(JoinSpec::new(SourceConfig::new("left").with_join("shared"), "x", "x"))
            .with(JoinSpec::new(SourceConfig::new("right").with_join("shared"), "x", "x"))
            .with(JoinSpec::new(SourceConfig::new("shared"), "x", "x"));

        let joins = JoinSet::build(&catalog, &roots(&["left", "right", "shared"])).unwrap();
        let left = joins.get("left").unwrap().borrow();
        let right = joins.get("right").unwrap().borrow();
        assert!(Rc::ptr_eq(
            left.nested().get("shared").unwrap(),
            right.nested().get("shared").unwrap()
        ));
        assert!(Rc::ptr_eq(left.nested().get("shared").unwrap(), joins.get("shared").unwrap()));
    }
}
