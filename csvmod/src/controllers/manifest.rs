//! Declarative controllers loaded from JSON.
//!
//! A manifest describes the input, output and join configuration plus an
//! ordered list of field rules:
//!
//! ```json
//! {
//!   "description": "Attach listing names",
//!   "input": { "delimiter": ";", "converters": { "Price": "comma_decimal" }, "joins": ["listings"] },
//!   "output": { "delimiter": "\t", "fields": ["AuctionID", "ListingName"] },
//!   "joins": {
//!     "listings": { "file": "listings.csv", "local": "AuctionID", "remote": "auction_id", "delimiter": "|" }
//!   },
//!   "rules": [
//!     { "target": "ListingName", "join": "listings", "source": "Name", "default": "" },
//!     { "target": "Service", "constant": "7723", "when": { "field": "Service", "one_of": ["7723", "7710"], "negate": true } }
//!   ],
//!   "write": "if_changed"
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::alias::AliasTable;
use crate::config::{ControllerConfig, HeaderMode, JoinPolicy, JoinSpec, OutputConfig, SourceConfig};
use crate::controller::{Controller, WriteDecision};
use crate::convert::{apply_all, build_converters, build_formatters, render_value, ConverterSpec, Operation};
use crate::error::{ConfigError, ConfigResult, ConvertError, PipelineResult, RowResult};
use crate::parser::{Dialect, Location};
use crate::row::Row;

// =============================================================================
// Serde model
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub input: SourceManifest,

    #[serde(default)]
    pub output: OutputManifest,

    /// Join catalog, keyed by join name
    #[serde(default)]
    pub joins: BTreeMap<String, JoinManifest>,

    /// Applied in order to every row
    #[serde(default)]
    pub rules: Vec<Rule>,

    #[serde(default)]
    pub write: WriteMode,

    /// Rows after the first `limit` are never written
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceManifest {
    #[serde(flatten)]
    pub dialect: Dialect,

    #[serde(default)]
    pub converters: HashMap<String, ConverterSpec>,

    #[serde(default)]
    pub fields: Option<Vec<String>>,

    #[serde(default)]
    pub aliases: AliasTable,

    #[serde(default)]
    pub header: HeaderMode,

    /// Root (or nested) joins reachable from rows of this table
    #[serde(default)]
    pub joins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputManifest {
    #[serde(flatten)]
    pub dialect: Dialect,

    /// Field → built-in formatter name
    #[serde(default)]
    pub formatters: HashMap<String, String>,

    #[serde(default)]
    pub fields: Option<Vec<String>>,

    /// Output column → row field
    #[serde(default)]
    pub aliases: AliasTable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinManifest {
    /// Table path, relative to the manifest's directory
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Literal table contents
    #[serde(default)]
    pub inline: Option<String>,

    pub local: String,

    pub remote: String,

    #[serde(default = "default_cache")]
    pub cache: bool,

    #[serde(flatten)]
    pub source: SourceManifest,
}

fn default_cache() -> bool {
    true
}

/// One field assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Field to set
    pub target: String,

    /// Field to read; defaults to `target`
    #[serde(default)]
    pub source: Option<String>,

    /// Read `source` from the row this join returns
    #[serde(default)]
    pub join: Option<String>,

    /// Literal value instead of a field read
    #[serde(default)]
    pub constant: Option<Value>,

    #[serde(default)]
    pub operations: Vec<Operation>,

    /// Used when the join has no match; without it the rule is skipped
    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub when: Option<Condition>,
}

/// Predicate over one field. All given tests must hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,

    #[serde(default)]
    pub equals: Option<Value>,

    #[serde(default)]
    pub one_of: Option<Vec<Value>>,

    #[serde(default)]
    pub starts_with: Option<String>,

    #[serde(default)]
    pub not_empty: bool,

    #[serde(default)]
    pub at_least: Option<f64>,

    #[serde(default)]
    pub less_than: Option<f64>,

    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    IfChanged,
    Always,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Loose equality: same JSON value or same text rendering (`"1"` vs `1`).
fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || render_value(a) == render_value(b)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

impl Condition {
    pub fn matches(&self, row: &Row) -> RowResult<bool> {
        let value = row.get(&self.field)?;

        let mut ok = true;
        if let Some(expected) = &self.equals {
            ok &= loosely_equal(value, expected);
        }
        if let Some(options) = &self.one_of {
            ok &= options.iter().any(|o| loosely_equal(value, o));
        }
        if let Some(prefix) = &self.starts_with {
            ok &= render_value(value).starts_with(prefix.as_str());
        }
        if self.not_empty {
            ok &= !render_value(value).trim().is_empty();
        }
        if let Some(min) = self.at_least {
            ok &= as_number(value).is_some_and(|n| n >= min);
        }
        if let Some(max) = self.less_than {
            ok &= as_number(value).is_some_and(|n| n < max);
        }

        Ok(ok != self.negate)
    }
}

impl Rule {
    /// Evaluate against `row` and assign the target. Returns whether the
    /// rule fired.
    pub fn apply(&self, row: &mut Row) -> PipelineResult<bool> {
        if let Some(condition) = &self.when {
            if !condition.matches(row)? {
                return Ok(false);
            }
        }

        let source = self.source.as_deref().unwrap_or(&self.target);
        let value = if let Some(join) = &self.join {
            match row.join(join)? {
                Some(joined) => joined.get(source)?.clone(),
                None => match &self.default {
                    Some(default) => default.clone(),
                    None => return Ok(false),
                },
            }
        } else if let Some(constant) = &self.constant {
            constant.clone()
        } else {
            row.get(source)?.clone()
        };

        let value = apply_all(&self.operations, &value)
            .map_err(|message| ConvertError::new(&self.target, value.to_string(), message))?;
        row.set(&self.target, value);
        Ok(true)
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Controller interpreting a [`Manifest`].
#[derive(Debug)]
pub struct ManifestController {
    name: String,
    manifest: Manifest,
    config: ControllerConfig,
    rows: usize,
}

impl ManifestController {
    /// Build from a parsed manifest. Relative join files resolve against
    /// `base_dir` when given.
    pub fn new(name: impl Into<String>, manifest: Manifest, base_dir: Option<&Path>) -> ConfigResult<Self> {
        let config = build_config(&manifest, base_dir)?;
        Ok(Self {
            name: name.into(),
            manifest,
            config,
            rows: 0,
        })
    }

    pub fn from_json(name: impl Into<String>, json: &str) -> ConfigResult<Self> {
        let manifest: Manifest = serde_json::from_str(json)?;
        Self::new(name, manifest, None)
    }

    /// Load `<name>.json`; the controller is named after the file stem.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&content)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("manifest")
            .to_string();
        Self::new(name, manifest, path.parent())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

fn build_source(name: &str, manifest: &SourceManifest) -> ConfigResult<SourceConfig> {
    let mut source = SourceConfig::new(name).with_dialect(manifest.dialect.clone());
    source.converters = build_converters(&manifest.converters)?;
    source.fields = manifest.fields.clone();
    source.aliases = manifest.aliases.clone();
    source.header = manifest.header;
    source.joins = manifest.joins.clone();
    Ok(source)
}

fn build_config(manifest: &Manifest, base_dir: Option<&Path>) -> ConfigResult<ControllerConfig> {
    let input = build_source("main", &manifest.input)?;

    let mut output = OutputConfig::new("target").with_dialect(manifest.output.dialect.clone());
    output.formatters = build_formatters(&manifest.output.formatters)?;
    output.fields = manifest.output.fields.clone();
    output.aliases = manifest.output.aliases.clone();

    let mut config = ControllerConfig::new().with_input(input).with_output(output);

    for (name, join) in &manifest.joins {
        let location = match (&join.file, &join.inline) {
            (Some(file), _) => {
                let path = match base_dir {
                    Some(dir) if file.is_relative() => dir.join(file),
                    _ => file.clone(),
                };
                Location::File(path)
            }
            (None, Some(contents)) => Location::Inline(contents.clone()),
            (None, None) => return Err(ConfigError::MissingLocation(name.clone())),
        };

        let mut spec = JoinSpec::new(
            build_source(name, &join.source)?.with_location(location),
            join.local.clone(),
            join.remote.clone(),
        );
        if !join.cache {
            spec.policy = JoinPolicy::Uncached;
        }
        config.joins.add(spec);
    }

    Ok(config)
}

impl Controller for ManifestController {
    fn config(&self) -> ControllerConfig {
        self.config.clone()
    }

    fn begin_run(&mut self) {
        self.rows = 0;
    }

    fn handle(&mut self, row: &mut Row) -> PipelineResult<WriteDecision> {
        self.rows += 1;
        if self.manifest.limit.is_some_and(|limit| self.rows > limit) {
            return Ok(WriteDecision::Skip);
        }

        for rule in &self.manifest.rules {
            rule.apply(row)?;
        }

        Ok(match self.manifest.write {
            WriteMode::IfChanged => WriteDecision::WriteIfChanged,
            WriteMode::Always => WriteDecision::ForceWrite,
        })
    }

    fn description(&self) -> String {
        self.manifest.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunOptions;
    use crate::parser::MemoryBuffer;
    use crate::pipeline::execute;
    use serde_json::json;
    use tempfile::tempdir;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => Row::new(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest: Manifest = serde_json::from_str("{}").unwrap();
        assert_eq!(manifest.write, WriteMode::IfChanged);
        assert_eq!(manifest.input.dialect, Dialect::default());
        assert!(manifest.rules.is_empty());
    }

    #[test]
    fn test_condition() {
        let r = row(json!({"ItemNo": "u01", "Price": "45,5", "Service": "9999", "Empty": ""}));

        let cond = |json: Value| -> Condition { serde_json::from_value(json).unwrap() };
        assert!(cond(json!({"field": "ItemNo", "starts_with": "u0"})).matches(&r).unwrap());
        assert!(cond(json!({"field": "Price", "at_least": 40})).matches(&r).unwrap());
        assert!(!cond(json!({"field": "Price", "less_than": 40})).matches(&r).unwrap());
        assert!(cond(json!({"field": "Service", "one_of": ["7723", "7710"], "negate": true}))
            .matches(&r)
            .unwrap());
        assert!(cond(json!({"field": "Service", "equals": 9999})).matches(&r).unwrap());
        assert!(!cond(json!({"field": "Empty", "not_empty": true})).matches(&r).unwrap());
        assert!(cond(json!({"field": "Nope"})).matches(&r).is_err());
    }

    #[test]
    fn test_rule_sources() {
        let mut r = row(json!({"Name": "  lamp ", "Code": "7"}));

        let rule: Rule = serde_json::from_value(json!({
            "target": "Name",
            "operations": [{"type": "trim"}, {"type": "uppercase"}]
        }))
        .unwrap();
        assert!(rule.apply(&mut r).unwrap());
        assert_eq!(r.get("Name").unwrap(), "LAMP");

        let rule: Rule = serde_json::from_value(json!({
            "target": "Padded", "source": "Code",
            "operations": [{"type": "pad_start", "length": 3, "char": "0"}]
        }))
        .unwrap();
        rule.apply(&mut r).unwrap();
        assert_eq!(r.get("Padded").unwrap(), "007");

        let rule: Rule = serde_json::from_value(json!({"target": "Dispatch", "constant": 1})).unwrap();
        rule.apply(&mut r).unwrap();
        assert_eq!(r.get("Dispatch").unwrap(), &json!(1));
    }

    #[test]
    fn test_rule_operation_failure() {
        let mut r = row(json!({"Qty": "many"}));
        let rule: Rule =
            serde_json::from_value(json!({"target": "Qty", "operations": [{"type": "to_integer"}]})).unwrap();
        assert!(matches!(rule.apply(&mut r), Err(crate::error::PipelineError::Convert(_))));
    }

    #[test]
    fn test_missing_join_location() {
        let json = r#"{"joins": {"x": {"local": "a", "remote": "b"}}}"#;
        assert!(matches!(
            ManifestController::from_json("m", json),
            Err(ConfigError::MissingLocation(name)) if name == "x"
        ));
    }

    #[test]
    fn test_unknown_converter() {
        let json = r#"{"input": {"converters": {"A": "roman"}}}"#;
        assert!(matches!(
            ManifestController::from_json("m", json),
            Err(ConfigError::UnknownConverter(_))
        ));
    }

    #[test]
    fn test_manifest_end_to_end() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("listings.csv"), "auction_id|Name\nA1|Lamp\nA2|Chair\n").unwrap();
        let path = dir.path().join("listing-names.json");
        std::fs::write(
            &path,
            r#"{
                "description": "Attach listing names",
                "input": {"converters": {"Price": "comma_decimal"}, "joins": ["listings"]},
                "output": {
                    "delimiter": ",",
                    "fields": ["id", "Price", "ListingName"],
                    "aliases": {"id": "AuctionID"},
                    "formatters": {"Price": "comma_decimal"}
                },
                "joins": {
                    "listings": {"file": "listings.csv", "local": "AuctionID", "remote": "auction_id", "delimiter": "|"}
                },
                "rules": [
                    {"target": "ListingName", "join": "listings", "source": "Name", "default": "unknown"},
                    {"target": "Price", "constant": 0, "when": {"field": "Price", "at_least": 40}}
                ]
            }"#,
        )
        .unwrap();

        let mut controller = ManifestController::from_path(&path).unwrap();
        assert_eq!(controller.name(), "listing-names");
        assert_eq!(controller.description(), "Attach listing names");

        let buffer = MemoryBuffer::new();
        let report = execute(
            &mut controller,
            Location::inline("AuctionID;Price\nA2;45,5\nA9;1,5\n"),
            Location::Memory(buffer.clone()),
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(
            buffer.contents(),
            "id,Price,ListingName\nA2,0,Chair\nA9,\"1,5\",unknown\n"
        );
        assert_eq!(report.rows_changed, 1);
        assert_eq!(report.rows_written, 2);
    }

    #[test]
    fn test_write_always_and_limit() {
        let json = r#"{"write": "always", "limit": 1}"#;
        let mut controller = ManifestController::from_json("m", json).unwrap();
        let buffer = MemoryBuffer::new();
        execute(
            &mut controller,
            Location::inline("A\n1\n2\n"),
            Location::Memory(buffer.clone()),
            &RunOptions::default(),
        )
        .unwrap();
        assert_eq!(buffer.contents(), "A\n1\n");
    }

    #[test]
    fn test_limit_applies_per_run() {
        let json = r#"{"write": "always", "limit": 1}"#;
        let mut controller = ManifestController::from_json("m", json).unwrap();

        for _ in 0..2 {
            let buffer = MemoryBuffer::new();
            execute(
                &mut controller,
                Location::inline("A\n1\n2\n"),
                Location::Memory(buffer.clone()),
                &RunOptions::default(),
            )
            .unwrap();
            assert_eq!(buffer.contents(), "A\n1\n");
        }
    }
}
