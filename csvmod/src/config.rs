//! Per-run controller configuration.
//!
//! A [`ControllerConfig`] is produced fresh by every [`crate::Controller`]
//! and owned by the pipeline for one run. Nothing in here is shared
//! between runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use crate::alias::AliasTable;
use crate::convert::{Converter, ConverterMap, Formatter, FormatterMap};
use crate::error::{CsvError, CsvResult};
use crate::parser::{Dialect, Location};

/// Environment variable naming the manifest directory
pub const CONTROLLERS_DIR_ENV: &str = "CSVMOD_CONTROLLERS_DIR";

/// Environment variable enabling quiet mode
pub const QUIET_ENV: &str = "CSVMOD_QUIET";

pub const DEFAULT_CONTROLLERS_DIR: &str = ".csvmod/controllers";

// =============================================================================
// Header contract
// =============================================================================

/// How a declared field list is checked against a discovered header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    /// Every declared field is present; order and extra columns are free
    #[default]
    Subset,

    /// The header equals the declared list, in order
    Exact,
}

impl HeaderMode {
    pub fn check(&self, expected: &[String], actual: &[String]) -> CsvResult<()> {
        let ok = match self {
            HeaderMode::Subset => expected.iter().all(|field| actual.contains(field)),
            HeaderMode::Exact => expected == actual,
        };

        if ok {
            Ok(())
        } else {
            Err(CsvError::HeaderMismatch {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            })
        }
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Decoding configuration of one readable table (primary input or join).
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub location: Option<Location>,
    pub dialect: Dialect,
    pub converters: ConverterMap,
    /// Declared field list; `None` passes the discovered header through
    pub fields: Option<Vec<String>>,
    pub aliases: AliasTable,
    pub header: HeaderMode,
    /// Names of joins reachable from rows of this table
    pub joins: Vec<String>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            dialect: Dialect::default(),
            converters: ConverterMap::new(),
            fields: None,
            aliases: AliasTable::new(),
            header: HeaderMode::default(),
            joins: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_converter(mut self, field: impl Into<String>, converter: Converter) -> Self {
        self.converters.insert(field.into(), converter);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>, canonical: impl Into<String>) -> Self {
        self.aliases.insert(alias, canonical);
        self
    }

    pub fn with_header(mut self, header: HeaderMode) -> Self {
        self.header = header;
        self
    }

    pub fn with_join(mut self, name: impl Into<String>) -> Self {
        self.joins.push(name.into());
        self
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::new("main")
    }
}

// =============================================================================
// Joins
// =============================================================================

/// Lookup strategy of a join source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    /// Memoize every scanned record by its remote key
    #[default]
    Cached,

    /// Scan forward without memoization. Queried keys must appear in
    /// non-decreasing stream order.
    Uncached,
}

/// Definition of one join in the catalog.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// Table to read; its `name` is the join name and its `joins` the nested joins
    pub source: SourceConfig,
    /// Field read from the requesting row
    pub local: String,
    /// Field of this table matched against the local value
    pub remote: String,
    pub policy: JoinPolicy,
}

impl JoinSpec {
    pub fn new(source: SourceConfig, local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            source,
            local: local.into(),
            remote: remote.into(),
            policy: JoinPolicy::default(),
        }
    }

    pub fn uncached(mut self) -> Self {
        self.policy = JoinPolicy::Uncached;
        self
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn nested(&self) -> &[String] {
        &self.source.joins
    }
}

/// Flat name → definition catalog. Nesting is expressed by name.
#[derive(Debug, Clone, Default)]
pub struct JoinCatalog(BTreeMap<String, JoinSpec>);

impl JoinCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the definition named after `spec.source.name`.
    pub fn add(&mut self, spec: JoinSpec) {
        self.0.insert(spec.name().to_string(), spec);
    }

    pub fn with(mut self, spec: JoinSpec) -> Self {
        self.add(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&JoinSpec> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut JoinSpec> {
        self.0.get_mut(name)
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
}

// =============================================================================
// Output
// =============================================================================

/// Encoding configuration of the output sink.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub name: String,
    pub location: Option<Location>,
    pub dialect: Dialect,
    pub formatters: FormatterMap,
    /// Declared columns; `None` means the input's effective fields
    pub fields: Option<Vec<String>>,
    /// Output column → row field
    pub aliases: AliasTable,
}

impl OutputConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            dialect: Dialect::default(),
            formatters: FormatterMap::new(),
            fields: None,
            aliases: AliasTable::new(),
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_formatter(mut self, field: impl Into<String>, formatter: Formatter) -> Self {
        self.formatters.insert(field.into(), formatter);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Emit row field `field` under column `column`.
    pub fn with_alias(mut self, column: impl Into<String>, field: impl Into<String>) -> Self {
        self.aliases.insert(column, field);
        self
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::new("target")
    }
}

// =============================================================================
// Controller configuration
// =============================================================================

/// Everything a pipeline run needs besides the hook itself.
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub input: SourceConfig,
    pub output: OutputConfig,
    pub joins: JoinCatalog,
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: SourceConfig) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    pub fn with_join(mut self, spec: JoinSpec) -> Self {
        self.joins.add(spec);
        self
    }
}

// =============================================================================
// Run options
// =============================================================================

/// Command line and environment overrides for one invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub quiet: bool,
    pub controllers_dir: PathBuf,
    pub delimiter: Option<char>,
    pub output_delimiter: Option<char>,
    pub encoding: Option<String>,
    pub output_encoding: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            quiet: false,
            controllers_dir: PathBuf::from(DEFAULT_CONTROLLERS_DIR),
            delimiter: None,
            output_delimiter: None,
            encoding: None,
            output_encoding: None,
        }
    }
}

impl RunOptions {
    /// Defaults overridden by `.env` and the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut options = Self::default();
        if let Ok(dir) = env::var(CONTROLLERS_DIR_ENV) {
            if !dir.trim().is_empty() {
                options.controllers_dir = PathBuf::from(dir);
            }
        }
        if let Ok(quiet) = env::var(QUIET_ENV) {
            options.quiet = parse_flag(&quiet);
        }
        options
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn with_output_delimiter(mut self, delimiter: char) -> Self {
        self.output_delimiter = Some(delimiter);
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_output_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.output_encoding = Some(encoding.into());
        self
    }

    /// Apply dialect overrides to the primary input and the output.
    pub fn apply(&self, config: &mut ControllerConfig) {
        if let Some(delimiter) = self.delimiter {
            config.input.dialect.delimiter = delimiter;
        }
        if let Some(encoding) = &self.encoding {
            config.input.dialect.encoding = encoding.clone();
        }
        if let Some(delimiter) = self.output_delimiter {
            config.output.dialect.delimiter = delimiter;
        }
        if let Some(encoding) = &self.output_encoding {
            config.output.dialect.encoding = encoding.clone();
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
