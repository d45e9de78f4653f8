//! Field converters and formatters.
//!
//! A [`Converter`] parses the raw value read from a file into a typed
//! [`Value`]; a [`Formatter`] renders a value back to text for the output
//! file. Both are cheap to clone and keyed by field name in a controller's
//! configuration.
//!
//! Built-ins cover the common cases (`int`, `float`, `comma_decimal`, ...);
//! manifests can also build converters from an [`Operation`] list.

pub mod operations;

pub use operations::{apply_all, operations_description, Operation};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigError, ConfigResult, ConvertError};

type ConvertFn = dyn Fn(&Value) -> Result<Value, String> + Send + Sync;
type FormatFn = dyn Fn(&Value) -> Result<String, String> + Send + Sync;

/// Converters keyed by field name.
pub type ConverterMap = HashMap<String, Converter>;

/// Formatters keyed by field name.
pub type FormatterMap = HashMap<String, Formatter>;

/// 2^63, the first float past `i64::MAX`
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Truncate `f` to an integer, or `None` when it does not fit in `i64`.
pub(crate) fn float_to_i64(f: f64) -> Option<i64> {
    let f = f.trunc();
    (-I64_BOUND..I64_BOUND).contains(&f).then_some(f as i64)
}

// =============================================================================
// Converter
// =============================================================================

/// Parse function applied to a field when a record is decoded.
#[derive(Clone)]
pub struct Converter {
    name: String,
    func: Arc<ConvertFn>,
}

impl Converter {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Parse as a signed integer.
    pub fn int() -> Self {
        Self::from_operation("int", Operation::ToInteger)
    }

    /// Parse as a float with a dot decimal separator.
    pub fn float() -> Self {
        Self::from_operation("float", Operation::ToFloat)
    }

    /// Parse "12,50" style decimals.
    pub fn comma_decimal() -> Self {
        Self::from_operation("comma_decimal", Operation::CommaDecimal)
    }

    /// Parse common truthy strings as `true`, anything else as `false`.
    pub fn boolean() -> Self {
        Self::from_operation(
            "bool",
            Operation::ToBoolean {
                true_values: vec!["true".into(), "1".into(), "yes".into(), "y".into()],
            },
        )
    }

    /// Strip surrounding whitespace.
    pub fn trim() -> Self {
        Self::from_operation("trim", Operation::Trim)
    }

    /// Keep the raw string.
    pub fn string() -> Self {
        Self::new("string", |v| Ok(v.clone()))
    }

    fn from_operation(name: &str, op: Operation) -> Self {
        Self::new(name, move |v| op.apply(v))
    }

    /// Chain operations into a single converter.
    pub fn from_operations(operations: Vec<Operation>) -> Self {
        Self::new("operations", move |v| apply_all(&operations, v))
    }

    /// Look up a built-in converter by name.
    pub fn named(name: &str) -> ConfigResult<Self> {
        match name {
            "int" | "integer" => Ok(Self::int()),
            "float" => Ok(Self::float()),
            "comma_decimal" => Ok(Self::comma_decimal()),
            "bool" | "boolean" => Ok(Self::boolean()),
            "trim" => Ok(Self::trim()),
            "str" | "string" => Ok(Self::string()),
            other => Err(ConfigError::UnknownConverter(other.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Convert `value` of `field`, attaching the field to any failure.
    pub fn convert(&self, field: &str, value: &Value) -> Result<Value, ConvertError> {
        (self.func)(value).map_err(|message| ConvertError::new(field, value.to_string(), message))
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Converter").field(&self.name).finish()
    }
}

// =============================================================================
// Formatter
// =============================================================================

/// Serialize function applied to a field when a record is written.
#[derive(Clone)]
pub struct Formatter {
    name: String,
    func: Arc<FormatFn>,
}

impl Formatter {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&Value) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// The default rendering, see [`render_value`].
    pub fn plain() -> Self {
        Self::new("plain", |v| Ok(render_value(v)))
    }

    /// Render decimals with a comma separator ("12,5").
    pub fn comma_decimal() -> Self {
        Self::new("comma_decimal", |v| Ok(render_value(v).replace('.', ",")))
    }

    /// Render numbers without a fractional part.
    pub fn int() -> Self {
        Self::new("int", |v| match v {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().and_then(float_to_i64))
                .map(|i| i.to_string())
                .ok_or_else(|| format!("{} is out of integer range", n)),
            other => Ok(render_value(other)),
        })
    }

    /// Look up a built-in formatter by name.
    pub fn named(name: &str) -> ConfigResult<Self> {
        match name {
            "plain" | "str" | "string" => Ok(Self::plain()),
            "comma_decimal" => Ok(Self::comma_decimal()),
            "int" | "integer" => Ok(Self::int()),
            other => Err(ConfigError::UnknownFormatter(other.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self, field: &str, value: &Value) -> Result<String, ConvertError> {
        (self.func)(value).map_err(|message| ConvertError::new(field, value.to_string(), message))
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Formatter").field(&self.name).finish()
    }
}

/// Default text rendering of a field value.
///
/// Strings are written verbatim, null as the empty string, numbers and
/// booleans via their JSON form (`12.0` keeps its fractional part), and
/// arrays/objects as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// Serde specs (manifests)
// =============================================================================

/// How a manifest names a converter: a built-in or an operation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConverterSpec {
    Named(String),
    Operations(Vec<Operation>),
}

impl ConverterSpec {
    pub fn build(&self) -> ConfigResult<Converter> {
        match self {
            ConverterSpec::Named(name) => Converter::named(name),
            ConverterSpec::Operations(ops) => Ok(Converter::from_operations(ops.clone())),
        }
    }
}

/// Build a converter map from manifest specs.
pub fn build_converters(specs: &HashMap<String, ConverterSpec>) -> ConfigResult<ConverterMap> {
    specs
        .iter()
        .map(|(field, spec)| Ok((field.clone(), spec.build()?)))
        .collect()
}

/// Build a formatter map from built-in formatter names.
pub fn build_formatters(specs: &HashMap<String, String>) -> ConfigResult<FormatterMap> {
    specs
        .iter()
        .map(|(field, name)| Ok((field.clone(), Formatter::named(name)?)))
        .collect()
}
