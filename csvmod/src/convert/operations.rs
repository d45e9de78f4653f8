//! Declarative field operations.
//!
//! Operations are the building blocks of manifest converters and rules.
//! They are serde-tagged by `type` so a list of them reads naturally in JSON:
//!
//! ```json
//! [
//!   {"type": "trim"},
//!   {"type": "replace", "pattern": "[-. ]", "value": ""},
//!   {"type": "to_integer"}
//! ]
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::HashMap;

use super::float_to_i64;

/// All available field operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Remove leading and trailing whitespace
    Trim,

    /// Convert to uppercase
    Uppercase,

    /// Convert to lowercase
    Lowercase,

    /// Replace using regex pattern
    Replace {
        pattern: String,
        #[serde(default)]
        value: String,
    },

    /// Pad string at start to reach target length
    PadStart {
        length: usize,
        #[serde(default = "default_pad_char")]
        char: String,
    },

    /// Pad string at end to reach target length
    PadEnd {
        length: usize,
        #[serde(default = "default_pad_char")]
        char: String,
    },

    /// Ensure string starts with given prefix
    EnsurePrefix { value: String },

    /// Ensure string ends with given suffix
    EnsureSuffix { value: String },

    /// Map values using a lookup table
    Map {
        mapping: HashMap<String, String>,
        #[serde(default)]
        case_insensitive: bool,
        /// Value to use when no mapping matches (null = keep the input)
        #[serde(default)]
        default_unmapped: Option<String>,
    },

    /// Convert to boolean
    ToBoolean {
        #[serde(default = "default_true_values")]
        true_values: Vec<String>,
    },

    /// Parse as integer
    ToInteger,

    /// Parse as float (dot decimal separator)
    ToFloat,

    /// Parse as float with a comma decimal separator ("12,50")
    CommaDecimal,

    /// Take a character range
    Substring {
        start: usize,
        #[serde(default)]
        length: Option<usize>,
    },

    /// Remove all non-alphanumeric characters
    Alphanumeric,

    /// Remove all non-digit characters
    DigitsOnly,
}

fn default_pad_char() -> String {
    "0".to_string()
}

fn default_true_values() -> Vec<String> {
    vec![
        "true".to_string(),
        "1".to_string(),
        "yes".to_string(),
        "y".to_string(),
    ]
}

impl Operation {
    /// Apply this operation to a value
    pub fn apply(&self, value: &Value) -> Result<Value, String> {
        match self {
            Operation::Trim => Ok(map_string(value, |s| s.trim().to_string())),
            Operation::Uppercase => Ok(map_string(value, |s| s.to_uppercase())),
            Operation::Lowercase => Ok(map_string(value, |s| s.to_lowercase())),
            Operation::Replace { pattern, value: replacement } => {
                let re = Regex::new(pattern).map_err(|e| format!("invalid pattern: {}", e))?;
                Ok(map_string(value, |s| re.replace_all(s, replacement.as_str()).to_string()))
            }
            Operation::PadStart { length, char } => {
                Ok(map_string(value, |s| pad(s, *length, char, true)))
            }
            Operation::PadEnd { length, char } => {
                Ok(map_string(value, |s| pad(s, *length, char, false)))
            }
            Operation::EnsurePrefix { value: prefix } => Ok(map_string(value, |s| {
                if s.starts_with(prefix.as_str()) {
                    s.to_string()
                } else {
                    format!("{}{}", prefix, s)
                }
            })),
            Operation::EnsureSuffix { value: suffix } => Ok(map_string(value, |s| {
                if s.ends_with(suffix.as_str()) {
                    s.to_string()
                } else {
                    format!("{}{}", s, suffix)
                }
            })),
            Operation::Map { mapping, case_insensitive, default_unmapped } => {
                Ok(apply_map(value, mapping, *case_insensitive, default_unmapped.as_deref()))
            }
            Operation::ToBoolean { true_values } => Ok(match value {
                Value::Bool(b) => Value::Bool(*b),
                _ => {
                    let lower = as_string(value).unwrap_or_default().trim().to_lowercase();
                    Value::Bool(true_values.iter().any(|tv| tv.to_lowercase() == lower))
                }
            }),
            Operation::ToInteger => to_integer(value),
            Operation::ToFloat => to_float(value, false),
            Operation::CommaDecimal => to_float(value, true),
            Operation::Substring { start, length } => Ok(map_string(value, |s| {
                let chars: Vec<char> = s.chars().collect();
                let end = length.map(|l| start + l).unwrap_or(chars.len());
                chars
                    .get(*start..end.min(chars.len()))
                    .map(|c| c.iter().collect())
                    .unwrap_or_default()
            })),
            Operation::Alphanumeric => {
                Ok(map_string(value, |s| s.chars().filter(|c| c.is_alphanumeric()).collect()))
            }
            Operation::DigitsOnly => {
                Ok(map_string(value, |s| s.chars().filter(|c| c.is_ascii_digit()).collect()))
            }
        }
    }
}

/// Apply a list of operations in order
pub fn apply_all(operations: &[Operation], value: &Value) -> Result<Value, String> {
    operations
        .iter()
        .try_fold(value.clone(), |current, op| op.apply(&current))
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Apply a string function, leaving null/array/object values untouched
fn map_string(value: &Value, f: impl FnOnce(&str) -> String) -> Value {
    as_string(value)
        .map(|s| Value::String(f(&s)))
        .unwrap_or_else(|| value.clone())
}

fn pad(s: &str, length: usize, pad_char: &str, at_start: bool) -> String {
    let count = s.chars().count();
    if count >= length {
        return s.to_string();
    }
    let pad = pad_char.chars().next().unwrap_or('0');
    let padding: String = std::iter::repeat(pad).take(length - count).collect();
    if at_start {
        format!("{}{}", padding, s)
    } else {
        format!("{}{}", s, padding)
    }
}

fn apply_map(
    value: &Value,
    mapping: &HashMap<String, String>,
    case_insensitive: bool,
    default_unmapped: Option<&str>,
) -> Value {
    let Some(s) = as_string(value) else {
        return value.clone();
    };

    let found = if case_insensitive {
        let key = s.to_lowercase();
        mapping.iter().find(|(k, _)| k.to_lowercase() == key).map(|(_, v)| v)
    } else {
        mapping.get(&s)
    };

    match (found, default_unmapped) {
        (Some(v), _) => Value::String(v.clone()),
        (None, Some(d)) => Value::String(d.to_string()),
        (None, None) => value.clone(),
    }
}

fn to_integer(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0)
            .and_then(float_to_i64)
            .map(|i| Value::Number(i.into()))
            .ok_or_else(|| format!("{} is not an integer in range", n)),
        Value::Bool(b) => Ok(Value::Number(i64::from(*b).into())),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .map_err(|_| format!("invalid literal for integer: '{}'", s)),
        other => Err(format!("cannot convert {} to integer", other)),
    }
}

fn to_float(value: &Value, comma_decimal: bool) -> Result<Value, String> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            let normalized = if comma_decimal { s.replace(',', ".") } else { s.to_string() };
            normalized.parse::<f64>().ok()
        }
        _ => None,
    };

    parsed
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| format!("could not convert {} to float", value))
}

/// Get a description of all available operations
pub fn operations_description() -> String {
    r#"Available field operations:

| Operation | Description | Parameters |
|-----------|-------------|------------|
| trim | Remove leading/trailing whitespace | - |
| uppercase | Convert to uppercase | - |
| lowercase | Convert to lowercase | - |
| replace | Regex pattern replacement | pattern: regex, value: replacement |
| pad_start | Pad string at start | length: target length, char: pad character (default "0") |
| pad_end | Pad string at end | length: target length, char: pad character (default "0") |
| ensure_prefix | Add prefix if not present | value: prefix string |
| ensure_suffix | Add suffix if not present | value: suffix string |
| map | Map values using lookup table | mapping: {source: target}, case_insensitive: bool, default_unmapped: string |
| to_boolean | Convert to boolean | true_values: list of truthy strings |
| to_integer | Parse integer (fails on bad input) | - |
| to_float | Parse float (fails on bad input) | - |
| comma_decimal | Parse "12,50" style decimals | - |
| substring | Extract substring | start: start index, length: optional length |
| alphanumeric | Keep only alphanumeric chars | - |
| digits_only | Keep only digits | - |"#
        .to_string()
}
