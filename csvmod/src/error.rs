//! Error types for the csvmod row pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`CsvError`] - Reading/writing delimited files, header contract
//! - [`RowError`] - Field and join resolution on a [`crate::Row`]
//! - [`ConvertError`] - Converter and formatter failures
//! - [`JoinError`] - Join catalog construction
//! - [`ConfigError`] - Controller configuration and manifests
//! - [`RegistryError`] - Controller lookup by name
//! - [`PipelineError`] - Top-level run errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors while reading or writing delimited files.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Failed to open, read or write a file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The underlying reader/writer rejected a record.
    #[error("Invalid CSV: {0}")]
    Csv(String),

    /// Bytes could not be decoded with the configured encoding.
    #[error("Failed to decode {source_name} with {encoding}")]
    Encoding { source_name: String, encoding: String },

    /// The configured encoding label is not known.
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    /// The source has no header line.
    #[error("No headers found in {0}")]
    NoHeaders(String),

    /// The discovered header does not satisfy the declared field list.
    #[error("Invalid header: expected {expected:?}, found {actual:?}")]
    HeaderMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

impl From<csv::Error> for CsvError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            if let csv::ErrorKind::Io(io) = err.into_kind() {
                return CsvError::Io(io);
            }
            return CsvError::Csv("io failure".to_string());
        }
        CsvError::Csv(err.to_string())
    }
}

// =============================================================================
// Row Errors
// =============================================================================

/// Errors raised while resolving fields or joins on a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    /// Neither the key nor its alias target is a field of the row.
    #[error("{}", unknown_field_message(.field, .source_id.as_deref()))]
    UnknownField {
        field: String,
        source_id: Option<String>,
    },

    /// The row has no join registered under this name.
    #[error("Unknown join '{0}'")]
    UnknownJoin(String),
}

fn unknown_field_message(field: &str, source_id: Option<&str>) -> String {
    match source_id {
        Some(source_id) => format!("Unknown field '{}' in file '{}'", field, source_id),
        None => format!("Unknown field '{}'", field),
    }
}

// =============================================================================
// Conversion Errors
// =============================================================================

/// A converter or formatter refused a value.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Cannot convert field '{field}' (value {value}): {message}")]
pub struct ConvertError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl ConvertError {
    pub fn new(field: impl Into<String>, value: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Join Errors
// =============================================================================

/// Errors while building the join tree from its catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// A join is reachable from itself.
    #[error("Join cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// A join references a name with no definition.
    #[error("Join '{0}' is not defined")]
    Undefined(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors in controller configuration or manifests.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Manifest JSON could not be parsed.
    #[error("Manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Manifest file could not be read.
    #[error("Manifest IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A converter name has no built-in implementation.
    #[error("Unknown converter: {0}")]
    UnknownConverter(String),

    /// A formatter name has no built-in implementation.
    #[error("Unknown formatter: {0}")]
    UnknownFormatter(String),

    /// A source was configured without a file or inline data.
    #[error("No location configured for '{0}'")]
    MissingLocation(String),

    /// Delimiter or quote are not single-byte characters.
    #[error("Invalid dialect: {0}")]
    InvalidDialect(String),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the controller registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No controller registered or found under this name.
    #[error("Controller not found: {0}")]
    NotFound(String),

    /// A controller with this name is already registered.
    #[error("Controller already registered: {0}")]
    Duplicate(String),

    /// The controller manifest is invalid.
    #[error("Invalid controller manifest: {0}")]
    Manifest(#[from] ConfigError),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level errors of a pipeline run.
///
/// This is the error type returned by [`crate::Pipeline`] and by controller
/// hooks. It wraps all lower-level errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// CSV reading/writing error, including header mismatches.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Field or join resolution error.
    #[error("{0}")]
    Row(#[from] RowError),

    /// Converter or formatter error.
    #[error("Conversion error: {0}")]
    Convert(#[from] ConvertError),

    /// Join catalog error.
    #[error("Join error: {0}")]
    Join(#[from] JoinError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Controller hook failure.
    #[error("Controller failed: {0}")]
    Hook(String),

    /// Operation called in the wrong pipeline state.
    #[error("Cannot {operation} while pipeline is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

impl PipelineError {
    /// Shorthand for hook failures raised by controllers.
    pub fn hook(message: impl Into<String>) -> Self {
        PipelineError::Hook(message.into())
    }

    /// The header mismatch carried by this error, if any.
    pub fn header_mismatch(&self) -> Option<(&[String], &[String])> {
        match self {
            PipelineError::Csv(CsvError::HeaderMismatch { expected, actual }) => {
                Some((expected, actual))
            }
            _ => None,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for row operations.
pub type RowResult<T> = Result<T, RowError>;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let row_err = RowError::UnknownJoin("prices".into());
        let pipeline_err: PipelineError = row_err.into();
        assert!(pipeline_err.to_string().contains("prices"));

        let csv_err = CsvError::NoHeaders("main".into());
        let pipeline_err: PipelineError = csv_err.into();
        assert!(pipeline_err.to_string().contains("main"));
    }

    #[test]
    fn test_unknown_field_format() {
        let err = RowError::UnknownField {
            field: "Price".into(),
            source_id: Some("main".into()),
        };
        assert_eq!(err.to_string(), "Unknown field 'Price' in file 'main'");

        let err = RowError::UnknownField {
            field: "Price".into(),
            source_id: None,
        };
        assert_eq!(err.to_string(), "Unknown field 'Price'");
    }

    #[test]
    fn test_header_mismatch_accessor() {
        let err: PipelineError = CsvError::HeaderMismatch {
            expected: vec!["a".into()],
            actual: vec!["b".into()],
        }
        .into();
        let (expected, actual) = err.header_mismatch().unwrap();
        assert_eq!(expected, ["a".to_string()]);
        assert_eq!(actual, ["b".to_string()]);
    }

    #[test]
    fn test_cycle_format() {
        let err = JoinError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Join cycle detected: a -> b -> a");
    }
}
