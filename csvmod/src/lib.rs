//! # csvmod - row-level CSV modification
//!
//! csvmod streams records from a delimited file through a controller that
//! may change any field, looks up related records in secondary files
//! (joins), and writes only the rows that actually changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Input CSV  │────▶│ TableReader │────▶│ Controller  │────▶│ TableWriter │
//! │ (any enc.)  │     │ (convert)   │     │ (Row, join) │     │ (changed)   │
//! └─────────────┘     └─────────────┘     └──────┬──────┘     └─────────────┘
//!                                                │
//!                                         ┌──────▼──────┐
//!                                         │ JoinSource  │
//!                                         │ (cached)    │
//!                                         └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use csvmod::{execute, ControllerRegistry, Location, RunOptions};
//!
//! let registry = ControllerRegistry::with_builtins(".csvmod/controllers");
//! let mut controller = registry.resolve("shipping")?;
//! let report = execute(
//!     controller.as_mut(),
//!     Location::file("offers.csv"),
//!     Location::file("changed.csv"),
//!     &RunOptions::default(),
//! )?;
//! println!("{}", report);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`row`] - Mutable records with origin snapshots
//! - [`join`] - Keyed lookups into secondary files
//! - [`pipeline`] - The read → handle → write driver
//! - [`statistics`] - Per-field change counters
//! - [`controllers`] - Built-in and manifest controllers
//! - [`convert`] - Converters, formatters and the operation DSL
//! - [`parser`] - Delimited-text reading and writing

// Core modules
pub mod alias;
pub mod error;
pub mod logs;
pub mod row;

// Configuration
pub mod config;
pub mod controller;

// Parsing
pub mod convert;
pub mod parser;
pub mod table;

// Joins
pub mod join;

// Pipeline
pub mod pipeline;
pub mod statistics;

// Controllers
pub mod controllers;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, ConvertError, CsvError, JoinError, PipelineError, PipelineResult, RegistryError,
    RowError,
};

// =============================================================================
// Re-exports - Rows and joins
// =============================================================================

pub use alias::AliasTable;
pub use join::{JoinMetrics, JoinRegistry, JoinSet, JoinSource};
pub use row::{Fields, Row};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{
    ControllerConfig, HeaderMode, JoinCatalog, JoinPolicy, JoinSpec, OutputConfig, RunOptions,
    SourceConfig,
};
pub use controller::{Controller, FnController, WriteDecision};

// =============================================================================
// Re-exports - Conversion
// =============================================================================

pub use convert::{operations_description, render_value, Converter, Formatter, Operation};

// =============================================================================
// Re-exports - CSV
// =============================================================================

pub use parser::{detect_encoding, Dialect, Location, MemoryBuffer};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use pipeline::{execute, Pipeline, PipelineState};
pub use statistics::{Counter, Statistics, StatisticsReport};

// =============================================================================
// Re-exports - Registry
// =============================================================================

pub use controllers::{ControllerInfo, ControllerKind, ControllerRegistry, ManifestController};
