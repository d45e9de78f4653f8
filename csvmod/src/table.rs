//! Decoded tables.
//!
//! [`TableReader`] wraps a raw [`RecordSource`] with one source's decoding
//! configuration: header contract, projection, aliases and converters. The
//! primary input and every join source read through it, so both decode
//! records the same way. [`TableWriter`] is the encoding counterpart for
//! the output sink.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::alias::AliasTable;
use crate::config::{OutputConfig, SourceConfig};
use crate::convert::{render_value, ConverterMap, FormatterMap};
use crate::error::{ConfigError, CsvError, PipelineResult, RowError};
use crate::join::JoinRegistry;
use crate::parser::{CsvSink, CsvSource, RecordSink, RecordSource};
use crate::row::{Fields, Row};

// =============================================================================
// Reader
// =============================================================================

pub struct TableReader {
    name: Arc<str>,
    source: Box<dyn RecordSource>,
    header: Vec<String>,
    fields: Vec<String>,
    converters: ConverterMap,
    aliases: Arc<AliasTable>,
    joins: JoinRegistry,
    records: usize,
}

impl TableReader {
    /// Open the configured location and validate its header.
    pub fn open(config: &SourceConfig) -> PipelineResult<Self> {
        let location = config
            .location
            .as_ref()
            .ok_or_else(|| ConfigError::MissingLocation(config.name.clone()))?;
        let source = CsvSource::open(config.name.clone(), location, &config.dialect)?;
        Self::from_source(Box::new(source), config)
    }

    /// Wrap an already opened source.
    pub fn from_source(source: Box<dyn RecordSource>, config: &SourceConfig) -> PipelineResult<Self> {
        let header = source.headers().to_vec();

        let fields = match &config.fields {
            Some(declared) => {
                let resolved = config.aliases.resolve_all(declared);
                // Report the list as declared, not as resolved
                config.header.check(&resolved, &header).map_err(|e| match e {
                    CsvError::HeaderMismatch { actual, .. } => CsvError::HeaderMismatch {
                        expected: declared.clone(),
                        actual,
                    },
                    other => other,
                })?;
                resolved
            }
            None => header.clone(),
        };

        let mut converters = ConverterMap::with_capacity(config.converters.len());
        for (field, converter) in &config.converters {
            let canonical = config.aliases.canonical(field);
            if !header.iter().any(|h| h == canonical) {
                return Err(RowError::UnknownField {
                    field: field.clone(),
                    source_id: Some(config.name.clone()),
                }
                .into());
            }
            converters.insert(canonical.to_string(), converter.clone());
        }

        Ok(Self {
            name: Arc::from(config.name.as_str()),
            source,
            header,
            fields,
            converters,
            aliases: Arc::new(config.aliases.clone()),
            joins: JoinRegistry::new(),
            records: 0,
        })
    }

    /// Joins attached to every row this reader yields.
    pub fn with_joins(mut self, joins: JoinRegistry) -> Self {
        self.joins = joins;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Header as discovered in the file
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Fields every decoded record carries, in order
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn joins(&self) -> &JoinRegistry {
        &self.joins
    }

    /// Records pulled from the underlying source so far
    pub fn records_read(&self) -> usize {
        self.records
    }

    /// Decode the next record: projection, then conversion.
    pub fn next_fields(&mut self) -> PipelineResult<Option<Fields>> {
        let Some(values) = self.source.next_record()? else {
            return Ok(None);
        };
        self.records += 1;

        let mut fields = Map::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = self
                .header
                .iter()
                .position(|h| h == field)
                .and_then(|i| values.get(i))
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null);
            fields.insert(field.clone(), value);
        }

        for (field, converter) in &self.converters {
            if let Some(value) = fields.get_mut(field) {
                *value = converter.convert(field, value)?;
            }
        }

        Ok(Some(fields))
    }

    /// Decode the next record into a [`Row`].
    pub fn next_row(&mut self) -> PipelineResult<Option<Row>> {
        Ok(self.next_fields()?.map(|fields| {
            Row::with_context(
                fields,
                Arc::clone(&self.aliases),
                self.joins.clone(),
                Some(Arc::clone(&self.name)),
            )
        }))
    }

    pub fn close(&mut self) -> PipelineResult<()> {
        self.source.close()?;
        Ok(())
    }
}

// =============================================================================
// Writer
// =============================================================================

pub struct TableWriter {
    sink: Box<dyn RecordSink>,
    columns: Vec<String>,
    /// Row field feeding each column
    sources: Vec<String>,
    formatters: FormatterMap,
    written: usize,
}

impl TableWriter {
    /// Create the target and write its header line.
    pub fn open(config: &OutputConfig, default_fields: &[String]) -> PipelineResult<Self> {
        let location = config
            .location
            .as_ref()
            .ok_or_else(|| ConfigError::MissingLocation(config.name.clone()))?;
        let sink = CsvSink::open(config.name.clone(), location, &config.dialect)?;
        Self::from_sink(Box::new(sink), config, default_fields)
    }

    pub fn from_sink(
        mut sink: Box<dyn RecordSink>,
        config: &OutputConfig,
        default_fields: &[String],
    ) -> PipelineResult<Self> {
        let columns = config
            .fields
            .clone()
            .unwrap_or_else(|| default_fields.to_vec());
        let sources = config.aliases.resolve_all(&columns);

        sink.write_record(&columns)?;

        Ok(Self {
            sink,
            columns,
            sources,
            formatters: config.formatters.clone(),
            written: 0,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Render `row` into the declared columns and emit it.
    pub fn write_row(&mut self, row: &Row) -> PipelineResult<()> {
        let mut record = Vec::with_capacity(self.columns.len());
        for (column, field) in self.columns.iter().zip(&self.sources) {
            let rendered = match row.get(field) {
                Ok(value) => match self.formatters.get(field).or_else(|| self.formatters.get(column)) {
                    Some(formatter) => formatter.format(field, value)?,
                    None => render_value(value),
                },
                Err(_) => String::new(),
            };
            record.push(rendered);
        }

        self.sink.write_record(&record)?;
        self.written += 1;
        Ok(())
    }

    pub fn close(&mut self) -> PipelineResult<()> {
        self.sink.close()?;
        Ok(())
    }
}
