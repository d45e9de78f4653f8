//! Delimited-text plumbing.
//!
//! The row engine only sees two traits: [`RecordSource`], a forward-only
//! stream of raw records with a header, and [`RecordSink`], which accepts
//! rendered records. The `csv` crate does quoting and escaping;
//! `encoding_rs` and `chardet` handle non-UTF-8 files.

pub mod reader;
pub mod writer;

pub use reader::CsvSource;
pub use writer::CsvSink;

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::{ConfigError, ConfigResult, CsvError, CsvResult};

// =============================================================================
// Dialect
// =============================================================================

/// Delimiter, quote character and encoding of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialect {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default = "default_quote")]
    pub quote: char,

    /// WHATWG encoding label, or `auto` to detect from the first bytes
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_delimiter() -> char {
    ';'
}

fn default_quote() -> char {
    '"'
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            quote: default_quote(),
            encoding: default_encoding(),
        }
    }
}

impl Dialect {
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = quote;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// Delimiter and quote as the single bytes the csv crate expects.
    pub fn bytes(&self) -> ConfigResult<(u8, u8)> {
        Ok((single_byte(self.delimiter, "delimiter")?, single_byte(self.quote, "quote")?))
    }
}

fn single_byte(c: char, what: &str) -> ConfigResult<u8> {
    if c.is_ascii() {
        Ok(c as u8)
    } else {
        Err(ConfigError::InvalidDialect(format!("{} '{}' is not a single-byte character", what, c)))
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-15".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Resolve an encoding label; `auto` inspects `sample`.
pub fn resolve_encoding(label: &str, sample: &[u8]) -> CsvResult<&'static Encoding> {
    let label = if label.eq_ignore_ascii_case("auto") {
        detect_encoding(sample)
    } else {
        label.to_string()
    };

    Encoding::for_label(label.as_bytes()).ok_or(CsvError::UnknownEncoding(label))
}

// =============================================================================
// Locations
// =============================================================================

/// Where a source reads from or a sink writes to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// A file on disk
    File(PathBuf),

    /// Literal file contents (sources only)
    Inline(String),

    /// An in-process buffer (sinks only)
    #[serde(skip)]
    Memory(MemoryBuffer),
}

impl Location {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Location::File(path.into())
    }

    pub fn inline(contents: impl Into<String>) -> Self {
        Location::Inline(contents.into())
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            Location::File(path) => path.display().to_string(),
            Location::Inline(_) => "<inline>".to_string(),
            Location::Memory(_) => "<memory>".to_string(),
        }
    }
}

/// Shared byte buffer a sink can write into, readable after the run.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer(Rc<RefCell<Vec<u8>>>);

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    /// Buffer contents, lossily decoded as UTF-8
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).to_string()
    }
}

impl Write for MemoryBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Traits
// =============================================================================

/// A forward-only stream of raw records.
pub trait RecordSource {
    /// Label used in logs and error messages
    fn name(&self) -> &str;

    /// The header discovered when the source was opened
    fn headers(&self) -> &[String];

    /// Next record's values, positionally matching [`RecordSource::headers`]
    fn next_record(&mut self) -> CsvResult<Option<Vec<String>>>;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self) -> CsvResult<()>;
}

/// Destination for rendered records.
pub trait RecordSink {
    fn name(&self) -> &str;

    fn write_record(&mut self, values: &[String]) -> CsvResult<()>;

    /// Flush and release the underlying handle. Idempotent.
    fn close(&mut self) -> CsvResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_defaults() {
        let dialect: Dialect = serde_json::from_str("{}").unwrap();
        assert_eq!(dialect, Dialect::default());
        assert_eq!(dialect.bytes().unwrap(), (b';', b'"'));
    }

    #[test]
    fn test_dialect_rejects_multibyte() {
        let dialect = Dialect::default().with_delimiter('§');
        assert!(matches!(dialect.bytes(), Err(ConfigError::InvalidDialect(_))));
    }

    #[test]
    fn test_resolve_encoding() {
        assert_eq!(resolve_encoding("utf-8", b"").unwrap(), encoding_rs::UTF_8);
        assert_eq!(resolve_encoding("latin1", b"").unwrap(), encoding_rs::WINDOWS_1252);
        assert!(matches!(
            resolve_encoding("klingon", b""),
            Err(CsvError::UnknownEncoding(label)) if label == "klingon"
        ));
    }

    #[test]
    fn test_auto_encoding_ascii() {
        assert_eq!(resolve_encoding("auto", b"a;b\n1;2\n").unwrap(), encoding_rs::UTF_8);
    }

    #[test]
    fn test_location_deserialize() {
        let loc: Location = serde_json::from_str(r#"{"file": "prices.csv"}"#).unwrap();
        assert_eq!(loc.describe(), "prices.csv");
        let loc: Location = serde_json::from_str(r#"{"inline": "a;b"}"#).unwrap();
        assert_eq!(loc.describe(), "<inline>");
    }

    #[test]
    fn test_memory_buffer_shared() {
        let buffer = MemoryBuffer::new();
        let mut writer = buffer.clone();
        writer.write_all(b"hello").unwrap();
        assert_eq!(buffer.contents(), "hello");
    }
}
