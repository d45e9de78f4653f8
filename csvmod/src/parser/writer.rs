//! `csv`-backed record sink.

use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::fs::{create_dir_all, File};
use std::io::Write;

use super::{resolve_encoding, Dialect, Location, RecordSink};
use crate::error::{ConfigError, CsvError, CsvResult, PipelineResult};

/// Writes records to one delimited file.
pub struct CsvSink {
    name: String,
    encoding: &'static Encoding,
    writer: Option<csv::Writer<Box<dyn Write>>>,
}

impl CsvSink {
    /// Create (or truncate) the target and prepare the writer.
    pub fn open(name: impl Into<String>, location: &Location, dialect: &Dialect) -> PipelineResult<Self> {
        let name = name.into();
        let (delimiter, quote) = dialect.bytes()?;
        // Nothing to sniff when writing
        let encoding = if dialect.encoding.eq_ignore_ascii_case("auto") {
            UTF_8
        } else {
            resolve_encoding(&dialect.encoding, &[])?
        };
        // encoding_rs writes UTF-8 for UTF-16 and replacement labels
        if encoding.output_encoding() != encoding {
            return Err(ConfigError::InvalidDialect(format!(
                "'{}' cannot be written as {}",
                name,
                encoding.name()
            ))
            .into());
        }

        let output: Box<dyn Write> = match location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        create_dir_all(parent).map_err(CsvError::from)?;
                    }
                }
                Box::new(File::create(path).map_err(CsvError::from)?)
            }
            Location::Memory(buffer) => Box::new(buffer.clone()),
            Location::Inline(_) => {
                return Err(ConfigError::InvalidDialect(format!(
                    "'{}' cannot write to inline data",
                    name
                ))
                .into());
            }
        };

        let writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .quote(quote)
            .from_writer(output);

        Ok(Self {
            name,
            encoding,
            writer: Some(writer),
        })
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl RecordSink for CsvSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_record(&mut self, values: &[String]) -> CsvResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| CsvError::Csv(format!("{} is closed", self.name)))?;

        let mut encoded: Vec<Cow<'_, [u8]>> = Vec::with_capacity(values.len());
        for value in values {
            encoded.push(encode(value, self.encoding, &self.name)?);
        }
        writer.write_record(encoded.iter().map(|v| v.as_ref()))?;
        Ok(())
    }

    fn close(&mut self) -> CsvResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

fn encode<'a>(value: &'a str, encoding: &'static Encoding, name: &str) -> CsvResult<Cow<'a, [u8]>> {
    if encoding == UTF_8 {
        return Ok(Cow::Borrowed(value.as_bytes()));
    }

    let (bytes, _, had_errors) = encoding.encode(value);
    if had_errors {
        return Err(CsvError::Encoding {
            source_name: name.to_string(),
            encoding: encoding.name().to_string(),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::parser::MemoryBuffer;
    use tempfile::tempdir;

    fn row(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_memory_sink() {
        let buffer = MemoryBuffer::new();
        let mut sink = CsvSink::open("target", &Location::Memory(buffer.clone()), &Dialect::default()).unwrap();

        sink.write_record(&row(&["a", "b"])).unwrap();
        sink.write_record(&row(&["1", "x;y"])).unwrap();
        sink.close().unwrap();

        assert_eq!(buffer.contents(), "a;b\n1;\"x;y\"\n");
    }

    #[test]
    fn test_file_sink_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        let dialect = Dialect::default().with_delimiter('\t');

        let mut sink = CsvSink::open("target", &Location::file(&path), &dialect).unwrap();
        sink.write_record(&row(&["id", "name"])).unwrap();
        sink.close().unwrap();
        assert!(!sink.is_open());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id\tname\n");
    }

    #[test]
    fn test_latin1_encoding() {
        let buffer = MemoryBuffer::new();
        let dialect = Dialect::default().with_encoding("iso-8859-1");
        let mut sink = CsvSink::open("target", &Location::Memory(buffer.clone()), &dialect).unwrap();
        sink.write_record(&row(&["é"])).unwrap();
        sink.close().unwrap();

        assert_eq!(buffer.bytes(), vec![0xE9, b'\n']);
    }

    #[test]
    fn test_utf16_output_rejected() {
        let buffer = MemoryBuffer::new();
        let dialect = Dialect::default().with_encoding("utf-16le");
        let result = CsvSink::open("target", &Location::Memory(buffer.clone()), &dialect);

        assert!(matches!(
            result,
            Err(PipelineError::Config(ConfigError::InvalidDialect(message))) if message.contains("UTF-16LE")
        ));
        assert!(buffer.bytes().is_empty());
    }

    #[test]
    fn test_write_after_close_fails() {
        let buffer = MemoryBuffer::new();
        let mut sink = CsvSink::open("target", &Location::Memory(buffer), &Dialect::default()).unwrap();
        sink.close().unwrap();
        assert!(sink.write_record(&row(&["x"])).is_err());
    }

    #[test]
    fn test_inline_is_not_writable() {
        let result = CsvSink::open("target", &Location::inline(""), &Dialect::default());
        assert!(result.is_err());
    }
}
