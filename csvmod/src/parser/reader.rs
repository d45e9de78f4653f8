//! `csv`-backed record source.

use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;
use std::fs::File;
use std::io::{Cursor, Read};

use super::{resolve_encoding, Dialect, Location, RecordSource};
use crate::error::{CsvError, CsvResult, PipelineResult};

/// Bytes inspected when the encoding is `auto`
const DETECTION_SAMPLE: usize = 64 * 1024;

/// Longest byte order mark
const BOM_SAMPLE: usize = 3;

/// A forward-only reader over one delimited file.
pub struct CsvSource {
    name: String,
    headers: Vec<String>,
    encoding: &'static Encoding,
    reader: Option<csv::Reader<Box<dyn Read>>>,
    record: csv::ByteRecord,
}

impl CsvSource {
    /// Open `location` and read its header line.
    pub fn open(name: impl Into<String>, location: &Location, dialect: &Dialect) -> PipelineResult<Self> {
        let name = name.into();
        let (delimiter, quote) = dialect.bytes()?;

        let (input, encoding) = match location {
            Location::File(path) => {
                let mut file = File::open(path).map_err(CsvError::from)?;
                let limit = if dialect.encoding.eq_ignore_ascii_case("auto") {
                    DETECTION_SAMPLE
                } else {
                    BOM_SAMPLE
                };
                let mut sample = Vec::new();
                file.by_ref()
                    .take(limit as u64)
                    .read_to_end(&mut sample)
                    .map_err(CsvError::from)?;
                let encoding = source_encoding(&dialect.encoding, &sample)?;
                (Box::new(Cursor::new(sample).chain(file)) as Box<dyn Read>, encoding)
            }
            Location::Inline(contents) => {
                let bytes = contents.clone().into_bytes();
                let encoding = source_encoding(&dialect.encoding, &bytes)?;
                (Box::new(Cursor::new(bytes)) as Box<dyn Read>, encoding)
            }
            Location::Memory(buffer) => {
                let bytes = buffer.bytes();
                let encoding = source_encoding(&dialect.encoding, &bytes)?;
                (Box::new(Cursor::new(bytes)) as Box<dyn Read>, encoding)
            }
        };

        // csv splits bytes, so anything but UTF-8 is transcoded first
        let input: Box<dyn Read> = if encoding == UTF_8 {
            input
        } else {
            Box::new(DecodeReaderBytesBuilder::new().encoding(Some(encoding)).build(input))
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .quote(quote)
            .flexible(true)
            .from_reader(input);

        let raw_headers = reader.byte_headers().map_err(CsvError::from)?.clone();
        if raw_headers.is_empty() {
            return Err(CsvError::NoHeaders(name).into());
        }

        let mut headers = Vec::with_capacity(raw_headers.len());
        for (i, field) in raw_headers.iter().enumerate() {
            let decoded = decode(field, encoding, &name)?;
            let decoded = if i == 0 {
                decoded.trim_start_matches('\u{feff}')
            } else {
                decoded
            };
            headers.push(decoded.to_string());
        }

        Ok(Self {
            name,
            headers,
            encoding,
            reader: Some(reader),
            record: csv::ByteRecord::new(),
        })
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

impl RecordSource for CsvSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn next_record(&mut self) -> CsvResult<Option<Vec<String>>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        if !reader.read_byte_record(&mut self.record)? {
            return Ok(None);
        }

        let mut values = Vec::with_capacity(self.headers.len());
        for field in self.record.iter() {
            values.push(decode(field, self.encoding, &self.name)?.to_string());
        }
        Ok(Some(values))
    }

    fn close(&mut self) -> CsvResult<()> {
        self.reader = None;
        Ok(())
    }
}

/// A byte order mark wins over the configured label.
fn source_encoding(label: &str, sample: &[u8]) -> CsvResult<&'static Encoding> {
    match Encoding::for_bom(sample) {
        Some((encoding, _)) => Ok(encoding),
        None => resolve_encoding(label, sample),
    }
}

/// Non-UTF-8 input is transcoded before parsing, so only raw UTF-8 can fail here.
fn decode<'a>(bytes: &'a [u8], encoding: &'static Encoding, name: &str) -> CsvResult<&'a str> {
    std::str::from_utf8(bytes).map_err(|_| CsvError::Encoding {
        source_name: name.to_string(),
        encoding: encoding.name().to_string(),
    })
}
