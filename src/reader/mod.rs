//! Uniform record access over delimited text and (Geo)Parquet files.
//!
//! A [`DataReader`] is picked by format label, obtains its backend from a
//! [`StorageContext`], and exposes two operations: the ordered column names of
//! a file and a lazy [`RecordStream`] of its rows. The reader itself keeps no
//! per-call state, so one instance can serve any number of streams.

mod columnar;
mod delimited;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::storage::{StorageBackend, StorageContext};

pub use columnar::ParquetReader;
pub use delimited::CsvReader;

pub const DEFAULT_DELIMITER: u8 = b'|';

/// Accepted format labels, for error messages.
pub const FORMAT_LABELS: &[&str] = &["csv", "parquet", "geoparquet"];

/// One cell of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Numeric view of the value; text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// JSON form used for feature attributes. Binary cells become lowercase
    /// hex strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Binary(bytes) => JsonValue::String(hex(bytes)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str(""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => f.write_str(s),
            Value::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// One row: values keyed by the file's column names, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Format a reader decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Parquet,
}

impl DataFormat {
    /// Pick a format from a case-insensitive label.
    pub fn select(label: Option<&str>) -> Result<Self> {
        let label = match label.map(str::trim) {
            Some(l) if !l.is_empty() => l,
            _ => {
                return Err(Error::Usage(format!(
                    "A value of {{ {} }} must be given for the reader format",
                    FORMAT_LABELS.join(", ")
                )))
            }
        };

        match label.to_lowercase().as_str() {
            "parquet" | "geoparquet" => Ok(DataFormat::Parquet),
            "csv" => Ok(DataFormat::Csv),
            _ => Err(Error::Usage(format!(
                "A valid reader format must be given. Value given : {} .",
                label
            ))),
        }
    }
}

impl FromStr for DataFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DataFormat::select(Some(s))
    }
}

/// Reader for one format, bound to the context's backend.
pub enum DataReader<'a> {
    Csv(CsvReader<'a>),
    Parquet(ParquetReader<'a>),
}

impl<'a> DataReader<'a> {
    pub fn new(context: &'a StorageContext, format: DataFormat) -> Result<Self> {
        let backend = context.resolve()?;
        Ok(match format {
            DataFormat::Csv => DataReader::Csv(CsvReader::new(backend)),
            DataFormat::Parquet => DataReader::Parquet(ParquetReader::new(
                backend,
                context.settings().read_chunk_size,
            )),
        })
    }

    /// Select by label, then construct.
    pub fn for_label(context: &'a StorageContext, label: Option<&str>) -> Result<Self> {
        Self::new(context, DataFormat::select(label)?)
    }

    pub fn format(&self) -> DataFormat {
        match self {
            DataReader::Csv(_) => DataFormat::Csv,
            DataReader::Parquet(_) => DataFormat::Parquet,
        }
    }

    fn backend(&self) -> &'a StorageBackend {
        match self {
            DataReader::Csv(r) => r.backend(),
            DataReader::Parquet(r) => r.backend(),
        }
    }

    /// Names of everything under the backend root.
    pub fn list_contents(&self) -> Result<Vec<String>> {
        self.backend().list_contents()
    }

    /// Ordered column names of `filename`. `delimiter` defaults to `|` and is
    /// ignored for Parquet.
    pub fn col_names(&self, filename: &str, delimiter: Option<u8>) -> Result<Vec<String>> {
        match self {
            DataReader::Csv(r) => r.col_names(filename, delimiter.unwrap_or(DEFAULT_DELIMITER)),
            DataReader::Parquet(r) => r.col_names(filename),
        }
    }

    /// Lazy rows of `filename`. The file is opened when the first record is
    /// pulled; each call produces an independent stream.
    pub fn iterate(&self, filename: &str, delimiter: Option<u8>) -> RecordStream<'a> {
        match self {
            DataReader::Csv(r) => r.iterate(filename, delimiter.unwrap_or(DEFAULT_DELIMITER)),
            DataReader::Parquet(r) => r.iterate(filename),
        }
    }
}

pub(crate) type RowIter = Box<dyn Iterator<Item = Result<Record>>>;
type Opener<'a> = Box<dyn FnOnce() -> Result<RowIter> + 'a>;

enum StreamState<'a> {
    Pending(Opener<'a>),
    Open(RowIter),
    Finished,
}

/// Forward-only sequence of records from one file.
///
/// Opens the file on the first pull and releases it as soon as the rows are
/// exhausted or an error is produced; after an error the stream is finished.
pub struct RecordStream<'a> {
    state: StreamState<'a>,
}

impl<'a> RecordStream<'a> {
    pub(crate) fn new<F>(opener: F) -> Self
    where
        F: FnOnce() -> Result<RowIter> + 'a,
    {
        Self {
            state: StreamState::Pending(Box::new(opener)),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, StreamState::Finished)
    }
}

impl<'a> Iterator for RecordStream<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, StreamState::Pending(_)) {
            if let StreamState::Pending(opener) =
                std::mem::replace(&mut self.state, StreamState::Finished)
            {
                match opener() {
                    Ok(rows) => self.state = StreamState::Open(rows),
                    Err(e) => return Some(Err(e)),
                }
            }
        }

        let StreamState::Open(rows) = &mut self.state else {
            return None;
        };
        match rows.next() {
            Some(Ok(record)) => Some(Ok(record)),
            Some(Err(e)) => {
                self.state = StreamState::Finished;
                Some(Err(e))
            }
            None => {
                self.state = StreamState::Finished;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_select_supported_labels() {
        for label in ["csv", "CSV", "Csv"] {
            assert_eq!(DataFormat::select(Some(label)).unwrap(), DataFormat::Csv);
        }
        for label in ["parquet", "PARQUET", "geoparquet", "GeoParquet"] {
            assert_eq!(DataFormat::select(Some(label)).unwrap(), DataFormat::Parquet);
        }
    }

    #[test]
    fn test_select_unknown_label() {
        for label in ["json", "shp", "xlsx", "parquet2"] {
            let err = DataFormat::select(Some(label)).unwrap_err();
            assert!(matches!(err, Error::Usage(_)));
            assert!(err.to_string().contains(label));
        }
    }

    #[test]
    fn test_select_empty_label_lists_valid_values() {
        for label in [None, Some(""), Some("   ")] {
            let err = DataFormat::select(label).unwrap_err();
            assert!(matches!(err, Error::Usage(_)));
            assert!(err.to_string().contains("csv, parquet, geoparquet"));
        }
    }

    #[test]
    fn test_from_str_delegates_to_select() {
        assert_eq!("geoparquet".parse::<DataFormat>().unwrap(), DataFormat::Parquet);
        assert!("".parse::<DataFormat>().is_err());
    }

    #[test]
    fn test_record_lookup_and_order() {
        let columns: Arc<[String]> = vec!["a".to_string(), "b".to_string()].into();
        let record = Record::new(columns, vec![Value::Int(1), Value::Text("x".into())]);

        assert_eq!(record.get("b"), Some(&Value::Text("x".into())));
        assert_eq!(record.get("c"), None);
        let names: Vec<&str> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Text(" 12.5 ".into()).as_f64(), Some(12.5));
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Binary(vec![1]).as_f64(), None);
        assert_eq!(Value::Binary(vec![0x01, 0xab]).to_json(), JsonValue::String("01ab".into()));
        assert_eq!(Value::Float(f64::NAN).to_json(), JsonValue::Null);
    }

    #[test]
    fn test_reader_for_label_uses_context_backend() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("program.csv"), "id|name\n").unwrap();
        let context = StorageContext::new(Settings::local(dir.path()));

        let reader = DataReader::for_label(&context, Some("csv")).unwrap();
        assert_eq!(reader.format(), DataFormat::Csv);
        assert_eq!(reader.list_contents().unwrap(), vec!["program.csv"]);
        assert!(DataReader::for_label(&context, Some("xml")).is_err());
    }

    #[test]
    fn test_stream_open_error_is_first_item() {
        let dir = tempdir().unwrap();
        let context = StorageContext::new(Settings::local(dir.path()));
        let reader = DataReader::new(&context, DataFormat::Csv).unwrap();

        let mut stream = reader.iterate("absent.csv", None);
        assert!(!stream.is_finished());
        assert!(matches!(stream.next(), Some(Err(Error::NotFound(_)))));
        assert!(stream.is_finished());
        assert!(stream.next().is_none());
    }
}
