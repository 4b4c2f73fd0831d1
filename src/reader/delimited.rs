use std::sync::Arc;

use csv::{ReaderBuilder, StringRecordsIntoIter};
use tracing::{debug, info};

use super::{Record, RecordStream, RowIter, Value};
use crate::error::{Error, Result};
use crate::storage::{FileHandle, OpenMode, StorageBackend};

const PARQUET_MAGIC: &[u8] = b"PAR1";

/// Delimited text files with a header row. Every value is returned as text.
#[derive(Clone, Copy)]
pub struct CsvReader<'a> {
    backend: &'a StorageBackend,
}

impl<'a> CsvReader<'a> {
    pub fn new(backend: &'a StorageBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &'a StorageBackend {
        self.backend
    }

    pub fn col_names(&self, filename: &str, delimiter: u8) -> Result<Vec<String>> {
        info!(filename, "Getting column names");
        let (columns, _) = open_rows(self.backend, filename, delimiter)?;
        debug!(filename, ?columns, "Fields");
        Ok(columns.to_vec())
    }

    pub fn iterate(&self, filename: &str, delimiter: u8) -> RecordStream<'a> {
        let backend = self.backend;
        let filename = filename.to_string();
        RecordStream::new(move || {
            let (columns, rows) = open_rows(backend, &filename, delimiter)?;
            Ok(Box::new(CsvRows {
                filename,
                columns,
                rows,
            }) as RowIter)
        })
    }
}

fn open_rows(
    backend: &StorageBackend,
    filename: &str,
    delimiter: u8,
) -> Result<(Arc<[String]>, StringRecordsIntoIter<FileHandle>)> {
    let handle = backend.open(filename, OpenMode::Text)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(handle);

    let raw = reader
        .byte_headers()
        .map_err(|e| Error::decode(filename, e))?;
    if raw.as_slice().starts_with(PARQUET_MAGIC) {
        return Err(Error::decode(filename, "file is Parquet-encoded, not delimited text"));
    }

    let columns: Arc<[String]> = reader
        .headers()
        .map_err(|e| Error::decode(filename, e))?
        .iter()
        .map(String::from)
        .collect();
    Ok((columns, reader.into_records()))
}

struct CsvRows {
    filename: String,
    columns: Arc<[String]>,
    rows: StringRecordsIntoIter<FileHandle>,
}

impl Iterator for CsvRows {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(Error::decode(&self.filename, e))),
        };

        // Short rows are padded with nulls, surplus fields are dropped.
        let values = (0..self.columns.len())
            .map(|i| match row.get(i) {
                Some(field) => Value::Text(field.to_string()),
                None => Value::Null,
            })
            .collect();
        Some(Ok(Record::new(self.columns.clone(), values)))
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::reader::{DataFormat, DataReader, Value};
    use crate::settings::Settings;
    use crate::storage::StorageContext;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn context_with(files: &[(&str, &[u8])]) -> (TempDir, StorageContext) {
        let dir = tempdir().unwrap();
        for (name, contents) in files {
            fs::write(dir.path().join(name), contents).unwrap();
        }
        let context = StorageContext::new(Settings::local(dir.path()));
        (dir, context)
    }

    #[test]
    fn test_pipe_delimited_by_default() {
        let (_dir, context) = context_with(&[("abc.csv", b"a|b|c\n1|2|3\n4|5|6\n")]);
        let reader = DataReader::new(&context, DataFormat::Csv).unwrap();

        assert_eq!(reader.col_names("abc.csv", None).unwrap(), vec!["a", "b", "c"]);

        let records: Vec<_> = reader
            .iterate("abc.csv", None)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("a"), Some(&Value::Text("1".into())));
        assert_eq!(records[0].get("c"), Some(&Value::Text("3".into())));
        assert_eq!(records[1].get("b"), Some(&Value::Text("5".into())));
    }

    #[test]
    fn test_unset_delimiter_is_not_comma() {
        let (_dir, context) = context_with(&[("comma.csv", b"a,b,c\n1,2,3\n")]);
        let reader = DataReader::new(&context, DataFormat::Csv).unwrap();

        assert_eq!(reader.col_names("comma.csv", None).unwrap(), vec!["a,b,c"]);
        assert_eq!(
            reader.col_names("comma.csv", Some(b',')).unwrap(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_streams_are_independent() {
        let (_dir, context) = context_with(&[("ids.csv", b"id\n1\n2\n3\n")]);
        let reader = DataReader::new(&context, DataFormat::Csv).unwrap();

        let mut first = reader.iterate("ids.csv", None);
        first.next().unwrap().unwrap();
        let second: Vec<_> = reader.iterate("ids.csv", None).map(|r| r.unwrap()).collect();
        assert_eq!(second.len(), 3);
        assert_eq!(first.count(), 2);
    }

    #[test]
    fn test_values_stay_text() {
        let (_dir, context) = context_with(&[("typed.csv", b"n|f|e\n42|0.5|\n")]);
        let reader = DataReader::new(&context, DataFormat::Csv).unwrap();

        let record = reader.iterate("typed.csv", None).next().unwrap().unwrap();
        assert_eq!(record.values(), &[
            Value::Text("42".into()),
            Value::Text("0.5".into()),
            Value::Text("".into()),
        ]);
    }

    #[test]
    fn test_short_rows_are_padded() {
        let (_dir, context) = context_with(&[("short.csv", b"a|b|c\n1|2\n1|2|3|4\n")]);
        let reader = DataReader::new(&context, DataFormat::Csv).unwrap();

        let records: Vec<_> = reader.iterate("short.csv", None).map(|r| r.unwrap()).collect();
        assert_eq!(records[0].get("c"), Some(&Value::Null));
        assert_eq!(records[1].len(), 3);
    }

    #[test]
    fn test_parquet_bytes_are_rejected() {
        let (_dir, context) = context_with(&[("fake.csv", b"PAR1\x15\x04\x15\x00\x00")]);
        let reader = DataReader::new(&context, DataFormat::Csv).unwrap();

        assert!(matches!(reader.col_names("fake.csv", None), Err(Error::Decode { .. })));
        assert!(matches!(
            reader.iterate("fake.csv", None).next(),
            Some(Err(Error::Decode { .. }))
        ));
    }

    #[test]
    fn test_missing_file() {
        let (_dir, context) = context_with(&[]);
        let reader = DataReader::new(&context, DataFormat::Csv).unwrap();
        assert!(matches!(reader.col_names("nope.csv", None), Err(Error::NotFound(_))));
    }
}
