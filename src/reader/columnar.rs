use std::fs::File;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use tracing::{debug, info};

use super::{Record, RecordStream, RowIter, Value};
use crate::error::{Error, Result};
use crate::storage::{OpenMode, StorageBackend};

/// Parquet and GeoParquet files, streamed in fixed-size batches.
#[derive(Clone, Copy)]
pub struct ParquetReader<'a> {
    backend: &'a StorageBackend,
    batch_size: usize,
}

impl<'a> ParquetReader<'a> {
    pub fn new(backend: &'a StorageBackend, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    pub fn backend(&self) -> &'a StorageBackend {
        self.backend
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Column names from the file footer; no data pages are read.
    pub fn col_names(&self, filename: &str) -> Result<Vec<String>> {
        let builder = open_builder(self.backend, filename)?;
        let columns = column_names(&builder);
        debug!(filename, ?columns, "Fields");
        Ok(columns)
    }

    pub fn iterate(&self, filename: &str) -> RecordStream<'a> {
        let backend = self.backend;
        let batch_size = self.batch_size;
        let filename = filename.to_string();
        RecordStream::new(move || {
            let builder = open_builder(backend, &filename)?;
            let columns: Arc<[String]> = column_names(&builder).into();
            info!(
                filename = %filename,
                rows = builder.metadata().file_metadata().num_rows(),
                batch_size,
                "Streaming parquet file"
            );
            let batches = builder
                .with_batch_size(batch_size)
                .build()
                .map_err(|e| Error::decode(&filename, e))?;
            Ok(Box::new(ParquetRows {
                filename,
                columns,
                batches,
                current: None,
                row: 0,
            }) as RowIter)
        })
    }
}

fn open_builder(
    backend: &StorageBackend,
    filename: &str,
) -> Result<ParquetRecordBatchReaderBuilder<File>> {
    let file = backend.open(filename, OpenMode::Binary)?.into_file();
    ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| Error::decode(filename, e))
}

fn column_names(builder: &ParquetRecordBatchReaderBuilder<File>) -> Vec<String> {
    builder
        .schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect()
}

/// Flattens batches into rows; holds at most one batch.
struct ParquetRows {
    filename: String,
    columns: Arc<[String]>,
    batches: ParquetRecordBatchReader,
    current: Option<RecordBatch>,
    row: usize,
}

impl Iterator for ParquetRows {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = &self.current {
                if self.row < batch.num_rows() {
                    let record = batch_row(batch, self.row, &self.columns)
                        .map_err(|reason| Error::decode(&self.filename, reason));
                    self.row += 1;
                    return Some(record);
                }
            }

            match self.batches.next()? {
                Ok(batch) => {
                    self.current = Some(batch);
                    self.row = 0;
                }
                Err(e) => return Some(Err(Error::decode(&self.filename, e))),
            }
        }
    }
}

fn batch_row(
    batch: &RecordBatch,
    row: usize,
    columns: &Arc<[String]>,
) -> std::result::Result<Record, String> {
    let values = batch
        .columns()
        .iter()
        .map(|array| cell(array, row))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Record::new(columns.clone(), values))
}

fn cell(array: &ArrayRef, row: usize) -> std::result::Result<Value, String> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        DataType::Null => Value::Null,
        DataType::Boolean => Value::Bool(array.as_boolean().value(row)),
        DataType::Int8 => Value::Int(array.as_primitive::<Int8Type>().value(row) as i64),
        DataType::Int16 => Value::Int(array.as_primitive::<Int16Type>().value(row) as i64),
        DataType::Int32 => Value::Int(array.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => Value::Int(array.as_primitive::<UInt8Type>().value(row) as i64),
        DataType::UInt16 => Value::Int(array.as_primitive::<UInt16Type>().value(row) as i64),
        DataType::UInt32 => Value::Int(array.as_primitive::<UInt32Type>().value(row) as i64),
        DataType::UInt64 => {
            let v = array.as_primitive::<UInt64Type>().value(row);
            i64::try_from(v).map(Value::Int).unwrap_or(Value::Float(v as f64))
        }
        DataType::Float32 => Value::Float(array.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Value::Text(array.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::Text(array.as_string::<i64>().value(row).to_string()),
        DataType::Binary => Value::Binary(array.as_binary::<i32>().value(row).to_vec()),
        DataType::LargeBinary => Value::Binary(array.as_binary::<i64>().value(row).to_vec()),
        // Dates, decimals, nested types: rendered as text.
        _ => Value::Text(array_value_to_string(array, row).map_err(|e| e.to_string())?),
    };
    Ok(value)
}
