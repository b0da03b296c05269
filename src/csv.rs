//! CSV upstream source.
//!
//! Reads a CSV file as a sequence of fixed-size record batches, suitable as the
//! input of a [`GroupedBatchReader`](crate::GroupedBatchReader).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::csv::{Reader as CsvReader, ReaderBuilder};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::reader::GroupedBatchReader;
use crate::rebuffer::RegroupOptions;

/// Options for reading CSV files.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Delimiter character
    pub delimiter: u8,
    /// Whether the file has a header row
    pub has_header: bool,
    /// Rows per upstream batch
    pub batch_size: usize,
    /// Maximum number of records to infer schema from
    pub schema_infer_max_records: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            batch_size: 8192,
            schema_infer_max_records: 1000,
        }
    }
}

impl CsvOptions {
    /// Set the number of rows per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the field delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set whether the first line is a header.
    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }
}

/// A CSV file read in batches.
#[derive(Debug, Clone)]
pub struct CsvSource {
    /// Path to the CSV file
    path: PathBuf,
    /// Arrow schema
    schema: SchemaRef,
    /// CSV options
    options: CsvOptions,
}

impl CsvSource {
    /// Open a CSV file, inferring its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, CsvOptions::default())
    }

    /// Open a CSV file with custom options, inferring its schema.
    pub fn open_with_options(path: impl AsRef<Path>, options: CsvOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);

        let (schema, _) = arrow::csv::reader::Format::default()
            .with_delimiter(options.delimiter)
            .with_header(options.has_header)
            .infer_schema(&mut reader, Some(options.schema_infer_max_records))?;

        Ok(Self {
            path,
            schema: Arc::new(schema),
            options,
        })
    }

    /// Create a CSV source with a predefined schema.
    ///
    /// Use this when inference would pick the wrong type, e.g. zero-padded
    /// string keys such as `"01"` that would otherwise parse as integers.
    pub fn with_schema(path: impl AsRef<Path>, schema: SchemaRef, options: CsvOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            schema,
            options,
        }
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the schema.
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Get the options.
    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    /// Open a fresh reader over the file.
    pub fn reader(&self) -> Result<CsvReader<BufReader<File>>> {
        let file = File::open(&self.path)?;

        let csv_reader = ReaderBuilder::new(self.schema.clone())
            .with_delimiter(self.options.delimiter)
            .with_header(self.options.has_header)
            .with_batch_size(self.options.batch_size)
            .build(BufReader::new(file))?;

        Ok(csv_reader)
    }

    /// Read the file regrouped on `group_field`.
    pub fn group_by(
        &self,
        group_field: impl Into<String>,
        options: RegroupOptions,
    ) -> Result<GroupedBatchReader<CsvReader<BufReader<File>>>> {
        Ok(GroupedBatchReader::with_options(
            self.reader()?,
            group_field,
            options,
        ))
    }
}

/// Write record batches to a CSV file with a header row.
pub fn write_csv(path: impl AsRef<Path>, batches: &[RecordBatch]) -> Result<()> {
    use arrow::csv::Writer;

    let file = File::create(path)?;
    let mut writer = Writer::new(file);

    for batch in batches {
        writer.write(batch)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "value,key").unwrap();
        writeln!(file, "1,01").unwrap();
        writeln!(file, "2,01").unwrap();
        writeln!(file, "3,02").unwrap();
        writeln!(file, "4,02").unwrap();
        writeln!(file, "5,03").unwrap();
        file.flush().unwrap();
        file
    }

    fn string_key_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("value", DataType::Int64, false),
            Field::new("key", DataType::Utf8, false),
        ]))
    }

    #[test]
    fn test_csv_source_open() {
        let csv_file = create_test_csv();
        let source = CsvSource::open(csv_file.path()).unwrap();

        assert_eq!(source.schema().fields().len(), 2);
        assert_eq!(source.path(), csv_file.path());
    }

    #[test]
    fn test_csv_source_batches() {
        let csv_file = create_test_csv();
        let options = CsvOptions::default().with_batch_size(2);
        let source = CsvSource::with_schema(csv_file.path(), string_key_schema(), options);

        let sizes: Vec<usize> = source
            .reader()
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_csv_source_group_by() {
        let csv_file = create_test_csv();
        let options = CsvOptions::default().with_batch_size(3);
        let source = CsvSource::with_schema(csv_file.path(), string_key_schema(), options);

        let sizes: Vec<usize> = source
            .group_by("key", RegroupOptions::default())
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_write_csv() {
        let csv_file = create_test_csv();
        let source = CsvSource::with_schema(
            csv_file.path(),
            string_key_schema(),
            CsvOptions::default(),
        );
        let batches: Vec<RecordBatch> = source.reader().unwrap().map(|b| b.unwrap()).collect();

        let out = NamedTempFile::new().unwrap();
        write_csv(out.path(), &batches).unwrap();

        let copy = CsvSource::with_schema(out.path(), string_key_schema(), CsvOptions::default());
        let rows: usize = copy.reader().unwrap().map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 5);
    }
}
