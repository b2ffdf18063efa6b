//! Reads a persisted analytics table back from the output root.
//!
//! Partition columns are not stored inside the Parquet files; they are
//! restored from the `col=value` directories of each file path and cast
//! to the column type declared for the table.

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, StringArray, new_null_array};
use arrow::compute::{CastOptions, cast, cast_with_options, concat_batches};
use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::prelude::*;
use tracing::debug;

use crate::error::{
    ComputeSnafu, DecodeParquetSnafu, ListTableSnafu, PartitionValueSnafu, ReadTableFileSnafu,
    TableError, TableTaskSnafu,
};
use crate::partition::PartitionExtractor;
use crate::schema::TableSpec;
use crate::storage::StorageProviderRef;

const FETCH_CONCURRENCY: usize = 8;

/// Loads a whole table into one batch with the table's declared schema.
#[derive(Debug, Clone)]
pub struct TableReader {
    storage: StorageProviderRef,
}

impl TableReader {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }

    /// Data files of the table, sorted. Hidden and marker files are skipped.
    pub async fn files(&self, spec: &TableSpec) -> Result<Vec<Path>, TableError> {
        let paths = self
            .storage
            .list(Some(spec.name))
            .await
            .context(ListTableSnafu { table: spec.name })?;

        Ok(paths
            .into_iter()
            .filter(|p| p.as_ref().ends_with(".parquet"))
            .filter(|p| {
                !p.parts()
                    .any(|part| part.as_ref().starts_with('_') || part.as_ref().starts_with('.'))
            })
            .collect())
    }

    /// Read every row of the table.
    ///
    /// A table with no data files yields an empty batch.
    pub async fn read(&self, spec: &TableSpec) -> Result<RecordBatch, TableError> {
        let files = self.files(spec).await?;
        let schema = spec.schema();
        if files.is_empty() {
            return Ok(RecordBatch::new_empty(schema));
        }

        let fetched: Vec<(Path, Bytes)> = futures::stream::iter(files)
            .map(|path| {
                let storage = Arc::clone(&self.storage);
                async move {
                    let bytes = storage.get(&path).await.context(ReadTableFileSnafu {
                        path: path.to_string(),
                    })?;
                    Ok::<_, TableError>((path, bytes))
                }
            })
            .buffered(FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        let table = *spec;
        let batch = tokio::task::spawn_blocking(move || decode_table(&table, &schema, fetched))
            .await
            .context(TableTaskSnafu { table: spec.name })??;

        debug!(
            table = spec.label(),
            "Read {} rows back from {}/{}",
            batch.num_rows(),
            self.storage.canonical_url(),
            spec.name
        );
        Ok(batch)
    }
}

fn decode_table(
    spec: &TableSpec,
    schema: &SchemaRef,
    files: Vec<(Path, Bytes)>,
) -> Result<RecordBatch, TableError> {
    let extractor = PartitionExtractor::new(spec.partition_columns());
    let mut batches = Vec::new();

    for (location, bytes) in files {
        let path = location.to_string();
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .and_then(|builder| builder.build())
            .context(DecodeParquetSnafu { path: path.as_str() })?;
        let values = extractor.extract(&location);

        for batch in reader {
            let batch = batch.context(ComputeSnafu { table: spec.name })?;
            batches.push(conform(spec, schema, &path, &values, &batch)?);
        }
    }

    concat_batches(schema, &batches).context(ComputeSnafu { table: spec.name })
}

/// Rebuild one decoded batch in the declared column order, restoring
/// partition columns from the file path.
fn conform(
    spec: &TableSpec,
    schema: &SchemaRef,
    path: &str,
    partition_values: &std::collections::HashMap<String, Option<String>>,
    batch: &RecordBatch,
) -> Result<RecordBatch, TableError> {
    let rows = batch.num_rows();
    let strict = CastOptions {
        safe: false,
        ..Default::default()
    };

    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let name = field.name();
            if let Some(value) = partition_values.get(name) {
                let raw: ArrayRef = Arc::new(StringArray::from(vec![value.clone(); rows]));
                return cast_with_options(&raw, field.data_type(), &strict).context(
                    PartitionValueSnafu {
                        path,
                        column: name.as_str(),
                    },
                );
            }
            match batch.column_by_name(name) {
                Some(column) if column.data_type() == field.data_type() => Ok(Arc::clone(column)),
                Some(column) => {
                    cast(column, field.data_type()).context(ComputeSnafu { table: spec.name })
                }
                None => Ok(new_null_array(field.data_type(), rows)),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    RecordBatch::try_new(Arc::clone(schema), columns).context(ComputeSnafu { table: spec.name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SONGS, TIME, start_time_type};
    use crate::sink::{ParquetWriterConfig, TableWriter};
    use crate::storage::StorageProvider;
    use arrow::array::{
        Array, AsArray, Float64Array, Int32Array, Int64Array, TimestampMicrosecondArray,
    };
    use arrow::datatypes::{Int32Type, Int64Type};
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn storage(dir: &TempDir) -> StorageProviderRef {
        Arc::new(
            StorageProvider::for_url_with_options(&dir.path().display().to_string(), HashMap::new())
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_restores_partition_columns() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let songs = RecordBatch::try_new(
            SONGS.schema(),
            vec![
                Arc::new(StringArray::from(vec!["SOA", "SOB", "SOC"])),
                Arc::new(StringArray::from(vec!["Elena", "Setanta matins", "Intro"])),
                Arc::new(StringArray::from(vec![Some("AR1"), Some("AR2"), None])),
                Arc::new(Int64Array::from(vec![Some(2004), Some(0), None])),
                Arc::new(Float64Array::from(vec![269.58, 269.58, 1.0])),
            ],
        )
        .unwrap();

        TableWriter::new(Arc::clone(&storage), ParquetWriterConfig::default())
            .write(&SONGS, songs)
            .await
            .unwrap();
        let read = TableReader::new(storage).read(&SONGS).await.unwrap();

        assert_eq!(read.schema(), SONGS.schema());
        assert_eq!(read.num_rows(), 3);

        let ids = read.column_by_name("song_id").unwrap().as_string::<i32>();
        let years = read.column_by_name("year").unwrap().as_primitive::<Int64Type>();
        let artists = read.column_by_name("artist_id").unwrap().as_string::<i32>();
        for row in 0..3 {
            match ids.value(row) {
                "SOA" => {
                    assert_eq!(years.value(row), 2004);
                    assert_eq!(artists.value(row), "AR1");
                }
                "SOB" => {
                    assert_eq!(years.value(row), 0);
                    assert_eq!(artists.value(row), "AR2");
                }
                "SOC" => {
                    assert!(years.is_null(row));
                    assert!(artists.is_null(row));
                }
                other => panic!("unexpected song {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_reserved_characters_in_partition_values() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let artist_ids = vec!["AC/DC", "50%", "a=b", "AR#1", "AR{x}"];
        let songs = RecordBatch::try_new(
            SONGS.schema(),
            vec![
                Arc::new(StringArray::from(vec!["SO1", "SO2", "SO3", "SO4", "SO5"])),
                Arc::new(StringArray::from(vec!["One", "Two", "Three", "Four", "Five"])),
                Arc::new(StringArray::from(artist_ids.clone())),
                Arc::new(Int64Array::from(vec![2004; 5])),
                Arc::new(Float64Array::from(vec![200.0; 5])),
            ],
        )
        .unwrap();

        TableWriter::new(Arc::clone(&storage), ParquetWriterConfig::default())
            .write(&SONGS, songs)
            .await
            .unwrap();
        let read = TableReader::new(storage).read(&SONGS).await.unwrap();

        let ids = read.column_by_name("song_id").unwrap().as_string::<i32>();
        let artists = read.column_by_name("artist_id").unwrap().as_string::<i32>();
        let mut pairs: Vec<(&str, &str)> = (0..read.num_rows())
            .map(|row| (ids.value(row), artists.value(row)))
            .collect();
        pairs.sort();
        let expected: Vec<(&str, &str)> = ["SO1", "SO2", "SO3", "SO4", "SO5"]
            .into_iter()
            .zip(artist_ids)
            .collect();
        assert_eq!(pairs, expected);
    }

    #[tokio::test]
    async fn test_int32_partition_columns() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir).await;
        let time = RecordBatch::try_new(
            TIME.schema(),
            vec![
                Arc::new(
                    TimestampMicrosecondArray::from(vec![1_541_903_636_796_000])
                        .with_timezone("UTC"),
                ),
                Arc::new(Int32Array::from(vec![2])),
                Arc::new(Int32Array::from(vec![11])),
                Arc::new(Int32Array::from(vec![45])),
                Arc::new(Int32Array::from(vec![11])),
                Arc::new(Int32Array::from(vec![2018])),
                Arc::new(Int32Array::from(vec![7])),
            ],
        )
        .unwrap();

        TableWriter::new(Arc::clone(&storage), ParquetWriterConfig::default())
            .write(&TIME, time)
            .await
            .unwrap();
        let read = TableReader::new(storage).read(&TIME).await.unwrap();

        assert_eq!(read.num_rows(), 1);
        assert_eq!(read.column(0).data_type(), &start_time_type());
        let month = read.column_by_name("month").unwrap().as_primitive::<Int32Type>();
        let year = read.column_by_name("year").unwrap().as_primitive::<Int32Type>();
        assert_eq!(month.value(0), 11);
        assert_eq!(year.value(0), 2018);
    }

    #[tokio::test]
    async fn test_missing_table_reads_empty() {
        let dir = TempDir::new().unwrap();
        let read = TableReader::new(storage(&dir).await).read(&SONGS).await.unwrap();
        assert_eq!(read.num_rows(), 0);
        assert_eq!(read.schema(), SONGS.schema());
    }
}
