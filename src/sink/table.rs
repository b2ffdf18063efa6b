//! Table writer: persists one analytics table under the output root.
//!
//! Writing a table replaces it. Every object under the table directory is
//! deleted first, rows are grouped by their partition values, each group is
//! encoded without its partition columns under `col=value/` directories,
//! and a `_SUCCESS` marker is written once every data file is in place.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{Array, AsArray, RecordBatch, UInt32Array};
use arrow::compute::{cast, take_record_batch};
use arrow::datatypes::DataType;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, info};
use uuid::Uuid;

use super::parquet::{FinishedFile, ParquetWriter, ParquetWriterConfig};
use crate::emit;
use crate::error::{
    ClearTableSnafu, ComputeSnafu, EncodeTableSnafu, MissingColumnSnafu, PutTableFileSnafu,
    TableError, TableTaskSnafu,
};
use crate::metrics::events::{ParquetFileWritten, TableRowsWritten};
use crate::partition::{partition_path, partition_segments};
use crate::schema::TableSpec;
use crate::storage::StorageProviderRef;

/// Marker written after a table's data files.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Files uploaded concurrently per table.
const UPLOAD_CONCURRENCY: usize = 4;

/// Summary of a table write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WrittenTable {
    pub rows: usize,
    pub files: usize,
    pub partitions: usize,
}

/// An encoded file waiting to be uploaded.
struct PendingFile {
    path: Path,
    file: FinishedFile,
}

/// Writes analytics tables below one output root.
#[derive(Debug, Clone)]
pub struct TableWriter {
    storage: StorageProviderRef,
    config: ParquetWriterConfig,
}

impl TableWriter {
    pub fn new(storage: StorageProviderRef, config: ParquetWriterConfig) -> Self {
        Self { storage, config }
    }

    /// Replace the table described by `spec` with the rows of `batch`.
    pub async fn write(
        &self,
        spec: &TableSpec,
        batch: RecordBatch,
    ) -> Result<WrittenTable, TableError> {
        for column in spec.partition_by {
            ensure!(
                batch.schema().column_with_name(column).is_some(),
                MissingColumnSnafu {
                    table: spec.name,
                    column: *column,
                }
            );
        }

        let removed = self
            .storage
            .delete_prefix(spec.name)
            .await
            .context(ClearTableSnafu { table: spec.name })?;
        if removed > 0 {
            info!(table = spec.label(), "Removed {} objects of previous output", removed);
        }

        let rows = batch.num_rows();
        let table_spec = *spec;
        let config = self.config.clone();
        let (pending, partitions) =
            tokio::task::spawn_blocking(move || encode_table(&table_spec, &config, &batch))
                .await
                .context(TableTaskSnafu { table: spec.name })??;

        let files = pending.len();
        let table = spec.label();
        futures::stream::iter(pending)
            .map(|pending| {
                let storage = Arc::clone(&self.storage);
                async move {
                    let size = pending.file.bytes.len();
                    storage
                        .put(&pending.path, pending.file.bytes)
                        .await
                        .context(PutTableFileSnafu {
                            path: pending.path.to_string(),
                        })?;
                    debug!(
                        table,
                        records = pending.file.record_count,
                        "Wrote {} ({} bytes)",
                        pending.path,
                        size
                    );
                    emit!(ParquetFileWritten {
                        table,
                        bytes: size as u64,
                    });
                    Ok::<_, TableError>(())
                }
            })
            .buffer_unordered(UPLOAD_CONCURRENCY)
            .try_collect::<Vec<_>>()
            .await?;

        let marker = Path::from(format!("{}/{}", spec.name, SUCCESS_MARKER));
        self.storage
            .put(&marker, Bytes::new())
            .await
            .context(PutTableFileSnafu {
                path: marker.to_string(),
            })?;

        emit!(TableRowsWritten {
            table,
            rows: rows as u64,
        });
        info!(
            table,
            rows, files, partitions, "Wrote {}/{}",
            self.storage.canonical_url(),
            spec.name
        );

        Ok(WrittenTable {
            rows,
            files,
            partitions,
        })
    }
}

/// Group rows by partition values and encode each group.
///
/// Groups keep the order in which their first row appears.
fn encode_table(
    spec: &TableSpec,
    config: &ParquetWriterConfig,
    batch: &RecordBatch,
) -> Result<(Vec<PendingFile>, usize), TableError> {
    let schema = batch.schema();
    let partition_columns = spec.partition_columns();

    let partition_indices: Vec<usize> = partition_columns
        .iter()
        .filter_map(|c| schema.index_of(c).ok())
        .collect();
    let data_indices: Vec<usize> = (0..schema.fields().len())
        .filter(|i| !partition_indices.contains(i))
        .collect();

    let groups = group_rows(spec, batch, &partition_indices)?;
    let partitions = groups.len();
    let mut pending = Vec::new();
    let mut part = 0usize;

    for (values, rows) in groups {
        let group = if rows.len() == batch.num_rows() {
            batch.clone()
        } else {
            take_record_batch(batch, &UInt32Array::from(rows))
                .context(ComputeSnafu { table: spec.name })?
        };
        let group = group
            .project(&data_indices)
            .context(ComputeSnafu { table: spec.name })?;

        let mut writer = ParquetWriter::new(group.schema(), config.clone())
            .context(EncodeTableSnafu { table: spec.name })?;
        writer
            .write_batch(&group)
            .context(EncodeTableSnafu { table: spec.name })?;
        let files = writer
            .close()
            .context(EncodeTableSnafu { table: spec.name })?;

        let segments = partition_segments(&partition_columns, &values);
        for file in files {
            let file_name = format!("part-{part:05}-{}.parquet", Uuid::now_v7());
            pending.push(PendingFile {
                path: partition_path(spec.name, &segments, &file_name),
                file,
            });
            part += 1;
        }
    }

    Ok((pending, partitions))
}

/// Row indices for each distinct combination of partition values.
fn group_rows(
    spec: &TableSpec,
    batch: &RecordBatch,
    partition_indices: &[usize],
) -> Result<Vec<(Vec<Option<String>>, Vec<u32>)>, TableError> {
    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }
    if partition_indices.is_empty() {
        return Ok(vec![(Vec::new(), (0..batch.num_rows() as u32).collect())]);
    }

    let rendered = partition_indices
        .iter()
        .map(|&i| cast(batch.column(i), &DataType::Utf8))
        .collect::<Result<Vec<_>, _>>()
        .context(ComputeSnafu { table: spec.name })?;
    let rendered: Vec<_> = rendered.iter().map(|a| a.as_string::<i32>()).collect();

    let mut slots: HashMap<Vec<Option<String>>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Option<String>>, Vec<u32>)> = Vec::new();

    for row in 0..batch.num_rows() {
        let key: Vec<Option<String>> = rendered
            .iter()
            .map(|col| (!col.is_null(row)).then(|| col.value(row).to_string()))
            .collect();
        let slot = *slots.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row as u32);
    }

    Ok(groups)
}
