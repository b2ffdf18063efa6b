//! Table construction.
//!
//! Every analytics table is a pure function of immutable Arrow data. The
//! helpers here are the relational building blocks the table builders share:
//! renaming projection with casts, SQL-style `DISTINCT`, and equality
//! filtering.

pub mod songplays;
pub mod songs;
pub mod time;
pub mod users;

use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, Scalar, StringArray, UInt32Array};
use arrow::compute::kernels::cmp;
use arrow::compute::{cast, filter_record_batch, take_record_batch};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::row::{RowConverter, SortField};
use snafu::prelude::*;

use crate::error::{ComputeSnafu, MissingColumnSnafu, TableError};

pub use songplays::{Dimensions, Songplays, assemble_songplays};
pub use songs::{artists_table, songs_table};
pub use time::{time_table, with_start_time};
pub use users::users_table;

/// Log events that count as song plays.
pub const NEXT_SONG_PAGE: &str = "NextSong";

/// A `(source column, output column)` pair.
pub type ColumnMapping = (&'static str, &'static str);

/// Select and rename columns, casting each to the type declared in `schema`.
///
/// `mapping` must list the fields of `schema` in order.
pub fn project(
    table: &str,
    batch: &RecordBatch,
    mapping: &[ColumnMapping],
    schema: &SchemaRef,
) -> Result<RecordBatch, TableError> {
    let columns = mapping
        .iter()
        .zip(schema.fields())
        .map(|((source, _), field)| {
            let column = column(table, batch, source)?;
            if column.data_type() == field.data_type() {
                Ok(Arc::clone(column))
            } else {
                cast(column, field.data_type()).context(ComputeSnafu { table })
            }
        })
        .collect::<Result<Vec<ArrayRef>, _>>()?;

    RecordBatch::try_new(Arc::clone(schema), columns).context(ComputeSnafu { table })
}

/// Keep the first occurrence of every distinct row. Nulls equal nulls.
pub fn distinct(table: &str, batch: &RecordBatch) -> Result<RecordBatch, TableError> {
    if batch.num_rows() == 0 {
        return Ok(batch.clone());
    }

    let fields = batch
        .schema()
        .fields()
        .iter()
        .map(|f| SortField::new(f.data_type().clone()))
        .collect();
    let converter = RowConverter::new(fields).context(ComputeSnafu { table })?;
    let rows = converter
        .convert_columns(batch.columns())
        .context(ComputeSnafu { table })?;

    let mut seen = HashSet::with_capacity(rows.num_rows());
    let keep: Vec<u32> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| seen.insert(*row))
        .map(|(i, _)| i as u32)
        .collect();

    if keep.len() == batch.num_rows() {
        return Ok(batch.clone());
    }
    take_record_batch(batch, &UInt32Array::from(keep)).context(ComputeSnafu { table })
}

/// Keep rows whose `name` column equals `value`; nulls never match.
pub fn filter_eq(
    table: &str,
    batch: &RecordBatch,
    name: &str,
    value: &str,
) -> Result<RecordBatch, TableError> {
    let column = column(table, batch, name)?;
    let column = cast(column, &DataType::Utf8).context(ComputeSnafu { table })?;
    let target = Scalar::new(StringArray::from(vec![value]));

    let mask = cmp::eq(&column, &target).context(ComputeSnafu { table })?;
    filter_record_batch(batch, &mask).context(ComputeSnafu { table })
}

/// Look up a column by name.
pub(crate) fn column<'a>(
    table: &str,
    batch: &'a RecordBatch,
    name: &str,
) -> Result<&'a ArrayRef, TableError> {
    batch
        .column_by_name(name)
        .context(MissingColumnSnafu { table, column: name })
}
