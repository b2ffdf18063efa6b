//! Time dimension, derived from event timestamps.
//!
//! `ts` is epoch milliseconds. It becomes `start_time`, a microsecond
//! timestamp annotated as UTC, which is also the songplays join key.
//! Calendar fields are computed in the configured zone.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int32Builder, RecordBatch, TimestampMicrosecondArray};
use arrow::compute::{cast, filter_record_batch, is_not_null};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, TimestampMicrosecondType};
use arrow::error::ArrowError;
use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use snafu::prelude::*;

use super::{column, distinct};
use crate::config::TimeZone;
use crate::error::{ComputeSnafu, TableError};
use crate::schema::{TIME, start_time_type};

/// Name of the derived event-time column.
pub const START_TIME: &str = "start_time";

const MICROS_PER_MILLI: i64 = 1_000;

/// Append `start_time` to a batch of log events.
///
/// A null `ts` yields a null `start_time`.
pub fn with_start_time(events: &RecordBatch) -> Result<RecordBatch, TableError> {
    let table = TIME.name;
    let ts = cast(column(table, events, "ts")?, &DataType::Int64).context(ComputeSnafu { table })?;
    let start_time: TimestampMicrosecondArray = ts
        .as_primitive::<Int64Type>()
        .try_unary::<_, TimestampMicrosecondType, _>(|millis| {
            millis.checked_mul(MICROS_PER_MILLI).ok_or_else(|| {
                ArrowError::ComputeError(format!("ts {millis} overflows a microsecond timestamp"))
            })
        })
        .context(ComputeSnafu { table })?
        .with_timezone("UTC");

    let schema = events.schema();
    let mut fields: Vec<Arc<Field>> = schema
        .fields()
        .iter()
        .filter(|f| f.name() != START_TIME)
        .cloned()
        .collect();
    let mut columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .zip(events.columns())
        .filter(|(f, _)| f.name() != START_TIME)
        .map(|(_, c)| Arc::clone(c))
        .collect();
    fields.push(Arc::new(Field::new(START_TIME, start_time_type(), true)));
    columns.push(Arc::new(start_time));

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).context(ComputeSnafu { table })
}

/// Build the time table from events carrying `start_time`.
///
/// Events without a timestamp are excluded; one row per distinct instant.
pub fn time_table(events: &RecordBatch, zone: TimeZone) -> Result<RecordBatch, TableError> {
    let table = TIME.name;
    let start_time = column(table, events, START_TIME)?;
    let start_time = cast(start_time, &start_time_type()).context(ComputeSnafu { table })?;

    let instants = RecordBatch::try_from_iter([(START_TIME, start_time)])
        .context(ComputeSnafu { table })?;
    let present = is_not_null(instants.column(0)).context(ComputeSnafu { table })?;
    let instants = filter_record_batch(&instants, &present).context(ComputeSnafu { table })?;
    let instants = distinct(table, &instants)?;

    let micros = instants.column(0).as_primitive::<TimestampMicrosecondType>();
    let mut parts = CalendarColumns::with_capacity(micros.len());
    for value in micros.values().iter() {
        let utc = DateTime::<Utc>::from_timestamp_micros(*value).ok_or_else(|| {
            TableError::Compute {
                table: table.to_string(),
                source: ArrowError::ComputeError(format!("timestamp {value} is out of range")),
            }
        })?;
        match zone {
            TimeZone::Utc => parts.push(&utc),
            TimeZone::Local => parts.push(&utc.with_timezone(&Local)),
        }
    }

    let mut columns: Vec<ArrayRef> = vec![Arc::clone(instants.column(0))];
    columns.extend(parts.finish());
    RecordBatch::try_new(TIME.schema(), columns).context(ComputeSnafu { table })
}

/// Builders for hour, day, week, month, year and weekday.
struct CalendarColumns {
    hour: Int32Builder,
    day: Int32Builder,
    week: Int32Builder,
    month: Int32Builder,
    year: Int32Builder,
    weekday: Int32Builder,
}

impl CalendarColumns {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            hour: Int32Builder::with_capacity(capacity),
            day: Int32Builder::with_capacity(capacity),
            week: Int32Builder::with_capacity(capacity),
            month: Int32Builder::with_capacity(capacity),
            year: Int32Builder::with_capacity(capacity),
            weekday: Int32Builder::with_capacity(capacity),
        }
    }

    fn push<T: Datelike + Timelike>(&mut self, at: &T) {
        self.hour.append_value(at.hour() as i32);
        self.day.append_value(at.day() as i32);
        self.week.append_value(at.iso_week().week() as i32);
        self.month.append_value(at.month() as i32);
        self.year.append_value(at.year());
        // 1 = Monday .. 7 = Sunday
        self.weekday.append_value(at.weekday().number_from_monday() as i32);
    }

    fn finish(mut self) -> Vec<ArrayRef> {
        vec![
            Arc::new(self.hour.finish()),
            Arc::new(self.day.finish()),
            Arc::new(self.week.finish()),
            Arc::new(self.month.finish()),
            Arc::new(self.year.finish()),
            Arc::new(self.weekday.finish()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_util::batch_from_json;
    use arrow::datatypes::Int32Type;

    fn field(batch: &RecordBatch, name: &str) -> Vec<i32> {
        batch
            .column_by_name(name)
            .unwrap()
            .as_primitive::<Int32Type>()
            .values()
            .to_vec()
    }

    #[test]
    fn test_start_time_is_micros_utc() {
        let events = batch_from_json(&[r#"{"ts": 1541903636796}"#, r#"{"page": "Home"}"#]);
        let with_start = with_start_time(&events).unwrap();

        let start = with_start.column_by_name(START_TIME).unwrap();
        assert_eq!(start.data_type(), &start_time_type());
        let start = start.as_primitive::<TimestampMicrosecondType>();
        assert_eq!(start.value(0), 1_541_903_636_796_000);
        assert!(start.is_null(1));
    }

    #[test]
    fn test_calendar_fields_utc() {
        // 2018-11-11T02:33:56.796Z, a Sunday in ISO week 45.
        let events = batch_from_json(&[
            r#"{"ts": 1541903636796}"#,
            r#"{"ts": 1541903636796}"#,
            r#"{"ts": null}"#,
        ]);
        let time = time_table(&with_start_time(&events).unwrap(), TimeZone::Utc).unwrap();

        assert_eq!(time.schema(), TIME.schema());
        assert_eq!(time.num_rows(), 1);
        assert_eq!(field(&time, "hour"), vec![2]);
        assert_eq!(field(&time, "day"), vec![11]);
        assert_eq!(field(&time, "week"), vec![45]);
        assert_eq!(field(&time, "month"), vec![11]);
        assert_eq!(field(&time, "year"), vec![2018]);
        assert_eq!(field(&time, "weekday"), vec![7]);
    }

    #[test]
    fn test_calendar_fields_local() {
        let millis = 1_541_903_636_796i64;
        let line = format!(r#"{{"ts": {millis}}}"#);
        let events = batch_from_json(&[line.as_str()]);
        let time = time_table(&with_start_time(&events).unwrap(), TimeZone::Local).unwrap();

        let start = time.column(0).as_primitive::<TimestampMicrosecondType>();
        assert_eq!(start.value(0), millis * 1_000);
        assert_eq!(time.column(0).data_type(), &start_time_type());

        let local = DateTime::<Utc>::from_timestamp_millis(millis)
            .unwrap()
            .with_timezone(&Local);
        assert_eq!(field(&time, "hour"), vec![local.hour() as i32]);
        assert_eq!(field(&time, "day"), vec![local.day() as i32]);
        assert_eq!(field(&time, "week"), vec![local.iso_week().week() as i32]);
        assert_eq!(field(&time, "month"), vec![local.month() as i32]);
        assert_eq!(field(&time, "year"), vec![local.year()]);
        assert_eq!(
            field(&time, "weekday"),
            vec![local.weekday().number_from_monday() as i32]
        );
    }

    #[test]
    fn test_fields_within_ranges() {
        let lines: Vec<String> = (0..200)
            .map(|i| format!(r#"{{"ts": {}}}"#, 1_541_000_000_000i64 + i * 7_777_777))
            .collect();
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        let events = batch_from_json(&lines);

        let time = time_table(&with_start_time(&events).unwrap(), TimeZone::Utc).unwrap();
        assert_eq!(time.num_rows(), 200);
        assert!(field(&time, "hour").iter().all(|h| (0..=23).contains(h)));
        assert!(field(&time, "day").iter().all(|d| (1..=31).contains(d)));
        assert!(field(&time, "month").iter().all(|m| (1..=12).contains(m)));
        assert!(field(&time, "weekday").iter().all(|w| (1..=7).contains(w)));
    }

    #[test]
    fn test_missing_ts_column() {
        let events = batch_from_json(&[r#"{"page": "NextSong"}"#]);
        assert!(matches!(
            with_start_time(&events),
            Err(TableError::MissingColumn { .. })
        ));
    }
}
