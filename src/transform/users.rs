//! Users dimension, derived from song-play events.

use std::collections::HashMap;

use arrow::array::{Array, AsArray, RecordBatch, UInt32Array};
use arrow::compute::{cast, take_record_batch};
use arrow::datatypes::{DataType, Int64Type};
use snafu::prelude::*;

use super::{ColumnMapping, column, distinct, project};
use crate::config::UsersDedupPolicy;
use crate::error::{ComputeSnafu, TableError};
use crate::schema::USERS;

const USER_COLUMNS: [ColumnMapping; 5] = [
    ("userId", "user_id"),
    ("firstName", "first_name"),
    ("lastName", "last_name"),
    ("gender", "gender"),
    ("level", "level"),
];

/// Build the users table from `NextSong` events.
pub fn users_table(
    events: &RecordBatch,
    policy: UsersDedupPolicy,
) -> Result<RecordBatch, TableError> {
    let projected = project(USERS.name, events, &USER_COLUMNS, &USERS.schema())?;
    match policy {
        UsersDedupPolicy::KeepAllDistinctRows => distinct(USERS.name, &projected),
        UsersDedupPolicy::LatestByEventTime => latest_per_user(events, &projected),
    }
}

/// One row per user_id: the row of the event with the greatest `ts`.
///
/// Ties go to the later row. Users appear in order of their first event.
fn latest_per_user(events: &RecordBatch, users: &RecordBatch) -> Result<RecordBatch, TableError> {
    let ts = cast(column(USERS.name, events, "ts")?, &DataType::Int64)
        .context(ComputeSnafu { table: USERS.name })?;
    let ts = ts.as_primitive::<Int64Type>();
    let ids = users.column(0).as_string::<i32>();

    let mut slots: HashMap<Option<&str>, usize> = HashMap::new();
    let mut chosen: Vec<(Option<i64>, u32)> = Vec::new();

    for row in 0..users.num_rows() {
        let id = (!ids.is_null(row)).then(|| ids.value(row));
        let event_time = (!ts.is_null(row)).then(|| ts.value(row));

        match slots.get(&id) {
            Some(&slot) => {
                if event_time >= chosen[slot].0 {
                    chosen[slot] = (event_time, row as u32);
                }
            }
            None => {
                slots.insert(id, chosen.len());
                chosen.push((event_time, row as u32));
            }
        }
    }

    let indices = UInt32Array::from_iter_values(chosen.into_iter().map(|(_, row)| row));
    take_record_batch(users, &indices).context(ComputeSnafu { table: USERS.name })
}
