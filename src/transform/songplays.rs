//! Songplays fact table.
//!
//! Each `NextSong` event is inner-joined against the persisted users, time,
//! artists and songs tables:
//!
//! - `userId = users.user_id`
//! - `start_time = time.start_time`
//! - `artist = artists.name`
//! - `song = songs.title`
//!
//! Null keys never match and every combination of matching dimension rows
//! yields an output row. Events are split into fixed-size partitions joined
//! concurrently on the blocking pool; the surrogate key combines the
//! partition index with the row position inside the partition.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use arrow::array::{
    Array, ArrayRef, AsArray, Int64Array, RecordBatch, StringArray, TimestampMicrosecondArray,
    UInt32Array,
};
use arrow::compute::{concat_batches, take};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimestampMicrosecondType};
use snafu::prelude::*;
use tracing::{debug, info};

use super::time::START_TIME;
use super::{ColumnMapping, project};
use crate::emit;
use crate::error::{ComputeSnafu, TableError, TableTaskSnafu};
use crate::metrics::events::SongplayEventsDropped;
use crate::schema::{SONGPLAYS, start_time_type};

/// Bits reserved for the row position inside a partition.
const ROW_BITS: u32 = 33;

const EVENT_COLUMNS: [ColumnMapping; 7] = [
    ("userId", "user_id"),
    (START_TIME, START_TIME),
    ("artist", "artist"),
    ("song", "song"),
    ("sessionId", "session_id"),
    ("location", "location"),
    ("userAgent", "user_agent"),
];

/// Join-side view of an event, with every key cast to its comparison type.
static EVENT_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Utf8, true),
        Field::new(START_TIME, start_time_type(), true),
        Field::new("artist", DataType::Utf8, true),
        Field::new("song", DataType::Utf8, true),
        Field::new("session_id", DataType::Int64, true),
        Field::new("location", DataType::Utf8, true),
        Field::new("user_agent", DataType::Utf8, true),
    ]))
});

/// The dimension tables as re-read from the output root.
#[derive(Debug, Clone)]
pub struct Dimensions {
    pub songs: RecordBatch,
    pub artists: RecordBatch,
    pub users: RecordBatch,
    pub time: RecordBatch,
}

/// The assembled fact table.
#[derive(Debug)]
pub struct Songplays {
    pub batch: RecordBatch,
    /// Events that matched no combination of dimension rows.
    pub dropped: usize,
}

/// Hash indexes over the dimension join keys.
struct JoinIndex {
    users: HashMap<String, Vec<u32>>,
    instants: HashMap<i64, usize>,
    artists: HashMap<String, Vec<u32>>,
    songs: HashMap<String, Vec<u32>>,
    user_id: ArrayRef,
    level: ArrayRef,
    artist_id: ArrayRef,
    song_id: ArrayRef,
}

impl JoinIndex {
    fn build(dims: &Dimensions) -> Result<Self, TableError> {
        let table = SONGPLAYS.name;
        let users_key = string_column(table, &dims.users, "user_id")?;
        let artists_key = string_column(table, &dims.artists, "name")?;
        let songs_key = string_column(table, &dims.songs, "title")?;

        let instants = super::column(table, &dims.time, START_TIME)?;
        let instants = arrow::compute::cast(instants, &start_time_type())
            .context(ComputeSnafu { table })?;
        let mut counts = HashMap::new();
        for micros in instants
            .as_primitive::<TimestampMicrosecondType>()
            .iter()
            .flatten()
        {
            *counts.entry(micros).or_insert(0) += 1;
        }

        Ok(Self {
            users: index_strings(&users_key),
            instants: counts,
            artists: index_strings(&artists_key),
            songs: index_strings(&songs_key),
            user_id: users_key,
            level: string_column(table, &dims.users, "level")?,
            artist_id: string_column(table, &dims.artists, "artist_id")?,
            song_id: string_column(table, &dims.songs, "song_id")?,
        })
    }
}

fn string_column(table: &str, batch: &RecordBatch, name: &str) -> Result<ArrayRef, TableError> {
    let column = super::column(table, batch, name)?;
    arrow::compute::cast(column, &DataType::Utf8).context(ComputeSnafu { table })
}

/// Row positions per non-null key.
fn index_strings(column: &ArrayRef) -> HashMap<String, Vec<u32>> {
    let mut index: HashMap<String, Vec<u32>> = HashMap::new();
    for (row, key) in column.as_string::<i32>().iter().enumerate() {
        if let Some(key) = key {
            index.entry(key.to_string()).or_default().push(row as u32);
        }
    }
    index
}

/// Join `NextSong` events (carrying `start_time`) against the dimensions.
pub async fn assemble_songplays(
    events: &RecordBatch,
    dims: &Dimensions,
    partition_rows: usize,
) -> Result<Songplays, TableError> {
    let table = SONGPLAYS.name;
    let events = project(table, events, &EVENT_COLUMNS, &EVENT_SCHEMA)?;
    let index = Arc::new(JoinIndex::build(dims)?);
    let partition_rows = partition_rows.max(1);

    let handles: Vec<_> = (0..events.num_rows())
        .step_by(partition_rows)
        .enumerate()
        .map(|(partition, offset)| {
            let len = partition_rows.min(events.num_rows() - offset);
            let slice = events.slice(offset, len);
            let index = Arc::clone(&index);
            tokio::task::spawn_blocking(move || join_partition(&index, partition, &slice))
        })
        .collect();

    let partitions = handles.len();
    let mut batches = Vec::with_capacity(partitions);
    let mut dropped = 0;
    for handle in handles {
        let (batch, missed) = handle.await.context(TableTaskSnafu { table })??;
        dropped += missed;
        batches.push(batch);
    }

    let batch = concat_batches(&SONGPLAYS.schema(), &batches).context(ComputeSnafu { table })?;
    debug!(partitions, "Joined {} events", events.num_rows());
    info!(
        rows = batch.num_rows(),
        dropped, "Dropped {} events with no matching song, artist, user or time", dropped
    );
    emit!(SongplayEventsDropped {
        count: dropped as u64,
    });

    Ok(Songplays { batch, dropped })
}

/// Join one partition of events. Returns the rows and the number of
/// events that produced none.
fn join_partition(
    index: &JoinIndex,
    partition: usize,
    events: &RecordBatch,
) -> Result<(RecordBatch, usize), TableError> {
    let table = SONGPLAYS.name;
    let users = events.column(0).as_string::<i32>();
    let instants = events.column(1).as_primitive::<TimestampMicrosecondType>();
    let artists = events.column(2).as_string::<i32>();
    let songs = events.column(3).as_string::<i32>();

    let mut event_rows = Vec::new();
    let mut user_rows = Vec::new();
    let mut artist_rows = Vec::new();
    let mut song_rows = Vec::new();
    let mut dropped = 0;

    for row in 0..events.num_rows() {
        let matched = (|| {
            let by_user = index.users.get(non_null(users, row)?)?;
            let times = *index.instants.get(&non_null_ts(instants, row)?)?;
            let by_artist = index.artists.get(non_null(artists, row)?)?;
            let by_song = index.songs.get(non_null(songs, row)?)?;
            Some((by_user, times, by_artist, by_song))
        })();

        let Some((matched_users, times, matched_artists, matched_songs)) = matched else {
            dropped += 1;
            continue;
        };

        for &user in matched_users {
            for _ in 0..times {
                for &artist in matched_artists {
                    for &song in matched_songs {
                        event_rows.push(row as u32);
                        user_rows.push(user);
                        artist_rows.push(artist);
                        song_rows.push(song);
                    }
                }
            }
        }
    }

    let prefix = (partition as i64) << ROW_BITS;
    let songplay_id = Int64Array::from_iter_values((0..event_rows.len() as i64).map(|r| prefix | r));

    let event_rows = UInt32Array::from(event_rows);
    let user_rows = UInt32Array::from(user_rows);
    let artist_rows = UInt32Array::from(artist_rows);
    let song_rows = UInt32Array::from(song_rows);
    let gather = |column: &ArrayRef, rows: &UInt32Array| {
        take(column.as_ref(), rows, None).context(ComputeSnafu { table })
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(songplay_id),
        gather(events.column(1), &event_rows)?,
        gather(&index.user_id, &user_rows)?,
        gather(&index.level, &user_rows)?,
        gather(&index.song_id, &song_rows)?,
        gather(&index.artist_id, &artist_rows)?,
        gather(events.column(4), &event_rows)?,
        gather(events.column(5), &event_rows)?,
        gather(events.column(6), &event_rows)?,
    ];

    let batch =
        RecordBatch::try_new(SONGPLAYS.schema(), columns).context(ComputeSnafu { table })?;
    Ok((batch, dropped))
}

fn non_null<'a>(array: &'a StringArray, row: usize) -> Option<&'a str> {
    (!array.is_null(row)).then(|| array.value(row))
}

fn non_null_ts(array: &TimestampMicrosecondArray, row: usize) -> Option<i64> {
    (!array.is_null(row)).then(|| array.value(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TimeZone, UsersDedupPolicy};
    use crate::transform::test_util::batch_from_json;
    use crate::transform::{
        NEXT_SONG_PAGE, artists_table, filter_eq, songs_table, time_table, users_table,
        with_start_time,
    };
    use arrow::datatypes::Int64Type;
    use std::collections::HashSet;

    const RYAN: &str = r#"{"artist": "Elena", "auth": "Logged In", "firstName": "Ryan", "gender": "M", "itemInSession": 0, "lastName": "Smith", "length": 269.58322, "level": "free", "location": "San Jose-Sunnyvale-Santa Clara, CA", "method": "PUT", "page": "NextSong", "registration": 1541016707796.0, "sessionId": 583, "song": "Setanta matins", "status": 200, "ts": 1542241826796, "userAgent": "Mozilla/5.0", "userId": "26"}"#;

    fn catalog() -> RecordBatch {
        batch_from_json(&[
            r#"{"artist_id": "AR5KOSW1187FB35FF4", "artist_latitude": 49.80388, "artist_longitude": 15.47491, "artist_location": "Dubai UAE", "artist_name": "Elena", "song_id": "SOZCTXZ12AB0182364", "title": "Setanta matins", "duration": 269.58322, "year": 0}"#,
            r#"{"artist_id": "ARXR32B1187FB57099", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Gob", "song_id": "SOFSOCN12A8C143F5D", "title": "Face the Ashes", "duration": 209.60608, "year": 2007}"#,
        ])
    }

    fn dims_for(events: &RecordBatch) -> Dimensions {
        let catalog = catalog();
        Dimensions {
            songs: songs_table(&catalog).unwrap(),
            artists: artists_table(&catalog).unwrap(),
            users: users_table(events, UsersDedupPolicy::KeepAllDistinctRows).unwrap(),
            time: time_table(events, TimeZone::Utc).unwrap(),
        }
    }

    fn next_songs(lines: &[&str]) -> RecordBatch {
        let log = batch_from_json(lines);
        let events = filter_eq("log_data", &log, "page", NEXT_SONG_PAGE).unwrap();
        with_start_time(&events).unwrap()
    }

    #[tokio::test]
    async fn test_matching_event_produces_row() {
        let events = next_songs(&[RYAN]);
        let songplays = assemble_songplays(&events, &dims_for(&events), 16).await.unwrap();

        let batch = songplays.batch;
        assert_eq!(batch.schema(), SONGPLAYS.schema());
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(songplays.dropped, 0);

        let string = |name: &str| {
            batch.column_by_name(name).unwrap().as_string::<i32>().value(0).to_string()
        };
        assert_eq!(string("user_id"), "26");
        assert_eq!(string("level"), "free");
        assert_eq!(string("song_id"), "SOZCTXZ12AB0182364");
        assert_eq!(string("artist_id"), "AR5KOSW1187FB35FF4");
        assert_eq!(string("user_agent"), "Mozilla/5.0");
        let session = batch.column_by_name("session_id").unwrap().as_primitive::<Int64Type>();
        assert_eq!(session.value(0), 583);
        let start = batch
            .column_by_name(START_TIME)
            .unwrap()
            .as_primitive::<TimestampMicrosecondType>();
        assert_eq!(start.value(0), 1_542_241_826_796_000);
    }

    #[tokio::test]
    async fn test_unmatched_events_are_dropped() {
        let unknown_song = RYAN.replace("Setanta matins", "Unknown Song");
        let unknown_artist = RYAN.replace("\"Elena\"", "\"Nobody\"");
        let events = next_songs(&[&unknown_song, &unknown_artist]);

        let songplays = assemble_songplays(&events, &dims_for(&events), 16).await.unwrap();
        assert_eq!(songplays.batch.num_rows(), 0);
        assert_eq!(songplays.dropped, 2);
    }

    #[tokio::test]
    async fn test_non_next_song_events_never_appear() {
        let home = RYAN.replace("\"NextSong\"", "\"Home\"");
        let events = next_songs(&[&home]);

        let songplays = assemble_songplays(&events, &dims_for(&events), 16).await.unwrap();
        assert_eq!(songplays.batch.num_rows(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_dimension_rows_multiply() {
        let paid = RYAN.replace("\"free\"", "\"paid\"");
        let events = next_songs(&[RYAN, &paid]);

        // Two user rows for "26" (free and paid) give each event two rows.
        let songplays = assemble_songplays(&events, &dims_for(&events), 16).await.unwrap();
        assert_eq!(songplays.batch.num_rows(), 4);
    }

    #[tokio::test]
    async fn test_ids_unique_and_increasing_across_partitions() {
        let lines: Vec<String> = (0..10)
            .map(|i| RYAN.replace("1542241826796", &(1_542_241_826_796i64 + i).to_string()))
            .collect();
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        let events = next_songs(&lines);

        let songplays = assemble_songplays(&events, &dims_for(&events), 3).await.unwrap();
        let ids: Vec<i64> = songplays
            .batch
            .column(0)
            .as_primitive::<Int64Type>()
            .values()
            .to_vec();

        assert_eq!(ids.len(), 10);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 10);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids[3], 1i64 << ROW_BITS);
    }
}
