//! Star schema table definitions.
//!
//! Each analytics table has a fixed Arrow schema, an output directory name
//! and an ordered list of partition columns.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

/// Type of every `start_time` column: microseconds since the epoch, UTC.
pub fn start_time_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

/// Static description of one output table.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Directory under the output root, e.g. `songs_table`.
    pub name: &'static str,
    /// Hive partition columns in directory order.
    pub partition_by: &'static [&'static str],
    fields: fn() -> Vec<Field>,
}

impl TableSpec {
    /// Full table schema, partition columns included.
    pub fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new((self.fields)()))
    }

    /// Partition column names as owned strings.
    pub fn partition_columns(&self) -> Vec<String> {
        self.partition_by.iter().map(|c| c.to_string()).collect()
    }

    /// Short label for logs and metrics (`songs`, `time`, ...).
    pub fn label(&self) -> &'static str {
        self.name.trim_end_matches("_table")
    }
}

pub const SONGS: TableSpec = TableSpec {
    name: "songs_table",
    partition_by: &["year", "artist_id"],
    fields: || {
        vec![
            Field::new("song_id", DataType::Utf8, true),
            Field::new("title", DataType::Utf8, true),
            Field::new("artist_id", DataType::Utf8, true),
            Field::new("year", DataType::Int64, true),
            Field::new("duration", DataType::Float64, true),
        ]
    },
};

pub const ARTISTS: TableSpec = TableSpec {
    name: "artists_table",
    partition_by: &[],
    fields: || {
        vec![
            Field::new("artist_id", DataType::Utf8, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("location", DataType::Utf8, true),
            Field::new("latitude", DataType::Float64, true),
            Field::new("longitude", DataType::Float64, true),
        ]
    },
};

pub const USERS: TableSpec = TableSpec {
    name: "users_table",
    partition_by: &[],
    fields: || {
        vec![
            Field::new("user_id", DataType::Utf8, true),
            Field::new("first_name", DataType::Utf8, true),
            Field::new("last_name", DataType::Utf8, true),
            Field::new("gender", DataType::Utf8, true),
            Field::new("level", DataType::Utf8, true),
        ]
    },
};

pub const TIME: TableSpec = TableSpec {
    name: "time_table",
    partition_by: &["year", "month"],
    fields: || {
        vec![
            Field::new("start_time", start_time_type(), true),
            Field::new("hour", DataType::Int32, true),
            Field::new("day", DataType::Int32, true),
            Field::new("week", DataType::Int32, true),
            Field::new("month", DataType::Int32, true),
            Field::new("year", DataType::Int32, true),
            Field::new("weekday", DataType::Int32, true),
        ]
    },
};

pub const SONGPLAYS: TableSpec = TableSpec {
    name: "songplays_table",
    partition_by: &[],
    fields: || {
        vec![
            Field::new("songplay_id", DataType::Int64, false),
            Field::new("start_time", start_time_type(), true),
            Field::new("user_id", DataType::Utf8, true),
            Field::new("level", DataType::Utf8, true),
            Field::new("song_id", DataType::Utf8, true),
            Field::new("artist_id", DataType::Utf8, true),
            Field::new("session_id", DataType::Int64, true),
            Field::new("location", DataType::Utf8, true),
            Field::new("user_agent", DataType::Utf8, true),
        ]
    },
};

/// Every output table, in the order they are built.
pub const ALL_TABLES: [TableSpec; 5] = [SONGS, ARTISTS, USERS, TIME, SONGPLAYS];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_columns_exist_in_schema() {
        for spec in ALL_TABLES {
            let schema = spec.schema();
            for column in spec.partition_by {
                assert!(
                    schema.field_with_name(column).is_ok(),
                    "{} lacks partition column {column}",
                    spec.name
                );
            }
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(SONGS.label(), "songs");
        assert_eq!(SONGPLAYS.label(), "songplays");
    }

    #[test]
    fn test_time_partitioning() {
        assert_eq!(TIME.partition_columns(), vec!["year", "month"]);
        assert_eq!(TIME.schema().field(0).data_type(), &start_time_type());
    }
}
