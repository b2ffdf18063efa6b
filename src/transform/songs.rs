//! Songs and artists dimensions, derived from the song catalog.

use arrow::array::RecordBatch;

use super::{ColumnMapping, distinct, project};
use crate::error::TableError;
use crate::schema::{ARTISTS, SONGS};

const SONG_COLUMNS: [ColumnMapping; 5] = [
    ("song_id", "song_id"),
    ("title", "title"),
    ("artist_id", "artist_id"),
    ("year", "year"),
    ("duration", "duration"),
];

const ARTIST_COLUMNS: [ColumnMapping; 5] = [
    ("artist_id", "artist_id"),
    ("artist_name", "name"),
    ("artist_location", "location"),
    ("artist_latitude", "latitude"),
    ("artist_longitude", "longitude"),
];

/// Distinct `(song_id, title, artist_id, year, duration)` rows.
pub fn songs_table(catalog: &RecordBatch) -> Result<RecordBatch, TableError> {
    let projected = project(SONGS.name, catalog, &SONG_COLUMNS, &SONGS.schema())?;
    distinct(SONGS.name, &projected)
}

/// Distinct artist rows with the `artist_` prefix dropped from column names.
pub fn artists_table(catalog: &RecordBatch) -> Result<RecordBatch, TableError> {
    let projected = project(ARTISTS.name, catalog, &ARTIST_COLUMNS, &ARTISTS.schema())?;
    distinct(ARTISTS.name, &projected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_util::batch_from_json;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{Float64Type, Int64Type};

    fn catalog() -> RecordBatch {
        batch_from_json(&[
            r#"{"num_songs": 1, "artist_id": "ARJIE2Y1187B994AB7", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Line Renaud", "song_id": "SOUPIRU12A6D4FA1E1", "title": "Der Kleine Dompfaff", "duration": 152.92036, "year": 0}"#,
            r#"{"num_songs": 1, "artist_id": "AR5KOSW1187FB35FF4", "artist_latitude": 49.80388, "artist_longitude": 15.47491, "artist_location": "Dubai UAE", "artist_name": "Elena", "song_id": "SOZCTXZ12AB0182364", "title": "Setanta matins", "duration": 269.58322, "year": 0}"#,
            r#"{"num_songs": 1, "artist_id": "AR5KOSW1187FB35FF4", "artist_latitude": 49.80388, "artist_longitude": 15.47491, "artist_location": "Dubai UAE", "artist_name": "Elena", "song_id": "SOZCTXZ12AB0182364", "title": "Setanta matins", "duration": 269.58322, "year": 0}"#,
        ])
    }

    #[test]
    fn test_songs_table() {
        let songs = songs_table(&catalog()).unwrap();

        assert_eq!(songs.schema(), SONGS.schema());
        assert_eq!(songs.num_rows(), 2);
        let ids = songs.column_by_name("song_id").unwrap().as_string::<i32>();
        assert_eq!(ids.value(0), "SOUPIRU12A6D4FA1E1");
        assert_eq!(ids.value(1), "SOZCTXZ12AB0182364");
        let years = songs.column_by_name("year").unwrap().as_primitive::<Int64Type>();
        assert_eq!(years.value(1), 0);
    }

    #[test]
    fn test_artists_table() {
        let artists = artists_table(&catalog()).unwrap();

        assert_eq!(artists.schema(), ARTISTS.schema());
        assert_eq!(artists.num_rows(), 2);
        let names = artists.column_by_name("name").unwrap().as_string::<i32>();
        assert_eq!(names.value(1), "Elena");
        let latitude = artists.column_by_name("latitude").unwrap().as_primitive::<Float64Type>();
        assert!(latitude.is_null(0));
        assert_eq!(latitude.value(1), 49.80388);
    }

    #[test]
    fn test_all_null_coordinates_still_typed() {
        let catalog = batch_from_json(&[
            r#"{"artist_id": "AR1", "artist_name": "A", "artist_location": null, "artist_latitude": null, "artist_longitude": null}"#,
        ]);
        let artists = artists_table(&catalog).unwrap();
        assert_eq!(artists.schema(), ARTISTS.schema());
        assert!(artists.column_by_name("longitude").unwrap().is_null(0));
    }
}
