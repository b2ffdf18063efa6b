//! Benchmark utilities for generating test data.

use arrow::array::RecordBatch;
use arrow::json::ReaderBuilder;
use arrow::json::reader::infer_json_schema;
use rand::Rng;
use std::io::Cursor;
use std::sync::Arc;

const ARTISTS: [(&str, &str); 4] = [
    ("AR5KOSW1187FB35FF4", "Elena"),
    ("ARJIE2Y1187B994AB7", "Line Renaud"),
    ("ARD7TVE1187B99BFB1", "Casual"),
    ("ARXR32B1187FB57099", "Gob"),
];

const PAGES: [&str; 4] = ["NextSong", "NextSong", "NextSong", "Home"];

/// Generate catalog lines: `count` songs spread over a few artists.
pub fn generate_song_lines(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();

    (0..count)
        .map(|i| {
            let (artist_id, artist_name) = ARTISTS[i % ARTISTS.len()];
            let duration: f64 = rng.gen_range(60.0..600.0);
            let year = rng.gen_range(1990..2020);
            format!(
                r#"{{"num_songs":1,"artist_id":"{artist_id}","artist_latitude":null,"artist_longitude":null,"artist_location":"","artist_name":"{artist_name}","song_id":"SO{i:016}","title":"Song {i}","duration":{duration:.5},"year":{year}}}"#
            )
        })
        .collect()
}

/// Generate event-log lines that reference songs from `generate_song_lines`.
pub fn generate_event_lines(count: usize, songs: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let base_ts: i64 = 1_541_000_000_000;

    (0..count)
        .map(|i| {
            let song = rng.gen_range(0..songs.max(1));
            let (_, artist_name) = ARTISTS[song % ARTISTS.len()];
            let user = rng.gen_range(1..100);
            let level = if rng.gen_bool(0.3) { "paid" } else { "free" };
            let page = PAGES[rng.gen_range(0..PAGES.len())];
            let ts = base_ts + rng.gen_range(0..2_592_000_000i64);
            format!(
                r#"{{"artist":"{artist_name}","auth":"Logged In","firstName":"User","gender":"F","itemInSession":{i},"lastName":"Number{user}","length":200.0,"level":"{level}","location":"Somewhere","method":"PUT","page":"{page}","sessionId":{session},"song":"Song {song}","status":200,"ts":{ts},"userAgent":"bench","userId":"{user}"}}"#,
                session = i / 10,
            )
        })
        .collect()
}

/// Decode NDJSON lines into one batch with an inferred schema.
pub fn decode_lines(lines: &[String]) -> RecordBatch {
    let text = lines.join("\n");
    let (schema, _) = infer_json_schema(Cursor::new(text.as_bytes()), None).unwrap();
    let schema = Arc::new(schema);
    let batches = ReaderBuilder::new(Arc::clone(&schema))
        .build(Cursor::new(text.into_bytes()))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    arrow::compute::concat_batches(&schema, &batches).unwrap()
}
