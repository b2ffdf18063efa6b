//! ETL pipeline.
//!
//! Two stages run in order:
//!
//! - **song_data**: load the song catalog, then build and write the songs
//!   and artists tables concurrently.
//! - **log_data**: load the event log, keep `NextSong` events, build and
//!   write the users and time tables concurrently, re-read every dimension
//!   from the output root and join them into the songplays fact table.
//!
//! Fetches and uploads are async; decoding, distinct and join work runs on
//! tokio's blocking thread pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use arrow::array::RecordBatch;
use tracing::{debug, info};

use crate::config::Config;
use crate::emit;
use crate::error::PipelineError;
use crate::metrics::events::StageCompleted;
use crate::schema::{ARTISTS, SONGPLAYS, SONGS, TIME, TableSpec, USERS};
use crate::sink::{ParquetWriterConfig, TableWriter, WrittenTable};
use crate::source::{LoadedRecords, RecordReader, TableReader};
use crate::storage::{StorageProvider, StorageProviderRef};
use crate::transform::{
    Dimensions, NEXT_SONG_PAGE, artists_table, assemble_songplays, filter_eq, songs_table,
    time_table, users_table, with_start_time,
};

const SONG_DATA: &str = "song_data";
const LOG_DATA: &str = "log_data";

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub files_read: usize,
    pub records_read: usize,
    pub lines_skipped: usize,
    pub song_plays: usize,
    pub events_dropped: usize,
    /// Written tables keyed by directory name.
    pub tables: BTreeMap<&'static str, WrittenTable>,
}

impl PipelineStats {
    fn record_source(&mut self, loaded: &LoadedRecords) {
        self.files_read += loaded.files;
        self.records_read += loaded.batch.num_rows();
        self.lines_skipped += loaded.skipped_lines;
    }

    fn record_table(&mut self, spec: &TableSpec, written: WrittenTable) {
        self.tables.insert(spec.name, written);
    }

    /// Parquet files written across all tables.
    pub fn parquet_files_written(&self) -> usize {
        self.tables.values().map(|t| t.files).sum()
    }
}

/// The ETL pipeline over one input root and one output root.
pub struct Pipeline {
    config: Config,
    input: StorageProviderRef,
    writer: TableWriter,
    reader: TableReader,
    stats: PipelineStats,
}

impl Pipeline {
    /// Connect to the input and output stores.
    pub async fn new(config: Config) -> Result<Self, PipelineError> {
        let input = Arc::new(
            StorageProvider::for_url_with_options(
                &config.input.path,
                config.input_storage_options(),
            )
            .await?,
        );
        let output = Arc::new(
            StorageProvider::for_url_with_options(
                &config.output.path,
                config.output_storage_options(),
            )
            .await?,
        );
        info!("Input: {}", input.canonical_url());
        info!("Output: {}", output.canonical_url());

        let writer = TableWriter::new(
            Arc::clone(&output),
            ParquetWriterConfig::from(&config.output),
        );
        let reader = TableReader::new(output);

        Ok(Self {
            config,
            input,
            writer,
            reader,
            stats: PipelineStats::default(),
        })
    }

    /// Run both stages and return the run statistics.
    pub async fn run(mut self) -> Result<PipelineStats, PipelineError> {
        self.process_song_data().await?;
        self.process_log_data().await?;
        Ok(self.stats)
    }

    /// Build and write the songs and artists tables.
    pub async fn process_song_data(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let loaded = RecordReader::new(
            Arc::clone(&self.input),
            SONG_DATA,
            self.config.input.song_data.clone(),
        )
        .load()
        .await?;
        self.stats.record_source(&loaded);
        let catalog = loaded.batch;

        let writer = &self.writer;
        let songs = async {
            let catalog = catalog.clone();
            let table = tokio::task::spawn_blocking(move || songs_table(&catalog)).await??;
            Ok::<_, PipelineError>(writer.write(&SONGS, table).await?)
        };
        let artists = async {
            let catalog = catalog.clone();
            let table = tokio::task::spawn_blocking(move || artists_table(&catalog)).await??;
            Ok::<_, PipelineError>(writer.write(&ARTISTS, table).await?)
        };
        let (songs, artists) = tokio::try_join!(songs, artists)?;

        self.stats.record_table(&SONGS, songs);
        self.stats.record_table(&ARTISTS, artists);
        self.finish_stage(SONG_DATA, start);
        Ok(())
    }

    /// Build and write the users, time and songplays tables.
    pub async fn process_log_data(&mut self) -> Result<(), PipelineError> {
        let start = Instant::now();
        let loaded = RecordReader::new(
            Arc::clone(&self.input),
            LOG_DATA,
            self.config.input.log_data.clone(),
        )
        .load()
        .await?;
        self.stats.record_source(&loaded);

        let log = loaded.batch;
        let total = log.num_rows();
        let events: RecordBatch = tokio::task::spawn_blocking(move || {
            let plays = filter_eq(LOG_DATA, &log, "page", NEXT_SONG_PAGE)?;
            with_start_time(&plays)
        })
        .await??;
        info!("{} of {} events are song plays", events.num_rows(), total);
        self.stats.song_plays = events.num_rows();

        let transform = self.config.transform.clone();
        let writer = &self.writer;
        let users = async {
            let events = events.clone();
            let policy = transform.users_dedup;
            let table =
                tokio::task::spawn_blocking(move || users_table(&events, policy)).await??;
            Ok::<_, PipelineError>(writer.write(&USERS, table).await?)
        };
        let time = async {
            let events = events.clone();
            let zone = transform.time_zone;
            let table = tokio::task::spawn_blocking(move || time_table(&events, zone)).await??;
            Ok::<_, PipelineError>(writer.write(&TIME, table).await?)
        };
        let (users, time) = tokio::try_join!(users, time)?;
        self.stats.record_table(&USERS, users);
        self.stats.record_table(&TIME, time);

        let (songs, artists, users, time) = tokio::try_join!(
            self.reader.read(&SONGS),
            self.reader.read(&ARTISTS),
            self.reader.read(&USERS),
            self.reader.read(&TIME),
        )?;
        debug!(
            songs = songs.num_rows(),
            artists = artists.num_rows(),
            users = users.num_rows(),
            time = time.num_rows(),
            "Re-read dimension tables"
        );
        let dims = Dimensions {
            songs,
            artists,
            users,
            time,
        };

        let songplays =
            assemble_songplays(&events, &dims, transform.songplay_partition_rows).await?;
        self.stats.events_dropped = songplays.dropped;
        let written = self.writer.write(&SONGPLAYS, songplays.batch).await?;
        self.stats.record_table(&SONGPLAYS, written);

        self.finish_stage(LOG_DATA, start);
        Ok(())
    }

    fn finish_stage(&self, stage: &'static str, start: Instant) {
        let duration = start.elapsed();
        info!(stage, "Stage complete in {:.2}s", duration.as_secs_f64());
        emit!(StageCompleted { stage, duration });
    }
}

/// Run the pipeline with the given configuration.
pub async fn run_pipeline(config: Config) -> Result<PipelineStats, PipelineError> {
    Pipeline::new(config).await?.run().await
}
