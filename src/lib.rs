//! sparkify: builds a star schema of song-play analytics from JSON logs.
//!
//! Reads a song catalog and a song-play event log from object storage or a
//! local directory, derives the songs, artists, users and time dimensions
//! plus the songplays fact table, and writes each one as Hive-partitioned
//! Parquet.
//!
//! # Example
//!
//! ```ignore
//! use sparkify::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("sparkify.yaml")?;
//!     let stats = run_pipeline(config).await?;
//!     println!("Wrote {} parquet files", stats.parquet_files_written());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod schema;
pub mod sink;
pub mod source;
pub mod storage;
pub mod transform;

// Re-export main types
pub use config::Config;
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use storage::{StorageProvider, StorageProviderRef};
