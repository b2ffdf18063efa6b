//! Table output.
//!
//! Encodes analytics tables to Parquet and lays them out as Hive-partitioned
//! directories under the output root.

pub mod parquet;
pub mod table;

pub use parquet::{FinishedFile, ParquetWriter, ParquetWriterConfig};
pub use table::{SUCCESS_MARKER, TableWriter, WrittenTable};
