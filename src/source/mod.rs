//! Input readers.
//!
//! Loads the raw song and log JSON datasets from the input root, and reads
//! persisted analytics tables back from the output root.

pub mod compression;
mod inference;
pub mod reader;
pub mod table;

pub use compression::CompressionCodec;
pub use inference::infer_schema;
pub use reader::{LoadedRecords, PathMatcher, RecordReader};
pub use table::TableReader;
