//! Hive-style partition directories.
//!
//! Partitioned tables are laid out as `col1=v1/col2=v2/<file>.parquet`.
//! Null values use the `__HIVE_DEFAULT_PARTITION__` sentinel. Segments are
//! handed to the object store path layer unencoded; it percent-encodes
//! reserved characters such as `/` and `%` once, and the extractor decodes
//! each segment before splitting it on the first `=`.

use std::collections::HashMap;

use object_store::path::{Path, PathPart};
use percent_encoding::percent_decode_str;

/// Directory value written for a null partition value.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// One `col=value` directory segment per partition column.
///
/// Returns no segments for unpartitioned tables.
pub fn partition_segments(columns: &[String], values: &[Option<String>]) -> Vec<String> {
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| match value {
            Some(v) => format!("{column}={v}"),
            None => format!("{column}={HIVE_DEFAULT_PARTITION}"),
        })
        .collect()
}

/// Path of `file_name` under the partition directories of `table`.
pub fn partition_path(table: &str, segments: &[String], file_name: &str) -> Path {
    std::iter::once(PathPart::from(table))
        .chain(segments.iter().map(|s| PathPart::from(s.as_str())))
        .chain(std::iter::once(PathPart::from(file_name)))
        .collect()
}

/// Extracts partition values for known columns from file paths.
#[derive(Debug, Clone)]
pub struct PartitionExtractor {
    columns: Vec<String>,
}

impl PartitionExtractor {
    /// Create an extractor for the given partition columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    /// Extract partition values from a file path.
    ///
    /// Only whole `key=value` directory segments count, so `year=` never
    /// matches inside `myyear=`. The file name itself is ignored. A column
    /// absent from the path is absent from the map; the null sentinel maps
    /// to `None`.
    pub fn extract(&self, path: &Path) -> HashMap<String, Option<String>> {
        let mut segments: Vec<String> = path
            .parts()
            .map(|part| percent_decode_str(part.as_ref()).decode_utf8_lossy().into_owned())
            .collect();
        segments.pop();

        segments
            .iter()
            .filter_map(|segment| segment.split_once('='))
            .filter(|(key, _)| self.columns.iter().any(|c| c == key))
            .map(|(key, raw)| {
                let value = (raw != HIVE_DEFAULT_PARTITION).then(|| raw.to_string());
                (key.to_string(), value)
            })
            .collect()
    }
}
