//! Error types for sparkify using snafu.
//!
//! Each concern (storage, configuration, record reading, table building,
//! Parquet encoding, metrics) has its own enum with context selectors.
//! `PipelineError` aggregates them for the binary.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error: {source}"))]
    AzureConfig { source: object_store::Error },
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Input base path is empty.
    #[snafu(display("Input path cannot be empty"))]
    EmptyInputPath,

    /// Output base path is empty.
    #[snafu(display("Output path cannot be empty"))]
    EmptyOutputPath,

    /// A source pattern is empty.
    #[snafu(display("Pattern for source '{name}' cannot be empty"))]
    EmptyPattern { name: String },

    /// The songplay partition size must be positive.
    #[snafu(display("songplay_partition_rows must be greater than zero"))]
    InvalidPartitionRows,

    /// Batch size must be positive.
    #[snafu(display("batch_size must be greater than zero"))]
    InvalidBatchSize,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {path}: {source}"))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
}

// ============ Reader Errors ============

/// Errors that can occur while loading JSON records.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReaderError {
    /// The path pattern is not a valid glob.
    #[snafu(display("Invalid path pattern '{pattern}': {source}"))]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// Listing the input location failed.
    #[snafu(display("Failed to list input under {base}: {source}"))]
    ListInput { base: String, source: StorageError },

    /// No input files matched the pattern.
    #[snafu(display("No files match '{pattern}' under {base}"))]
    NoFilesMatched { base: String, pattern: String },

    /// Failed to fetch an input file.
    #[snafu(display("Failed to read {path}: {source}"))]
    ReadInput { path: String, source: StorageError },

    /// Failed to decompress an input file.
    #[snafu(display("Failed to decompress {path}: {message}"))]
    Decompression { path: String, message: String },

    /// Schema inference found nothing usable.
    #[snafu(display("Failed to infer schema: {message}"))]
    Inference { message: String },

    /// Failed to build the Arrow JSON decoder.
    #[snafu(display("Failed to build JSON decoder: {message}"))]
    DecoderBuild { message: String },

    /// A record could not be decoded.
    #[snafu(display("Failed to decode JSON in {path}: {message}"))]
    JsonDecode { path: String, message: String },

    /// Decoded batches could not be combined.
    #[snafu(display("Failed to combine record batches: {source}"))]
    ConcatBatches { source: arrow::error::ArrowError },

    /// The blocking decode task panicked or was cancelled.
    #[snafu(display("Decode task failed: {source}"))]
    DecodeTask { source: tokio::task::JoinError },
}

// ============ Parquet Errors ============

/// Errors that can occur during Parquet file writing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ParquetError {
    /// Parquet write error.
    #[snafu(display("Parquet write error: {source}"))]
    Write {
        source: parquet::errors::ParquetError,
    },

    /// Failed to create Parquet writer.
    #[snafu(display("Failed to create Parquet writer: {source}"))]
    WriterCreate {
        source: parquet::errors::ParquetError,
    },

    /// Writer is not available (internal state error).
    #[snafu(display("Parquet writer is not available"))]
    WriterUnavailable,

    /// Buffer lock error (mutex poisoned).
    #[snafu(display("Buffer lock failed: mutex poisoned"))]
    BufferLock,

    /// Buffer has outstanding references and cannot be consumed.
    #[snafu(display("Buffer has outstanding references"))]
    BufferInUse,
}

// ============ Table Errors ============

/// Errors raised while building, writing or re-reading an analytics table.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TableError {
    /// A required column is absent from the input.
    #[snafu(display("Table '{table}' requires column '{column}' which is missing"))]
    MissingColumn { table: String, column: String },

    /// An Arrow kernel failed.
    #[snafu(display("Arrow compute failed for table '{table}': {source}"))]
    Compute {
        table: String,
        source: arrow::error::ArrowError,
    },

    /// Clearing the destination before an overwrite failed.
    #[snafu(display("Failed to clear existing output of table '{table}': {source}"))]
    ClearTable { table: String, source: StorageError },

    /// Encoding a table partition failed.
    #[snafu(display("Failed to encode table '{table}': {source}"))]
    EncodeTable { table: String, source: ParquetError },

    /// Uploading a table file failed.
    #[snafu(display("Failed to write {path}: {source}"))]
    PutTableFile { path: String, source: StorageError },

    /// Listing a persisted table failed.
    #[snafu(display("Failed to list table '{table}': {source}"))]
    ListTable { table: String, source: StorageError },

    /// Fetching a persisted table file failed.
    #[snafu(display("Failed to read {path}: {source}"))]
    ReadTableFile { path: String, source: StorageError },

    /// Decoding a persisted Parquet file failed.
    #[snafu(display("Failed to decode {path}: {source}"))]
    DecodeParquet {
        path: String,
        source: parquet::errors::ParquetError,
    },

    /// The blocking decode task panicked or was cancelled.
    #[snafu(display("Table task failed for '{table}': {source}"))]
    TableTask {
        table: String,
        source: tokio::task::JoinError,
    },

    /// A partition directory value could not be converted to its column type.
    #[snafu(display("Invalid value for partition column '{column}' in {path}: {source}"))]
    PartitionValue {
        path: String,
        column: String,
        source: arrow::error::ArrowError,
    },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder: {source}"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Reader error.
    #[snafu(display("Reader error: {source}"))]
    Reader { source: ReaderError },

    /// Table error.
    #[snafu(display("Table error: {source}"))]
    Table { source: TableError },

    /// Blocking task join error.
    #[snafu(display("Task join error: {source}"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error: {source}"))]
    Metrics { source: MetricsError },
}

impl From<StorageError> for PipelineError {
    fn from(source: StorageError) -> Self {
        PipelineError::PipelineStorage { source }
    }
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<ReaderError> for PipelineError {
    fn from(source: ReaderError) -> Self {
        PipelineError::Reader { source }
    }
}

impl From<TableError> for PipelineError {
    fn from(source: TableError) -> Self {
        PipelineError::Table { source }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(source: tokio::task::JoinError) -> Self {
        PipelineError::TaskJoin { source }
    }
}
