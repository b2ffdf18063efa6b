//! Configuration parsing and validation.
//!
//! Loads the YAML configuration (after environment interpolation) and
//! converts optional user-declared source schemas to Arrow schemas.

mod vars;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::storage::BackendConfig;

use crate::error::{
    ConfigError, EmptyInputPathSnafu, EmptyOutputPathSnafu, EmptyPatternSnafu,
    EnvInterpolationSnafu, InvalidBatchSizeSnafu, InvalidPartitionRowsSnafu, ReadFileSnafu,
    YamlParseSnafu,
};

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Configuration file read when no `--config` flag is given.
pub const DEFAULT_CONFIG_PATH: &str = "sparkify.yaml";

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub input: InputConfig,
    pub output: OutputConfig,
    /// Explicit object store credentials (optional).
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
    #[serde(default)]
    pub transform: TransformConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Where the raw song catalog and event logs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Base URI of the raw data.
    /// Examples: "s3a://udacity-dend/", "/data/sparkify/input"
    pub path: String,

    #[serde(default = "SourceConfig::song_data")]
    pub song_data: SourceConfig,

    #[serde(default = "SourceConfig::log_data")]
    pub log_data: SourceConfig,

    /// Storage options (endpoint, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// One family of JSON input files under the input base path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Glob relative to the input path. `*` never crosses a `/`; a
    /// pattern matching a directory selects everything under it.
    pub pattern: String,

    /// Compression format of the files.
    #[serde(default)]
    pub compression: CompressionFormat,

    /// What to do with a line that is not valid JSON.
    #[serde(default)]
    pub on_parse_error: OnParseError,

    /// Rows per decoded record batch (default: 8192)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Explicit field list. When absent the schema is inferred.
    #[serde(default)]
    pub fields: Option<Vec<FieldConfig>>,
}

impl SourceConfig {
    fn with_pattern(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            compression: CompressionFormat::default(),
            on_parse_error: OnParseError::default(),
            batch_size: default_batch_size(),
            fields: None,
        }
    }

    /// Default song catalog layout: `song_data/<A>/<B>/<C>/<file>.json`.
    pub fn song_data() -> Self {
        Self::with_pattern("song_data/*/*/*")
    }

    /// Default event log layout: every file under `log_data/`.
    pub fn log_data() -> Self {
        Self::with_pattern("log_data/")
    }

    /// The declared schema, if the source lists its fields.
    pub fn arrow_schema(&self) -> Option<SchemaRef> {
        self.fields.as_ref().map(|fields| {
            let fields: Vec<Field> = fields.iter().map(FieldConfig::to_arrow_field).collect();
            Arc::new(Schema::new(fields))
        })
    }
}

fn default_batch_size() -> usize {
    8192
}

/// Destination of the analytics tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base URI under which one directory per table is written.
    pub path: String,

    /// Target file size in MB (default: 128)
    #[serde(default = "default_file_size_mb")]
    pub file_size_mb: usize,

    /// Target row group size in bytes (default: 128MB)
    #[serde(default = "default_row_group_size_bytes")]
    pub row_group_size_bytes: usize,

    /// Parquet compression codec.
    #[serde(default)]
    pub compression: ParquetCompression,

    /// Storage options (endpoint, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

fn default_file_size_mb() -> usize {
    128
}

fn default_row_group_size_bytes() -> usize {
    128 * MB
}

impl OutputConfig {
    /// Rolled file size limit in bytes.
    pub fn file_size_bytes(&self) -> usize {
        self.file_size_mb * MB
    }
}

/// Static object store credentials.
///
/// Handed to the storage client as `aws_*` options; the process
/// environment is never touched.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("region", &self.region)
            .finish()
    }
}

impl CredentialsConfig {
    /// Render the credentials as S3 storage options.
    pub fn to_storage_options(&self) -> HashMap<String, String> {
        let mut options = HashMap::from([
            ("aws_access_key_id".to_string(), self.access_key_id.clone()),
            (
                "aws_secret_access_key".to_string(),
                self.secret_access_key.clone(),
            ),
        ]);
        if let Some(token) = &self.session_token {
            options.insert("aws_session_token".to_string(), token.clone());
        }
        if let Some(region) = &self.region {
            options.insert("aws_region".to_string(), region.clone());
        }
        options
    }
}

/// Knobs for the table derivations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Zone used to split event timestamps into calendar fields.
    #[serde(default)]
    pub time_zone: TimeZone,

    /// How repeated users are collapsed.
    #[serde(default)]
    pub users_dedup: UsersDedupPolicy,

    /// Events per songplay partition (default: 65536).
    #[serde(default = "default_songplay_partition_rows")]
    pub songplay_partition_rows: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            time_zone: TimeZone::default(),
            users_dedup: UsersDedupPolicy::default(),
            songplay_partition_rows: default_songplay_partition_rows(),
        }
    }
}

fn default_songplay_partition_rows() -> usize {
    65_536
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus endpoint is served (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Configuration for a single declared source field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl FieldConfig {
    fn to_arrow_field(&self) -> Field {
        let data_type = match self.field_type {
            FieldType::String => DataType::Utf8,
            FieldType::Int32 => DataType::Int32,
            FieldType::Int64 => DataType::Int64,
            FieldType::Float64 => DataType::Float64,
            FieldType::Boolean => DataType::Boolean,
            FieldType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        };
        Field::new(&self.name, data_type, self.nullable)
    }
}

/// Supported field types for declared schemas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Int32,
    Int64,
    Float64,
    Boolean,
    Timestamp,
}

/// Compression format for source files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    None,
    Gzip,
    Zstd,
}

/// Handling of JSON lines that fail to decode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnParseError {
    /// Abort the run, naming the file and line.
    #[default]
    Fail,
    /// Log and count the line, then continue.
    Skip,
}

/// Zone used for hour/day/week/month/year/weekday decomposition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeZone {
    #[default]
    Utc,
    /// The zone of the running process.
    Local,
}

/// Deduplication policy for the users table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UsersDedupPolicy {
    /// Distinct over every user column; a level change yields two rows.
    #[default]
    KeepAllDistinctRows,
    /// One row per user, taken from their most recent event.
    LatestByEventTime,
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    Lz4,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.display().to_string(),
        })?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            vars::interpolate(content).map_err(|problems| {
                EnvInterpolationSnafu {
                    message: problems.join("\n"),
                }
                .build()
            })?
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.input.path.trim().is_empty(), EmptyInputPathSnafu);
        ensure!(!self.output.path.trim().is_empty(), EmptyOutputPathSnafu);
        for (name, source) in [
            ("song_data", &self.input.song_data),
            ("log_data", &self.input.log_data),
        ] {
            ensure!(!source.pattern.is_empty(), EmptyPatternSnafu { name });
            ensure!(source.batch_size > 0, InvalidBatchSizeSnafu);
        }
        ensure!(
            self.transform.songplay_partition_rows > 0,
            InvalidPartitionRowsSnafu
        );
        Ok(())
    }

    /// Options for the input store, credentials first so explicit
    /// `storage_options` entries take precedence.
    pub fn input_storage_options(&self) -> HashMap<String, String> {
        self.merged_options(&self.input.path, &self.input.storage_options)
    }

    /// Options for the output store, with the same precedence as the input.
    pub fn output_storage_options(&self) -> HashMap<String, String> {
        self.merged_options(&self.output.path, &self.output.storage_options)
    }

    /// Credentials only apply to S3 locations.
    fn merged_options(
        &self,
        url: &str,
        explicit: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let is_s3 = matches!(BackendConfig::parse_url(url), Ok(BackendConfig::S3(_)));
        let mut options = match &self.credentials {
            Some(credentials) if is_s3 => credentials.to_storage_options(),
            _ => HashMap::new(),
        };
        options.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
        options
    }
}
