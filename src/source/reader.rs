//! JSON record reader.
//!
//! Lists the objects under the input root that match a source pattern,
//! fetches and decompresses them, and decodes every record into a single
//! Arrow `RecordBatch` whose columns are the union of fields seen.

use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::json::ReaderBuilder;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use glob::{MatchOptions, Pattern};
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, info, warn};

use super::inference::infer_schema;
use crate::config::{OnParseError, SourceConfig};
use crate::emit;
use crate::error::{
    ConcatBatchesSnafu, DecodeTaskSnafu, DecoderBuildSnafu, InvalidPatternSnafu, JsonDecodeSnafu,
    ListInputSnafu, NoFilesMatchedSnafu, ReadInputSnafu, ReaderError,
};
use crate::metrics::events::{InputFileRead, ParseErrorSkipped, RecordsRead};
use crate::storage::StorageProviderRef;

/// Objects fetched concurrently while loading a source.
const FETCH_CONCURRENCY: usize = 16;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Decides which listed object keys belong to a source.
///
/// A key is selected when the pattern matches the key itself or one of its
/// parent directories, so `song_data/*/*/*` picks up every file below
/// `song_data/A/B/C` and `log_data/` every file below `log_data`. Keys with
/// a segment starting with `_` or `.` are bookkeeping files and never match.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: Option<Pattern>,
    list_prefix: Option<String>,
}

impl PathMatcher {
    pub fn new(pattern: &str) -> Result<Self, ReaderError> {
        let trimmed = pattern.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self {
                pattern: None,
                list_prefix: None,
            });
        }

        let compiled = Pattern::new(trimmed).context(InvalidPatternSnafu { pattern })?;
        let literal: Vec<&str> = trimmed
            .split('/')
            .take_while(|segment| !segment.contains(['*', '?', '[']))
            .collect();
        let list_prefix = (!literal.is_empty()).then(|| literal.join("/"));

        Ok(Self {
            pattern: Some(compiled),
            list_prefix,
        })
    }

    /// Longest literal directory prefix, used to narrow the listing.
    pub fn list_prefix(&self) -> Option<&str> {
        self.list_prefix.as_deref()
    }

    pub fn matches(&self, key: &str) -> bool {
        let segments: Vec<&str> = key.split('/').collect();
        if segments
            .iter()
            .any(|s| s.starts_with('_') || s.starts_with('.'))
        {
            return false;
        }

        let Some(pattern) = &self.pattern else {
            return true;
        };
        (1..=segments.len())
            .any(|depth| pattern.matches_with(&segments[..depth].join("/"), MATCH_OPTIONS))
    }
}

/// Outcome of loading one source.
#[derive(Debug)]
pub struct LoadedRecords {
    pub batch: RecordBatch,
    pub files: usize,
    pub skipped_lines: usize,
}

/// Reads one JSON source (song catalog or event log) from storage.
pub struct RecordReader {
    storage: StorageProviderRef,
    name: &'static str,
    config: SourceConfig,
}

impl RecordReader {
    /// `name` labels logs and metrics, e.g. `"song_data"`.
    pub fn new(storage: StorageProviderRef, name: &'static str, config: SourceConfig) -> Self {
        Self {
            storage,
            name,
            config,
        }
    }

    /// Keys under the input root selected by the source pattern, sorted.
    pub async fn matching_files(&self) -> Result<Vec<Path>, ReaderError> {
        let matcher = PathMatcher::new(&self.config.pattern)?;
        let listed = self
            .storage
            .list(matcher.list_prefix())
            .await
            .context(ListInputSnafu {
                base: self.storage.canonical_url(),
            })?;

        let total = listed.len();
        let files: Vec<Path> = listed
            .into_iter()
            .filter(|path| matcher.matches(path.as_ref()))
            .collect();

        debug!(
            source = self.name,
            "{} of {} listed objects match '{}'",
            files.len(),
            total,
            self.config.pattern
        );
        Ok(files)
    }

    /// Load every matching record into one batch.
    pub async fn load(&self) -> Result<LoadedRecords, ReaderError> {
        let files = self.matching_files().await?;
        ensure!(
            !files.is_empty(),
            NoFilesMatchedSnafu {
                base: self.storage.canonical_url(),
                pattern: self.config.pattern.clone(),
            }
        );

        let fetched: Vec<(String, Bytes)> = futures::stream::iter(files)
            .map(|path| {
                let storage = Arc::clone(&self.storage);
                async move {
                    let bytes = storage.get(&path).await.context(ReadInputSnafu {
                        path: path.to_string(),
                    })?;
                    Ok::<_, ReaderError>((path.to_string(), bytes))
                }
            })
            .buffered(FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        let name = self.name;
        let config = self.config.clone();
        let loaded = tokio::task::spawn_blocking(move || decode_files(name, &config, fetched))
            .await
            .context(DecodeTaskSnafu)??;

        info!(
            source = self.name,
            files = loaded.files,
            records = loaded.batch.num_rows(),
            skipped_lines = loaded.skipped_lines,
            "Loaded source"
        );
        emit!(RecordsRead {
            source: self.name,
            count: loaded.batch.num_rows() as u64,
        });

        Ok(loaded)
    }
}

/// A decompressed file reduced to its well-formed JSON object lines.
struct CleanDocument {
    path: String,
    text: Vec<u8>,
}

fn decode_files(
    name: &'static str,
    config: &SourceConfig,
    fetched: Vec<(String, Bytes)>,
) -> Result<LoadedRecords, ReaderError> {
    let codec = config.compression.codec();
    let files = fetched.len();
    let mut skipped_lines = 0;
    let mut documents = Vec::with_capacity(files);

    for (path, bytes) in fetched {
        emit!(InputFileRead {
            source: name,
            bytes: bytes.len() as u64,
        });
        let raw = codec
            .decompress(&bytes)
            .map_err(|e| ReaderError::Decompression {
                path: path.clone(),
                message: e.to_string(),
            })?;
        debug!(
            source = name,
            "Decompressed {} -> {} bytes ({}) for {}",
            bytes.len(),
            raw.len(),
            codec.name(),
            path
        );

        let (text, skipped) = clean_lines(name, &path, &raw, config.on_parse_error)?;
        skipped_lines += skipped;
        documents.push(CleanDocument { path, text });
    }

    let schema = match config.arrow_schema() {
        Some(schema) => schema,
        None => {
            let texts: Vec<Vec<u8>> = documents.iter().map(|d| d.text.clone()).collect();
            infer_schema(&texts)?
        }
    };

    let mut batches = Vec::new();
    for doc in &documents {
        match decode_document(&schema, config.batch_size, &doc.path, &doc.text) {
            Ok(mut decoded) => batches.append(&mut decoded),
            Err(err) if config.on_parse_error == OnParseError::Skip => {
                warn!(source = name, "Falling back to per-line decoding: {err}");
                let (mut decoded, skipped) = decode_lines(name, &schema, &doc.path, &doc.text)?;
                skipped_lines += skipped;
                batches.append(&mut decoded);
            }
            Err(err) => return Err(err),
        }
    }

    let batch = concat_batches(&schema, &batches).context(ConcatBatchesSnafu)?;
    Ok(LoadedRecords {
        batch,
        files,
        skipped_lines,
    })
}

/// Keep each non-blank line that parses as a JSON object.
///
/// Returns the kept lines (newline terminated) and the number skipped.
fn clean_lines(
    name: &'static str,
    path: &str,
    raw: &[u8],
    policy: OnParseError,
) -> Result<(Vec<u8>, usize), ReaderError> {
    let mut text = Vec::with_capacity(raw.len() + 1);
    let mut skipped = 0;

    for (index, line) in raw.split(|b| *b == b'\n').enumerate() {
        let line = line.trim_ascii();
        if line.is_empty() {
            continue;
        }

        let problem = match serde_json::from_slice::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(_)) => None,
            Ok(_) => Some("expected a JSON object".to_string()),
            Err(e) => Some(e.to_string()),
        };

        match problem {
            None => {
                text.extend_from_slice(line);
                text.push(b'\n');
            }
            Some(message) => {
                let message = format!("line {}: {message}", index + 1);
                if policy == OnParseError::Fail {
                    return JsonDecodeSnafu { path, message }.fail();
                }
                warn!(source = name, "Skipping malformed record in {path}, {message}");
                emit!(ParseErrorSkipped { source: name });
                skipped += 1;
            }
        }
    }

    Ok((text, skipped))
}

fn decode_document(
    schema: &SchemaRef,
    batch_size: usize,
    path: &str,
    text: &[u8],
) -> Result<Vec<RecordBatch>, ReaderError> {
    let mut decoder = ReaderBuilder::new(Arc::clone(schema))
        .with_batch_size(batch_size)
        .with_strict_mode(false)
        .with_coerce_primitive(true)
        .build_decoder()
        .map_err(|e| {
            DecoderBuildSnafu {
                message: e.to_string(),
            }
            .build()
        })?;

    let decode_error = |e: arrow::error::ArrowError| {
        JsonDecodeSnafu {
            path,
            message: e.to_string(),
        }
        .build()
    };

    // decode() stops once a batch is full, so flush after every call
    let mut offset = 0;
    let mut batches = Vec::new();
    loop {
        let consumed = decoder.decode(&text[offset..]).map_err(decode_error)?;
        if let Some(batch) = decoder.flush().map_err(decode_error)? {
            batches.push(batch);
        }
        if consumed == 0 {
            break;
        }
        offset += consumed;
    }

    Ok(batches)
}

/// Decode line by line, dropping the lines the schema cannot hold.
fn decode_lines(
    name: &'static str,
    schema: &SchemaRef,
    path: &str,
    text: &[u8],
) -> Result<(Vec<RecordBatch>, usize), ReaderError> {
    let mut batches = Vec::new();
    let mut skipped = 0;

    for (index, line) in text.split(|b| *b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        match decode_document(schema, 1, path, line) {
            Ok(mut decoded) => batches.append(&mut decoded),
            Err(err) => {
                warn!(
                    source = name,
                    "Skipping record {} of {path} that does not fit the schema: {err}",
                    index + 1
                );
                emit!(ParseErrorSkipped { source: name });
                skipped += 1;
            }
        }
    }

    Ok((batches, skipped))
}
