//! Multi-cloud storage abstraction.
//!
//! One `StorageProvider` is rooted at a base URI (S3, GCS, Azure Blob
//! Storage or the local filesystem). All paths handed to it are relative
//! to that root.

mod azure;
mod gcs;
mod local;
mod s3;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};

pub use azure::AzureConfig;
pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use s3::S3Config;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider rooted at a base URI.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Azure,
    Local,
}

/// URL shapes accepted for each backend, tried in order.
const URL_PATTERNS: &[(Backend, &str)] = &[
    (
        Backend::S3,
        r"^https://s3\.(?P<region>[\w\-]+)\.amazonaws\.com/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::S3,
        r"^https://(?P<bucket>[a-z0-9\-\.]+)\.s3\.(?P<region>[\w\-]+)\.amazonaws\.com(/(?P<key>.+))?$",
    ),
    (
        Backend::S3,
        r"^[sS]3[aA]?::(?P<protocol>https?)://(?P<endpoint>[^:/]+):(?P<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::S3,
        r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::Gcs,
        r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::Gcs,
        r"^https://(?P<bucket>[a-z0-9\-_\.]+)\.storage\.googleapis\.com(/(?P<key>.+))?$",
    ),
    (
        Backend::Gcs,
        r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$",
    ),
    (
        Backend::Azure,
        r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.+))?$",
    ),
    (
        Backend::Azure,
        r"^https://(?P<account>[a-z0-9]+)\.(blob|dfs)\.core\.windows\.net/(?P<container>[a-z0-9\-]+)(/(?P<key>.+))?$",
    ),
    (Backend::Local, r"^file://(?P<path>.*)$"),
    (Backend::Local, r"^file:(?P<path>.*)$"),
    (Backend::Local, r"^/(?P<path>.*)$"),
];

static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    URL_PATTERNS
        .iter()
        .map(|(backend, pattern)| {
            (
                *backend,
                Regex::new(pattern).expect("storage URL patterns are valid"),
            )
        })
        .collect()
});

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Azure(AzureConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a base URI into a backend configuration.
    ///
    /// A trailing `/` is ignored, so `s3a://udacity-dend/` and
    /// `s3a://udacity-dend` name the same root.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        let trimmed = url.trim();
        let trimmed = match trimmed.trim_end_matches('/') {
            "" if trimmed.starts_with('/') => "/",
            rest => rest,
        };

        let matched = MATCHERS
            .iter()
            .find_map(|(backend, regex)| regex.captures(trimmed).map(|caps| (*backend, caps)));

        match matched {
            Some((Backend::S3, caps)) => Ok(Self::parse_s3(&caps)),
            Some((Backend::Gcs, caps)) => Ok(Self::parse_gcs(&caps)),
            Some((Backend::Azure, caps)) => Ok(Self::parse_azure(&caps)),
            Some((Backend::Local, caps)) => Ok(Self::parse_local(&caps)),
            None => InvalidUrlSnafu {
                url: url.to_string(),
            }
            .fail(),
        }
    }

    fn capture(caps: &regex::Captures, name: &str) -> Option<String> {
        caps.name(name).map(|m| m.as_str().to_string())
    }

    fn parse_s3(caps: &regex::Captures) -> Self {
        let endpoint = caps.name("endpoint").map(|endpoint| {
            let protocol = caps.name("protocol").map_or("https", |p| p.as_str());
            let port = caps
                .name("port")
                .and_then(|p| p.as_str().parse::<u16>().ok())
                .unwrap_or(443);
            format!("{}://{}:{}", protocol, endpoint.as_str(), port)
        });

        BackendConfig::S3(S3Config {
            endpoint,
            region: Self::capture(caps, "region"),
            bucket: Self::capture(caps, "bucket").unwrap_or_default(),
            key: caps.name("key").map(|m| m.as_str().into()),
        })
    }

    fn parse_gcs(caps: &regex::Captures) -> Self {
        BackendConfig::Gcs(GcsConfig {
            bucket: Self::capture(caps, "bucket").unwrap_or_default(),
            key: caps.name("key").map(|m| m.as_str().into()),
        })
    }

    fn parse_azure(caps: &regex::Captures) -> Self {
        BackendConfig::Azure(AzureConfig {
            account: Self::capture(caps, "account").unwrap_or_default(),
            container: Self::capture(caps, "container").unwrap_or_default(),
            key: caps.name("key").map(|m| m.as_str().into()),
        })
    }

    fn parse_local(caps: &regex::Captures) -> Self {
        let path = caps.name("path").map_or("", |m| m.as_str());
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        BackendConfig::Local(LocalConfig { path })
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Azure(azure) => azure.key.as_ref(),
            BackendConfig::Local(_) => None,
        }
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL with storage options.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options),
            BackendConfig::Gcs(config) => Self::construct_gcs(config, options),
            BackendConfig::Azure(config) => Self::construct_azure(config, options),
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// The fully qualified root of this provider.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every object under `prefix` (or the whole root).
    ///
    /// Returned paths are relative to the root and sorted. A prefix that
    /// does not exist yields an empty list.
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<Path>, StorageError> {
        let base_parts = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();
        let relative = prefix.map(Path::from);
        let full_prefix = relative.as_ref().map(|p| self.qualify_path(p).into_owned());
        let full_prefix = full_prefix.or_else(|| self.config.key().cloned());

        let start = Instant::now();
        let mut stream = self.object_store.list(full_prefix.as_ref());
        let mut paths = Vec::new();
        let mut outcome = Ok(());

        while let Some(item) = stream.next().await {
            match item {
                Ok(meta) => paths.push(meta.location.parts().skip(base_parts).collect::<Path>()),
                Err(object_store::Error::NotFound { .. }) => {}
                Err(source) => {
                    outcome = Err(StorageError::ObjectStore { source });
                    break;
                }
            }
        }

        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::from_result(&outcome),
            duration: start.elapsed(),
        });
        outcome?;

        paths.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        debug!(
            "Listed {} objects under {}/{}",
            paths.len(),
            self.canonical_url,
            prefix.unwrap_or_default()
        );
        Ok(paths)
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = match self.object_store.get(&self.qualify_path(path)).await {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };

        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.put(&self.qualify_path(path), payload).await;

        emit!(StorageRequest {
            operation: StorageOperation::Put,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Put bytes to a path.
    pub async fn put(&self, path: &Path, bytes: impl Into<Bytes>) -> Result<(), StorageError> {
        self.put_payload(path, PutPayload::from(bytes.into())).await
    }

    /// Delete a single object. A missing object is not an error.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = match self.object_store.delete(&self.qualify_path(path)).await {
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            other => other,
        };

        emit!(StorageRequest {
            operation: StorageOperation::Delete,
            status: RequestStatus::from_result(&result),
            duration: start.elapsed(),
        });

        result.context(ObjectStoreSnafu)
    }

    /// Delete every object under `prefix`, returning how many were removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let paths = self.list(Some(prefix)).await?;
        for path in &paths {
            self.delete(path).await?;
        }
        if !paths.is_empty() {
            debug!("Deleted {} objects under {}", paths.len(), prefix);
        }
        Ok(paths.len())
    }
}
