//! S3 storage backend implementation.

use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{S3ConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// S3 storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: String,
    pub key: Option<Path>,
}

impl StorageProvider {
    /// Build an S3 client. `options` keys use the `aws_*` names understood by
    /// `AmazonS3ConfigKey`, and override anything found in the environment.
    pub(super) fn construct_s3(
        config: S3Config,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig::default());

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        for (key, value) in options {
            builder = builder.with_config(key.parse().context(S3ConfigSnafu)?, value);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false)
                .with_allow_http(true);
        }

        let mut canonical_url = match &config.endpoint {
            Some(endpoint) => format!("s3::{}/{}", endpoint, config.bucket),
            None => format!("s3://{}", config.bucket),
        };
        if let Some(key) = &config.key {
            canonical_url = format!("{canonical_url}/{key}");
        }

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(S3ConfigSnafu)?);

        Ok(Self {
            config: BackendConfig::S3(config),
            object_store,
            canonical_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_explicit_credentials_build_client() {
        let options = HashMap::from([
            ("aws_access_key_id".to_string(), "AKIA123".to_string()),
            ("aws_secret_access_key".to_string(), "secret".to_string()),
            ("aws_region".to_string(), "us-west-2".to_string()),
        ]);
        let storage = StorageProvider::for_url_with_options("s3a://udacity-dend/", options)
            .await
            .unwrap();
        assert_eq!(storage.canonical_url(), "s3://udacity-dend");
    }

    #[tokio::test]
    async fn test_unknown_option_is_rejected() {
        let options = HashMap::from([("not_an_s3_option".to_string(), "x".to_string())]);
        let err = StorageProvider::for_url_with_options("s3://bucket/prefix", options)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::S3Config { .. }));
    }
}
