use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::info;
use uuid::Uuid;

use tabload_core::config::StorageConfig;

use crate::error::StorageError;

/// Location of an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Object storage for product images: local directory or S3 bucket.
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    public_base_url: String,
}

impl ObjectStorage {
    /// Pick S3 when a bucket is configured, otherwise the local data dir.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        if config.is_s3() {
            Self::s3(config)
        } else {
            Self::local(&config.data_dir.join("objects"), config.public_base_url.as_deref())
        }
    }

    pub fn local(dir: &Path, public_base_url: Option<&str>) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let canonical = std::fs::canonicalize(dir).unwrap_or_else(|_| PathBuf::from(dir));
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .map_err(|e| StorageError::Other(format!("local filesystem error: {e}")))?;
        let public_base_url = public_base_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("file://{}", canonical.display()));
        info!("Object storage: local backend at {}", canonical.display());
        Ok(Self {
            store: Arc::new(store),
            prefix: String::new(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn s3(config: &StorageConfig) -> Result<Self, StorageError> {
        let bucket = config
            .s3_bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("S3_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new()
            .with_region(&config.region)
            .with_bucket_name(bucket);

        if let Some(ref key) = config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = config.session_token {
            builder = builder.with_token(token);
        }
        if let Some(ref endpoint) = config.endpoint_url {
            // object_store requires an absolute URL for custom endpoints
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("https://{}", endpoint)
            };
            builder = builder
                .with_endpoint(&endpoint_url)
                .with_allow_http(endpoint_url.starts_with("http://"));
        }

        let store = builder.build()?;

        let prefix = config
            .s3_prefix
            .as_deref()
            .unwrap_or("")
            .trim_matches('/')
            .to_string();
        let public_base_url = config
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.s3.{}.amazonaws.com", bucket, config.region));

        info!(
            "Object storage: S3 backend s3://{}/{} (region: {})",
            bucket, prefix, config.region
        );

        Ok(Self {
            store: Arc::new(store),
            prefix,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Store `bytes` under `<prefix>/<folder>/<uuid>-<file_name>`.
    pub async fn upload(
        &self,
        folder: &str,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<StoredObject, StorageError> {
        let key = self.object_key(folder, file_name);
        self.store
            .put(&ObjectPath::from(key.as_str()), PutPayload::from(bytes))
            .await?;
        Ok(StoredObject {
            url: format!("{}/{}", self.public_base_url, key),
            key,
        })
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&ObjectPath::from(key)).await?;
        Ok(())
    }

    fn object_key(&self, folder: &str, file_name: &str) -> String {
        let name = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(file_name));
        [self.prefix.as_str(), folder.trim_matches('/'), name.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Keep file names to a safe subset for object keys.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.trim_matches(|c| c == '.' || c == '_').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
