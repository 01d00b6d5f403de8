//! Google Cloud Storage client for promoted artifacts

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Body, Client};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::config::ObjectStoreConfig;

/// Object store upload failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("object store rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Durable storage that hands back a URL for an uploaded file.
///
/// Implementations must be safe to share between concurrently running jobs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `local_path` under `destination_key` and return a URL the object
    /// can be fetched from without further authentication.
    async fn upload(&self, local_path: &Path, destination_key: &str) -> Result<String, StorageError>;
}

/// GCS JSON API client
#[derive(Clone)]
pub struct GcsStorageClient {
    config: ObjectStoreConfig,
    client: Client,
}

impl GcsStorageClient {
    pub fn new(config: ObjectStoreConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Get the public URL for an object
    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.public_base.trim_end_matches('/'),
            self.config.bucket,
            urlencoding::encode(key)
        )
    }

    fn upload_url(&self, key: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bucket,
            urlencoding::encode(key)
        )
    }
}

#[async_trait]
impl ObjectStore for GcsStorageClient {
    async fn upload(&self, local_path: &Path, destination_key: &str) -> Result<String, StorageError> {
        let io_err = |source| StorageError::Io {
            path: local_path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(local_path).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();
        let content_type = mime_guess::from_path(local_path).first_or_octet_stream();
        let url = self.upload_url(destination_key);

        debug!(
            bucket = %self.config.bucket,
            key = %destination_key,
            size,
            content_type = %content_type,
            "Uploading to object store"
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", content_type.as_ref())
            .header("Content-Length", size)
            .body(Body::wrap_stream(ReaderStream::new(file)));

        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            let public_url = self.public_url(destination_key);
            debug!(public_url = %public_url, "Upload successful");
            Ok(public_url)
        } else {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                status = %status,
                body = %body,
                bucket = %self.config.bucket,
                key = %destination_key,
                "Failed to upload to object store"
            );
            Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
