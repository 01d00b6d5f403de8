//! Storage placement: keep an artifact on local ephemeral storage or promote it
//! to the object store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::services::fetcher::Artifact;
use crate::services::gcs_storage::{ObjectStore, StorageError};

/// Where a finished artifact is reachable from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementKind {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "gcs")]
    Promoted,
}

impl PlacementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementKind::Local => "local",
            PlacementKind::Promoted => "gcs",
        }
    }
}

impl std::fmt::Display for PlacementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Caller-facing reference to a placed artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(PathBuf),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub kind: PlacementKind,
    pub locator: Locator,
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error(
        "object store is not configured; artifact of {size_bytes} bytes exceeds the promotion threshold of {threshold_bytes} bytes"
    )]
    NotConfigured {
        size_bytes: u64,
        threshold_bytes: u64,
    },

    #[error(transparent)]
    Upload(#[from] StorageError),
}

/// Decides and executes artifact placement
#[derive(Clone)]
pub struct StoragePlacer {
    threshold_bytes: u64,
    store: Option<Arc<dyn ObjectStore>>,
}

impl StoragePlacer {
    pub fn new(threshold_bytes: u64, store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            threshold_bytes,
            store,
        }
    }

    pub fn is_store_configured(&self) -> bool {
        self.store.is_some()
    }

    /// Placement for an artifact of `size_bytes`. Only sizes strictly above the
    /// threshold are promoted.
    pub fn decide(&self, size_bytes: u64) -> PlacementKind {
        if size_bytes > self.threshold_bytes {
            PlacementKind::Promoted
        } else {
            PlacementKind::Local
        }
    }

    pub async fn place(&self, artifact: &Artifact) -> Result<Placement, PlacementError> {
        match self.decide(artifact.size_bytes) {
            PlacementKind::Local => {
                info!(
                    path = %artifact.local_path.display(),
                    size_bytes = artifact.size_bytes,
                    "Keeping artifact on local storage"
                );
                Ok(Placement {
                    kind: PlacementKind::Local,
                    locator: Locator::Path(artifact.local_path.clone()),
                })
            }
            PlacementKind::Promoted => {
                let store = self.store.as_ref().ok_or(PlacementError::NotConfigured {
                    size_bytes: artifact.size_bytes,
                    threshold_bytes: self.threshold_bytes,
                })?;

                let key = destination_key(&artifact.local_path);
                info!(
                    key = %key,
                    size_bytes = artifact.size_bytes,
                    "Promoting artifact to object store"
                );
                let url = store.upload(&artifact.local_path, &key).await?;

                Ok(Placement {
                    kind: PlacementKind::Promoted,
                    locator: Locator::Url(url),
                })
            }
        }
    }
}

/// Object key for an artifact: its sanitized base filename.
pub fn destination_key(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let key = sanitize_filename::sanitize(&name);
    if key.is_empty() {
        "artifact".to_string()
    } else {
        key
    }
}
