//! Job stage services and external integrations

pub mod fetcher;
pub mod gcs_storage;
pub mod janitor;
pub mod notifier;
pub mod placement;

pub use fetcher::{Artifact, CommandFetcher, MediaFetcher, RetrievalError};
pub use gcs_storage::{GcsStorageClient, ObjectStore, StorageError};
pub use janitor::{ArtifactJanitor, CleanupReport, ScopeGuard};
pub use notifier::{HttpNotifier, NotificationError, Notifier};
pub use placement::{Placement, PlacementKind, StoragePlacer};
