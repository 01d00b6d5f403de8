//! Temporary artifact cleanup
//!
//! Every job writes into the shared temporary area using file names that start
//! with the job's scope prefix (`<job id>_`). The janitor only ever removes
//! direct children of the temporary area whose names carry a scope prefix, so
//! one job's cleanup cannot touch another job's files.
//!
//! A job acquires a [`ScopeGuard`] before retrieval starts. Releasing the guard
//! runs the cleanup; if the guard is dropped without being released (the job
//! future was dropped or unwound) the cleanup runs from `Drop` instead.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::services::fetcher;

/// Job-scoped file names: a hyphenated UUID followed by `_`
static SCOPED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}_")
        .expect("valid regex")
});

/// What a cleanup pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub retained: Vec<PathBuf>,
    /// Files that could not be removed, with the error text
    pub failures: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Removes job-scoped files from the shared temporary area
#[derive(Clone)]
pub struct ArtifactJanitor {
    temp_dir: PathBuf,
    active: Arc<Mutex<HashSet<String>>>,
}

impl ArtifactJanitor {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Register the scope for `scope_id` and return its guard.
    pub fn acquire(&self, scope_id: &str) -> ScopeGuard {
        let prefix = format!("{scope_id}_");
        if !self.active.lock().insert(prefix.clone()) {
            warn!(scope = %prefix, "Cleanup scope acquired twice");
        }
        ScopeGuard {
            janitor: self.clone(),
            prefix,
            released: false,
        }
    }

    /// Number of scopes currently held by running jobs
    pub fn active_scopes(&self) -> usize {
        self.active.lock().len()
    }

    fn is_active(&self, file_name: &str) -> bool {
        self.active
            .lock()
            .iter()
            .any(|prefix| file_name.starts_with(prefix.as_str()))
    }

    /// Direct children of the temporary area that are regular files
    fn entries(&self) -> impl Iterator<Item = walkdir::DirEntry> {
        WalkDir::new(&self.temp_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
    }

    /// Remove every file whose name starts with `prefix`, except `keep`.
    fn sweep_scope(&self, prefix: &str, keep: Option<&Path>) -> CleanupReport {
        let mut report = CleanupReport::default();

        for entry in self.entries() {
            let name = entry.file_name().to_string_lossy();
            if !name.starts_with(prefix) {
                continue;
            }
            if keep.is_some_and(|k| k == entry.path()) {
                // retention is counted from the job's completion
                touch(entry.path());
                report.retained.push(entry.path().to_path_buf());
                continue;
            }
            remove(entry.path(), &mut report);
        }

        report
    }

    /// Remove job-scoped files older than `max_age` that no running job owns.
    pub fn sweep_expired(&self, max_age: Duration) -> CleanupReport {
        let mut report = CleanupReport::default();
        let now = SystemTime::now();

        for entry in self.entries() {
            let name = entry.file_name().to_string_lossy();
            if !SCOPED_NAME.is_match(&name) || self.is_active(&name) {
                continue;
            }

            let expired = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= max_age);

            if expired {
                remove(entry.path(), &mut report);
            }
        }

        report
    }
}

fn touch(path: &Path) {
    let result = std::fs::File::options()
        .write(true)
        .open(path)
        .and_then(|f| f.set_modified(SystemTime::now()));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to refresh artifact mtime");
    }
}

fn remove(path: &Path, report: &mut CleanupReport) {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed temporary file");
            report.removed.push(path.to_path_buf());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Temporary file already gone");
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
            report.failures.push((path.to_path_buf(), e.to_string()));
        }
    }
}

/// Ownership of one job's cleanup scope
pub struct ScopeGuard {
    janitor: ArtifactJanitor,
    prefix: String,
    released: bool,
}

impl ScopeGuard {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Output template for the media-fetch tool within this scope
    pub fn output_template(&self) -> PathBuf {
        fetcher::output_template(&self.janitor.temp_dir, &self.prefix)
    }

    /// Run the cleanup for this scope, keeping `keep` if given.
    pub fn release(mut self, keep: Option<&Path>) -> CleanupReport {
        self.released = true;
        self.finish(keep)
    }

    fn finish(&self, keep: Option<&Path>) -> CleanupReport {
        let report = self.janitor.sweep_scope(&self.prefix, keep);
        self.janitor.active.lock().remove(&self.prefix);
        report
    }
}

/// Only reached when a job future is dropped or unwinds before `release`.
/// The walk and deletes run synchronously on the dropping thread, which may
/// be a runtime worker; the scope is a handful of files.
impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let report = self.finish(None);
        info!(
            scope = %self.prefix,
            removed = report.removed.len(),
            "Cleanup ran for an abandoned job scope"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const JOB_A: &str = "0b8a3a8e-6d7f-4a53-9a55-3e1f3c0f6d11";
    const JOB_B: &str = "7c1e2f44-1b2a-4c3d-8e9f-0a1b2c3d4e5f";

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[test]
    fn test_release_removes_only_own_scope() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ArtifactJanitor::new(dir.path());

        let a_final = touch(dir.path(), &format!("{JOB_A}_abc.mp4"));
        let a_part = touch(dir.path(), &format!("{JOB_A}_abc.f137.mp4.part"));
        let b_final = touch(dir.path(), &format!("{JOB_B}_abc.mp4"));
        let unrelated = touch(dir.path(), "notes.txt");

        let guard_a = janitor.acquire(JOB_A);
        let _guard_b = janitor.acquire(JOB_B);
        let report = guard_a.release(None);

        let mut removed = report.removed.clone();
        removed.sort();
        let mut expected = vec![a_final.clone(), a_part.clone()];
        expected.sort();
        assert_eq!(removed, expected);
        assert!(!a_final.exists());
        assert!(!a_part.exists());
        assert!(b_final.exists());
        assert!(unrelated.exists());
        assert_eq!(janitor.active_scopes(), 1);
    }

    #[test]
    fn test_release_keeps_placed_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ArtifactJanitor::new(dir.path());
        let placed = touch(dir.path(), &format!("{JOB_A}_abc.mp4"));
        let leftover = touch(dir.path(), &format!("{JOB_A}_abc.f251.webm"));

        let report = janitor.acquire(JOB_A).release(Some(&placed));

        assert_eq!(report.retained, vec![placed.clone()]);
        assert_eq!(report.removed, vec![leftover.clone()]);
        assert!(placed.exists());
        assert!(!leftover.exists());
    }

    #[test]
    fn test_release_with_nothing_to_remove_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ArtifactJanitor::new(dir.path());
        let report = janitor.acquire(JOB_A).release(None);
        assert!(report.is_clean());
        assert!(report.removed.is_empty());
        assert_eq!(janitor.active_scopes(), 0);
    }

    #[test]
    fn test_missing_temp_dir_is_tolerated() {
        let janitor = ArtifactJanitor::new("/nonexistent/mediagrab-temp");
        let report = janitor.acquire(JOB_A).release(None);
        assert!(report.is_clean());
    }

    #[test]
    fn test_dropped_guard_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ArtifactJanitor::new(dir.path());
        let partial = touch(dir.path(), &format!("{JOB_A}_abc.mp4.part"));

        {
            let _guard = janitor.acquire(JOB_A);
        }

        assert!(!partial.exists());
        assert_eq!(janitor.active_scopes(), 0);
    }

    #[test]
    fn test_does_not_descend_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let inner = touch(&nested, &format!("{JOB_A}_abc.mp4"));

        let janitor = ArtifactJanitor::new(dir.path());
        janitor.acquire(JOB_A).release(None);

        assert!(inner.exists());
    }

    #[test]
    fn test_sweep_expired_skips_active_and_unscoped_files() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ArtifactJanitor::new(dir.path());

        let idle = touch(dir.path(), &format!("{JOB_A}_abc.mp4"));
        let running = touch(dir.path(), &format!("{JOB_B}_xyz.mp4.part"));
        let unscoped = touch(dir.path(), "keep-me.mp4");

        let _guard = janitor.acquire(JOB_B);
        let report = janitor.sweep_expired(Duration::ZERO);

        assert_eq!(report.removed, vec![idle.clone()]);
        assert!(!idle.exists());
        assert!(running.exists());
        assert!(unscoped.exists());
    }

    #[test]
    fn test_retained_artifact_ages_from_release() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ArtifactJanitor::new(dir.path());
        let placed = touch(dir.path(), &format!("{JOB_A}_abc.mp4"));

        // tools may stamp downloads with the source's Last-Modified time
        let month_ago = SystemTime::now() - Duration::from_secs(30 * 24 * 3600);
        std::fs::File::options()
            .write(true)
            .open(&placed)
            .unwrap()
            .set_modified(month_ago)
            .unwrap();

        janitor.acquire(JOB_A).release(Some(&placed));
        let report = janitor.sweep_expired(Duration::from_secs(3600));

        assert!(report.removed.is_empty());
        assert!(placed.exists());
    }

    #[test]
    fn test_sweep_expired_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let janitor = ArtifactJanitor::new(dir.path());
        let fresh = touch(dir.path(), &format!("{JOB_A}_abc.mp4"));

        let report = janitor.sweep_expired(Duration::from_secs(3600));

        assert!(report.removed.is_empty());
        assert!(fresh.exists());
    }
}
