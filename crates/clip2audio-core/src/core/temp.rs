//! Temp File Management
//!
//! Scratch paths live directly under the temp root as `<uuid><ext>`. A run
//! never touches them through anything but a [`CleanupList`], which releases
//! whatever it still holds when the run ends, whichever way it ends.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::{CoreError, CoreResult};

/// Attempts before giving up on finding a free name
const MAX_ALLOCATE_ATTEMPTS: usize = 8;

/// Allocates and releases uniquely named scratch files under one root
#[derive(Debug)]
pub struct TempFileManager {
    root: PathBuf,
}

impl TempFileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns a fresh `<root>/<uuid><ext>` path that does not exist yet.
    ///
    /// `namespace` only labels the allocation in logs. `extension` may be
    /// given with or without its leading dot, or empty.
    pub fn allocate(&self, namespace: &str, extension: &str) -> CoreResult<PathBuf> {
        let ext = extension.trim_start_matches('.');

        for _ in 0..MAX_ALLOCATE_ATTEMPTS {
            let id = uuid::Uuid::new_v4();
            let name = if ext.is_empty() {
                id.to_string()
            } else {
                format!("{id}.{ext}")
            };
            let path = self.root.join(name);

            // symlink_metadata so a dangling link also counts as taken
            if std::fs::symlink_metadata(&path).is_err() {
                debug!(namespace, path = %path.display(), "Allocated temp path");
                return Ok(path);
            }
        }

        Err(CoreError::ResourceExhausted(format!(
            "could not allocate a unique temp path under {}",
            self.root.display()
        )))
    }

    /// Deletes `path` if present. Returns whether a file was removed.
    ///
    /// A missing file is not an error; any other failure is logged.
    pub fn release(&self, path: &Path) -> bool {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Released temp path");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to release temp path");
                false
            }
        }
    }

    /// Removes regular files directly under the root older than `max_age`.
    ///
    /// Returns how many were removed.
    pub async fn sweep_stale(&self, max_age: Duration) -> CoreResult<usize> {
        let now = SystemTime::now();
        let mut removed = 0usize;

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age > max_age && self.release(&entry.path()) {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(root = %self.root.display(), removed, "Swept stale temp files");
        }
        Ok(removed)
    }
}

// =============================================================================
// Cleanup List
// =============================================================================

/// Temp paths owned by one run.
///
/// Every path is registered at allocation time and released exactly once:
/// by [`CleanupList::release_all`], or on drop if the run never got there.
#[derive(Debug)]
pub struct CleanupList {
    manager: Arc<TempFileManager>,
    namespace: String,
    paths: Vec<PathBuf>,
}

impl CleanupList {
    pub fn new(manager: Arc<TempFileManager>, namespace: impl Into<String>) -> Self {
        Self {
            manager,
            namespace: namespace.into(),
            paths: Vec::new(),
        }
    }

    /// Allocates a path and takes ownership of it
    pub fn allocate(&mut self, extension: &str) -> CoreResult<PathBuf> {
        let path = self.manager.allocate(&self.namespace, extension)?;
        self.paths.push(path.clone());
        Ok(path)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Releases every registered path; returns how many files existed.
    pub fn release_all(&mut self) -> usize {
        let manager = Arc::clone(&self.manager);
        self.paths
            .drain(..)
            .filter(|p| manager.release(p))
            .count()
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        if !self.paths.is_empty() {
            let released = self.release_all();
            debug!(namespace = %self.namespace, released, "Cleanup list dropped");
        }
    }
}
