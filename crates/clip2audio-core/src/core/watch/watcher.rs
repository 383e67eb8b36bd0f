//! Directory Watcher
//!
//! Recursive filesystem monitoring of the watch root using `notify`, with
//! `notify-debouncer-mini` holding back paths that are still being written.
//! Emits one [`WatchEvent`] per file that appears after startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use tokio::sync::{mpsc, oneshot};
use walkdir::WalkDir;

use super::ignore::IgnoreRules;
use crate::core::{CoreError, CoreResult};

/// How often the watcher thread checks for a stop request
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Kind of watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
}

/// A file that appeared under the watch root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Absolute path of the new file
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: WatchEventKind::Created,
        }
    }
}

// =============================================================================
// Seen Files
// =============================================================================

/// Files known to exist under the root.
///
/// The debouncer only says "something happened to this path"; comparing
/// against this set turns that into "a new file appeared".
struct SeenFiles {
    root: PathBuf,
    ignore: Arc<IgnoreRules>,
    known: HashSet<PathBuf>,
}

impl SeenFiles {
    /// Records every file already present, so none of them is reported
    fn snapshot(root: PathBuf, ignore: Arc<IgnoreRules>) -> Self {
        let mut seen = Self {
            root,
            ignore,
            known: HashSet::new(),
        };
        let existing = seen.walk_files(&seen.root.clone());
        seen.known.extend(existing);
        seen
    }

    fn is_ignored(&self, path: &Path) -> bool {
        match path.strip_prefix(&self.root) {
            Ok(rel) => rel.as_os_str().is_empty() || self.ignore.is_ignored(rel),
            Err(_) => true,
        }
    }

    fn walk_files(&self, dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e.path()) || e.path() == self.root)
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    /// New files revealed by a change at `path`
    fn observe(&mut self, path: &Path) -> Vec<PathBuf> {
        if self.is_ignored(path) {
            return Vec::new();
        }

        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_file() => {
                if self.known.insert(path.to_path_buf()) {
                    vec![path.to_path_buf()]
                } else {
                    Vec::new()
                }
            }
            // A directory moved in (or created with content) reports only itself
            Ok(meta) if meta.is_dir() => self
                .walk_files(path)
                .into_iter()
                .filter(|p| self.known.insert(p.clone()))
                .collect(),
            Ok(_) => Vec::new(),
            Err(_) => {
                // Gone: forget it, and everything below it if it was a directory
                self.known.retain(|p| !p.starts_with(path));
                Vec::new()
            }
        }
    }
}

// =============================================================================
// Directory Watcher
// =============================================================================

/// File system watcher for the watch root
pub struct DirectoryWatcher {
    root: PathBuf,
    /// Dropping this stops the watcher thread
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Start watching `root` recursively.
    ///
    /// Files already present are not reported. Events go out on `event_tx`
    /// once a path has been quiet for `debounce`.
    pub fn start(
        root: &Path,
        debounce: Duration,
        ignore_rules: Arc<IgnoreRules>,
        event_tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> CoreResult<Self> {
        let root = std::fs::canonicalize(root).map_err(|e| {
            CoreError::Watcher(format!("Cannot resolve watch root {}: {}", root.display(), e))
        })?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(debounce, tx)
            .map_err(|e| CoreError::Watcher(format!("Failed to create file watcher: {}", e)))?;

        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)
            .map_err(|e| CoreError::Watcher(format!("Failed to watch directory: {}", e)))?;

        // Snapshot after the watch is registered so nothing slips between
        let mut seen = SeenFiles::snapshot(root.clone(), ignore_rules);
        tracing::info!(
            root = %root.display(),
            existing = seen.known.len(),
            debounce_ms = debounce.as_millis() as u64,
            "Directory watcher started"
        );

        let thread = std::thread::Builder::new()
            .name("clip2audio-watcher".to_string())
            .spawn(move || {
                // Keep the debouncer alive
                let _debouncer = debouncer;

                loop {
                    if stop_requested(&mut stop_rx) {
                        tracing::debug!("Directory watcher stopped by signal");
                        break;
                    }

                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(Ok(events)) => {
                            for event in events {
                                // AnyContinuous: still being written, a final Any follows
                                if !matches!(event.kind, DebouncedEventKind::Any) {
                                    continue;
                                }

                                for path in seen.observe(&event.path) {
                                    if stop_requested(&mut stop_rx) {
                                        return;
                                    }
                                    tracing::debug!(path = %path.display(), "File created");
                                    if event_tx.send(WatchEvent::created(path)).is_err() {
                                        tracing::debug!("Watch event channel closed, stopping watcher");
                                        return;
                                    }
                                }
                            }
                        }
                        Ok(Err(error)) => {
                            tracing::warn!(error = %error, "File watcher error");
                        }
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                            tracing::debug!("File watcher channel disconnected, stopping");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| CoreError::Watcher(format!("Failed to spawn watcher thread: {}", e)))?;

        Ok(Self {
            root,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Canonical watch root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the watcher thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the watcher. Events not yet delivered are dropped.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
            tracing::info!(root = %self.root.display(), "Directory watcher stopping");
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A sent signal and a dropped sender both mean stop
fn stop_requested(stop_rx: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        stop_rx.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}
