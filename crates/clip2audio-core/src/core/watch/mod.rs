//! Watch Module
//!
//! Observes the watch root and turns newly appeared files into
//! [`WatchEvent`]s, skipping anything matched by [`IgnoreRules`].

mod ignore;
mod watcher;

pub use ignore::{IgnoreRules, IGNORE_FILE_NAME};
pub use watcher::{DirectoryWatcher, WatchEvent, WatchEventKind};
