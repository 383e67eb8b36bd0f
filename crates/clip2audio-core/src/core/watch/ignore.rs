//! `.clip2audioignore` Parser
//!
//! Glob rules (via `globset`) for files the watcher must never report:
//! in-progress downloads, hidden files, OS clutter, plus user patterns.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Ignore file looked up in the watch root
pub const IGNORE_FILE_NAME: &str = ".clip2audioignore";

/// Partial-download suffixes and clutter that are never pipeline input
const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/*.part",
    "**/*.crdownload",
    "**/*.tmp",
    "**/*.ytdl",
    "**/*.download",
    "**/.*",
    "**/Thumbs.db",
];

/// Compiled ignore rules, matched against paths relative to the watch root
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    globset: GlobSet,
    patterns: Vec<String>,
}

impl IgnoreRules {
    /// Defaults, then `.clip2audioignore` lines from `watch_root`, then `extra`.
    pub fn load(watch_root: &Path, extra: &[String]) -> Self {
        let mut patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect();

        let ignore_path = watch_root.join(IGNORE_FILE_NAME);
        if let Ok(content) = std::fs::read_to_string(&ignore_path) {
            patterns.extend(content.lines().map(str::to_string));
        }
        patterns.extend(extra.iter().cloned());

        Self::from_patterns(&patterns)
    }

    /// Builds rules from raw pattern lines; blanks and `#` comments are skipped
    pub fn from_patterns(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut valid_patterns = Vec::new();

        for pattern in patterns {
            let trimmed = pattern.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match Glob::new(trimmed) {
                Ok(glob) => {
                    builder.add(glob);
                    valid_patterns.push(trimmed.to_string());
                }
                Err(e) => {
                    tracing::warn!(
                        pattern = trimmed,
                        error = %e,
                        "Skipping invalid ignore pattern"
                    );
                }
            }
        }

        let globset = builder.build().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build ignore globset, using empty set");
            GlobSet::empty()
        });

        Self {
            globset,
            patterns: valid_patterns,
        }
    }

    /// Built-in defaults only
    pub fn defaults() -> Self {
        let patterns: Vec<String> = DEFAULT_IGNORE_PATTERNS
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self::from_patterns(&patterns)
    }

    /// Whether a path relative to the watch root is ignored.
    ///
    /// A match on any leading directory ignores everything below it.
    pub fn is_ignored(&self, relative_path: &Path) -> bool {
        let path_str = relative_path.to_string_lossy().replace('\\', "/");
        if self.globset.is_match(&path_str) {
            return true;
        }

        let mut accumulated = String::new();
        for component in path_str.split('/') {
            if !accumulated.is_empty() {
                accumulated.push('/');
            }
            accumulated.push_str(component);

            if self.globset.is_match(&accumulated) {
                return true;
            }
        }

        false
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
