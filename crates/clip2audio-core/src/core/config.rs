//! Pipeline Configuration
//!
//! A single explicit value resolved once at startup and handed to the
//! service. Nothing in the pipeline reads process-wide state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use super::{AudioFormat, CoreError, CoreResult};

/// Default debounce window for partially written files
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Default cap on runs waiting for a worker slot
pub const DEFAULT_MAX_PENDING_RUNS: usize = 1000;

/// Resolved pipeline configuration
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Directory observed for new files (recursive)
    pub watch_root: PathBuf,
    /// Directory that receives finalized audio files
    pub destination_dir: PathBuf,
    /// Scratch directory for staged and transformed artifacts
    pub temp_root: PathBuf,
    /// Target audio format
    pub audio_format: AudioFormat,
    /// Maximum number of runs executing at once
    pub concurrency: usize,
    /// Maximum number of runs waiting for a worker slot
    pub max_pending_runs: usize,
    /// Quiet period before a new file is considered fully written
    pub debounce: Duration,
    /// Whether classification opens the file through the codec
    pub check_content: bool,
    /// Upper bound for a single extraction
    pub codec_timeout: Option<Duration>,
    /// Temp files older than this are swept at startup
    pub stale_temp_max_age: Option<Duration>,
    /// Extra ignore globs, relative to the watch root
    pub ignore_patterns: Vec<String>,
    /// Explicit ffmpeg binary (otherwise detected)
    pub ffmpeg_path: Option<PathBuf>,
    /// Explicit ffprobe binary (otherwise detected)
    pub ffprobe_path: Option<PathBuf>,
}

impl PipelineConfig {
    /// Creates a configuration with defaults for everything but the directories
    pub fn new(
        watch_root: impl Into<PathBuf>,
        destination_dir: impl Into<PathBuf>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            watch_root: watch_root.into(),
            destination_dir: destination_dir.into(),
            temp_root: temp_root.into(),
            audio_format: AudioFormat::default(),
            concurrency: default_concurrency(),
            max_pending_runs: DEFAULT_MAX_PENDING_RUNS,
            debounce: DEFAULT_DEBOUNCE,
            check_content: true,
            codec_timeout: None,
            stale_temp_max_age: None,
            ignore_patterns: Vec::new(),
            ffmpeg_path: None,
            ffprobe_path: None,
        }
    }

    /// Sets the target audio format
    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.audio_format = format;
        self
    }

    /// Sets the worker concurrency limit
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Checks invariants that do not touch the filesystem.
    pub fn validate(&self) -> CoreResult<()> {
        if self.concurrency == 0 {
            return Err(CoreError::Config(
                "concurrency must be a positive integer".to_string(),
            ));
        }
        if self.max_pending_runs == 0 {
            return Err(CoreError::Config(
                "max_pending_runs must be a positive integer".to_string(),
            ));
        }

        let watch = lexical_absolute(&self.watch_root);
        for (label, dir) in [
            ("destination directory", &self.destination_dir),
            ("temp root", &self.temp_root),
        ] {
            if lexical_absolute(dir).starts_with(&watch) {
                return Err(CoreError::Config(format!(
                    "{label} {} must not be inside the watch root {}",
                    dir.display(),
                    self.watch_root.display()
                )));
            }
        }

        Ok(())
    }

    /// Validates and creates the watch root, destination and temp directories.
    ///
    /// Any failure here aborts startup before the watcher begins.
    pub fn prepare(&self) -> CoreResult<()> {
        self.validate()?;

        for (label, dir) in [
            ("watch root", &self.watch_root),
            ("destination directory", &self.destination_dir),
            ("temp root", &self.temp_root),
        ] {
            std::fs::create_dir_all(dir).map_err(|e| {
                CoreError::Config(format!("cannot create {label} {}: {e}", dir.display()))
            })?;
        }

        info!(
            watch_root = %self.watch_root.display(),
            destination_dir = %self.destination_dir.display(),
            temp_root = %self.temp_root.display(),
            format = %self.audio_format,
            concurrency = self.concurrency,
            "Pipeline directories ready"
        );
        Ok(())
    }
}

/// Default worker count: one per logical CPU, at least two
pub fn default_concurrency() -> usize {
    num_cpus::get().max(2)
}

/// Absolute, `.`/`..`-free form of a path without touching the filesystem
fn lexical_absolute(path: &Path) -> PathBuf {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().unwrap_or_default()
    };

    let mut out = PathBuf::new();
    for component in base.join(path).components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
