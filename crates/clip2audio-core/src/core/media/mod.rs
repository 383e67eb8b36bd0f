//! Media Codec Module
//!
//! The narrow boundary to the codec library. The pipeline only ever talks to
//! [`MediaCodec`]; [`FFmpegCodec`] is the shipped implementation, driving the
//! `ffmpeg` and `ffprobe` binaries.

mod detection;
mod extract;
mod runner;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AudioFormat;

pub use detection::{detect_ffmpeg, detect_system_ffmpeg, get_ffmpeg_version, FFmpegInfo};
pub use extract::{extract_to, format_size, resolve_output_path, ExtractReport};
pub use runner::FFmpegCodec;

/// Codec-related error types
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("FFmpeg not found. Please install FFmpeg or configure explicit binary paths.")]
    NotFound,

    #[error("No audio track in {0}")]
    NoAudioTrack(String),

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("Output path error: {0}")]
    OutputError(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout: operation took too long")]
    Timeout,
}

pub type MediaResult<T> = Result<T, MediaError>;

// =============================================================================
// Probe Report
// =============================================================================

/// What a content probe learned about a file.
///
/// Every field the container may omit is an explicit `Option`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    /// Container format name
    pub container: Option<String>,
    /// Duration in seconds
    pub duration_sec: Option<f64>,
    /// First video stream, if any
    pub video: Option<VideoTrack>,
    /// First audio stream, if any
    pub audio: Option<AudioTrack>,
}

impl ProbeReport {
    /// Duration if the container reports a strictly positive one
    pub fn positive_duration(&self) -> Option<f64> {
        self.duration_sec.filter(|d| d.is_finite() && *d > 0.0)
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Video stream details (diagnostic only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoTrack {
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

/// Audio stream details (diagnostic only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

// =============================================================================
// Codec Trait
// =============================================================================

/// Operations the pipeline needs from a codec library
#[async_trait]
pub trait MediaCodec: Send + Sync {
    /// Returns the codec name (for logs)
    fn name(&self) -> &str;

    /// Opens the container at `path` and reports what it holds.
    ///
    /// Implementations must release every handle they open before returning.
    async fn probe(&self, path: &Path) -> MediaResult<ProbeReport>;

    /// Extracts the first audio stream of `src` into `dst`, encoded as `format`.
    ///
    /// Fails with [`MediaError::NoAudioTrack`] when `src` has no audio stream.
    async fn extract_audio(&self, src: &Path, dst: &Path, format: AudioFormat)
        -> MediaResult<()>;
}
