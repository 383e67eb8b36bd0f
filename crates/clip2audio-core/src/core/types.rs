//! clip2audio Core Type Definitions
//!
//! Defines fundamental types used throughout the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::CoreError;

// =============================================================================
// ID Types
// =============================================================================

/// Pipeline run unique identifier (ULID)
pub type RunId = String;

/// Task unique identifier (ULID)
pub type TaskId = String;

/// Generates a fresh ULID string; never reused across submissions.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

// =============================================================================
// Audio Format
// =============================================================================

/// Target audio format of the finalized artifact
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Aac,
    Flac,
    Ogg,
    #[default]
    M4a,
}

impl AudioFormat {
    /// Every supported format, in display order
    pub const ALL: [AudioFormat; 6] = [
        AudioFormat::Mp3,
        AudioFormat::Wav,
        AudioFormat::Aac,
        AudioFormat::Flac,
        AudioFormat::Ogg,
        AudioFormat::M4a,
    ];

    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::M4a => "m4a",
        }
    }

    /// FFmpeg audio encoder used to produce this format
    pub fn encoder(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
            AudioFormat::Wav => "pcm_s16le",
            AudioFormat::Aac | AudioFormat::M4a => "aac",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "libvorbis",
        }
    }

    /// Comma separated list of supported names, for error messages
    pub fn supported_names() -> String {
        Self::ALL
            .iter()
            .map(|f| f.extension())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.extension() == normalized)
            .ok_or_else(|| {
                CoreError::InvalidInput(format!(
                    "Unsupported audio format: {}. Supported formats: {}",
                    s.trim(),
                    Self::supported_names()
                ))
            })
    }
}
