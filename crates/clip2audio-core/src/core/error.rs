//! clip2audio Error Definitions
//!
//! Defines error types used throughout the pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::media::MediaError;

/// Core pipeline error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Startup Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    // =========================================================================
    // Run Errors
    // =========================================================================
    #[error("Stage failed: {0}")]
    StageFailed(String),

    #[error("No audio track: {0}")]
    NoAudioTrack(String),

    #[error("Codec failure: {0}")]
    Codec(String),

    #[error("Finalize failed: {0}")]
    FinalizeFailed(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core pipeline result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Failure category reported on a failed run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    StageFailure,
    NoAudioTrack,
    CodecFailure,
    FinalizeFailure,
}

impl CoreError {
    /// Maps a run error onto the reported failure category.
    ///
    /// Errors that are not produced by a task (configuration, watcher, ...)
    /// have no category.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CoreError::StageFailed(_) => Some(FailureKind::StageFailure),
            CoreError::NoAudioTrack(_) => Some(FailureKind::NoAudioTrack),
            CoreError::Codec(_) => Some(FailureKind::CodecFailure),
            CoreError::FinalizeFailed(_) => Some(FailureKind::FinalizeFailure),
            _ => None,
        }
    }
}

impl From<MediaError> for CoreError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NoAudioTrack(path) => CoreError::NoAudioTrack(path),
            other => CoreError::Codec(other.to_string()),
        }
    }
}
