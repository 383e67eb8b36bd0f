//! clip2audio Core Library
//!
//! Watches a drop folder, classifies every new file as video, audio or
//! unsupported, and routes supported files through a staged task chain
//! (stage → transform → finalize) that leaves one audio file per input in
//! the destination directory.
//!
//! The command-line host lives in the `clip2audio-cli` crate; everything
//! with orchestration logic lives here.

pub mod core;

pub use crate::core::{
    config::PipelineConfig, service::PipelineService, AudioFormat, CoreError, CoreResult,
    FailureKind,
};
