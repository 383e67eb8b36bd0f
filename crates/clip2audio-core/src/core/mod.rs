//! clip2audio Core Engine
//!
//! Ingestion pipeline: watcher, classification gate, staged task graph and
//! the temp-file lifecycle around it.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod fs;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod service;
pub mod temp;
pub mod watch;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;

#[cfg(test)]
mod tests_pipeline;
