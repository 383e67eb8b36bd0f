//! One-shot audio extraction, outside the watched pipeline.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use super::MediaCodec;
use crate::core::classify::{kind_from_extension, MediaKind, VIDEO_EXTENSIONS};
use crate::core::{AudioFormat, CoreError, CoreResult};

/// Result of a successful [`extract_to`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: AudioFormat,
    pub size_bytes: u64,
}

impl ExtractReport {
    pub fn size_display(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// Human readable size: bytes, then KB, then MB with one decimal.
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    if size < KB {
        format!("{} bytes", size)
    } else if size < MB {
        format!("{:.1} KB", size as f64 / KB as f64)
    } else {
        format!("{:.1} MB", size as f64 / MB as f64)
    }
}

/// Output path for an extraction.
///
/// Without an explicit output the video path is reused with the format's
/// extension; an explicit output with a different extension is re-suffixed.
pub fn resolve_output_path(video: &Path, output: Option<&Path>, format: AudioFormat) -> PathBuf {
    let candidate = output.unwrap_or(video);
    let matches = candidate
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(format.extension()));

    if output.is_some() && matches {
        candidate.to_path_buf()
    } else {
        candidate.with_extension(format.extension())
    }
}

/// Extracts the audio track of `video` into `output` (or next to the video).
pub async fn extract_to(
    codec: &dyn MediaCodec,
    video: &Path,
    output: Option<&Path>,
    format: AudioFormat,
) -> CoreResult<ExtractReport> {
    if !video.exists() {
        return Err(CoreError::InvalidInput(format!(
            "Video file not found: {}",
            video.display()
        )));
    }
    if !video.is_file() {
        return Err(CoreError::InvalidInput(format!(
            "Path is not a file: {}",
            video.display()
        )));
    }
    if kind_from_extension(video) != Some(MediaKind::Video) {
        let ext = video
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let mut supported: Vec<&str> = VIDEO_EXTENSIONS.to_vec();
        supported.sort_unstable();
        return Err(CoreError::InvalidInput(format!(
            "Unsupported video format: {}. Supported formats: {}",
            ext,
            supported.join(", ")
        )));
    }

    let output_file = resolve_output_path(video, output, format);

    if let Some(parent) = output_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    if output_file.exists() {
        warn!(
            output = %output_file.display(),
            "Output file already exists and will be overwritten"
        );
    }

    info!(
        input = %video.display(),
        output = %output_file.display(),
        format = %format,
        codec = codec.name(),
        "Extracting audio"
    );

    codec.extract_audio(video, &output_file, format).await?;

    let size_bytes = tokio::fs::metadata(&output_file).await?.len();
    if size_bytes == 0 {
        return Err(CoreError::Codec(
            "Audio extraction created an empty file".to_string(),
        ));
    }

    Ok(ExtractReport {
        input: video.to_path_buf(),
        output: output_file,
        format,
        size_bytes,
    })
}
