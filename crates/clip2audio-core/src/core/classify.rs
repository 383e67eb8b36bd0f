//! Classification Gate
//!
//! Decides whether a path is a video, an audio file, or unsupported. The
//! extension decides the candidate kind; an optional content probe through
//! the codec confirms it. Classification never touches the file's contents
//! beyond reading them.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::media::{MediaCodec, ProbeReport};

/// Video container extensions (lowercase, leading dot)
pub const VIDEO_EXTENSIONS: [&str; 20] = [
    ".mp4", ".avi", ".mov", ".mkv", ".wmv", ".flv", ".webm", ".m4v", ".3gp", ".mpg", ".mpeg",
    ".ts", ".mts", ".vob", ".asf", ".rm", ".rmvb", ".dv", ".f4v", ".m2ts",
];

/// Audio file extensions (lowercase, leading dot)
pub const AUDIO_EXTENSIONS: [&str; 20] = [
    ".mp3", ".wav", ".aac", ".flac", ".ogg", ".m4a", ".wma", ".aiff", ".au", ".ra", ".amr",
    ".ac3", ".dts", ".opus", ".mp2", ".mpa", ".ape", ".tak", ".tta", ".wv",
];

/// Classification of a file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Video,
    Audio,
    Unsupported,
}

impl MediaKind {
    pub fn is_supported(&self) -> bool {
        !matches!(self, MediaKind::Unsupported)
    }
}

/// Classifier verdict plus a human readable explanation
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub kind: MediaKind,
    pub detail: String,
    /// Probe result when content checking ran and succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeReport>,
}

impl Classification {
    fn unsupported(detail: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Unsupported,
            detail: detail.into(),
            probe: None,
        }
    }
}

/// Lowercased extension with its leading dot, or an empty string
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Candidate kind from the extension alone
pub fn kind_from_extension(path: &Path) -> Option<MediaKind> {
    let ext = extension_of(path);
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Audio)
    } else {
        None
    }
}

/// Extension allow-list check with an optional content probe
#[derive(Clone)]
pub struct Classifier {
    codec: Arc<dyn MediaCodec>,
}

impl Classifier {
    pub fn new(codec: Arc<dyn MediaCodec>) -> Self {
        Self { codec }
    }

    /// Classifies `path`.
    ///
    /// Every failure (missing path, unknown extension, unreadable content)
    /// is reported as [`MediaKind::Unsupported`] with the reason in `detail`.
    pub async fn classify(&self, path: &Path, check_content: bool) -> Classification {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(_) => {
                return Classification::unsupported(format!(
                    "File not found: {}",
                    path.display()
                ))
            }
        };
        if !meta.is_file() {
            return Classification::unsupported(format!("Path is not a file: {}", path.display()));
        }

        let ext = extension_of(path);
        let Some(kind) = kind_from_extension(path) else {
            return Classification::unsupported(format!(
                "File extension '{}' is not a supported video or audio format",
                ext
            ));
        };

        if !check_content {
            let label = if kind == MediaKind::Video { "video" } else { "audio" };
            return Classification {
                kind,
                detail: format!("File has valid {} extension: {}", label, ext),
                probe: None,
            };
        }

        let report = match self.codec.probe(path).await {
            Ok(report) => report,
            Err(e) => {
                let label = if kind == MediaKind::Video { "video" } else { "audio" };
                return Classification::unsupported(format!(
                    "File exists but cannot be loaded as {}: {}",
                    label, e
                ));
            }
        };

        let Some(duration) = report.positive_duration() else {
            return Classification::unsupported(match kind {
                MediaKind::Video => "File appears to be corrupted or has no video content",
                _ => "File appears to be corrupted or has no audio content",
            });
        };

        let detail = match kind {
            MediaKind::Video => report.video.as_ref().map(|video| {
                let fps = video.fps.map(format_fps).unwrap_or_else(unknown);
                let size = match (video.width, video.height) {
                    (Some(w), Some(h)) => format!("{}x{}", w, h),
                    _ => unknown(),
                };
                format!(
                    "Valid video file: {}, Duration: {:.2}s, FPS: {}, Size: {}",
                    ext, duration, fps, size
                )
            }),
            _ => report.audio.as_ref().map(|audio| {
                let rate = audio
                    .sample_rate
                    .map(|r| format!("{}Hz", r))
                    .unwrap_or_else(unknown);
                let channels = audio
                    .channels
                    .map(|c| c.to_string())
                    .unwrap_or_else(unknown);
                format!(
                    "Valid audio file: {}, Duration: {:.2}s, Sample Rate: {}, Channels: {}",
                    ext, duration, rate, channels
                )
            }),
        };

        match detail {
            Some(detail) => Classification {
                kind,
                detail,
                probe: Some(report),
            },
            None if kind == MediaKind::Video => {
                Classification::unsupported("File has no video stream")
            }
            None => Classification::unsupported("File has no audio stream"),
        }
    }
}

fn unknown() -> String {
    "Unknown".to_string()
}

/// Whole frame rates print without decimals ("30"), others with two ("29.97")
fn format_fps(fps: f64) -> String {
    if (fps - fps.round()).abs() < 1e-6 {
        format!("{:.0}", fps)
    } else {
        format!("{:.2}", fps)
    }
}
