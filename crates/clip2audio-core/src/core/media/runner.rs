//! FFmpeg Runner Module
//!
//! [`MediaCodec`] implementation backed by the `ffmpeg`/`ffprobe` binaries.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AudioTrack, FFmpegInfo, MediaCodec, MediaError, MediaResult, ProbeReport, VideoTrack,
};
use crate::core::AudioFormat;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Codec adapter that shells out to FFmpeg
#[derive(Clone)]
pub struct FFmpegCodec {
    info: Arc<FFmpegInfo>,
    timeout: Option<Duration>,
}

impl FFmpegCodec {
    /// Create a codec from a detected FFmpeg installation
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
            timeout: None,
        }
    }

    /// Bounds the duration of a single extraction
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the FFmpeg info
    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    /// Build a command whose child dies with the future that awaits it
    fn command(program: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        #[cfg(target_os = "windows")]
        {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }
}

#[async_trait]
impl MediaCodec for FFmpegCodec {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(&self, input: &Path) -> MediaResult<ProbeReport> {
        if !input.exists() {
            return Err(MediaError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        // Run ffprobe with JSON output; the child is reaped by `output()`.
        let output = Self::command(&self.info.ffprobe_path)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .output()
            .await
            .map_err(MediaError::ProcessError)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::ProbeError(format!(
                "FFprobe failed: {}",
                stderr.trim()
            )));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn extract_audio(
        &self,
        src: &Path,
        dst: &Path,
        format: AudioFormat,
    ) -> MediaResult<()> {
        let report = self.probe(src).await?;
        if !report.has_audio() {
            return Err(MediaError::NoAudioTrack(src.display().to_string()));
        }

        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MediaError::OutputError(format!("Failed to create output directory: {}", e))
            })?;
        }

        let mut cmd = Self::command(&self.info.ffmpeg_path);
        cmd.args(["-nostdin", "-hide_banner", "-loglevel", "error", "-i"])
            .arg(src)
            .args(["-vn", "-map", "0:a:0", "-c:a", format.encoder(), "-y"])
            .arg(dst)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        tracing::debug!(
            src = %src.display(),
            dst = %dst.display(),
            encoder = format.encoder(),
            "Running ffmpeg audio extraction"
        );

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| MediaError::Timeout)?,
            None => cmd.output().await,
        }
        .map_err(MediaError::ProcessError)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::ExecutionFailed(format!(
                "Audio extraction failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }

        verify_non_empty(dst).await
    }
}

/// Reject a missing or zero-byte extraction result
async fn verify_non_empty(path: &Path) -> MediaResult<()> {
    let meta = tokio::fs::metadata(path).await.map_err(|_| {
        MediaError::OutputError(format!(
            "Audio extraction appeared to succeed but output file was not created: {}",
            path.display()
        ))
    })?;

    if meta.len() == 0 {
        return Err(MediaError::ExecutionFailed(
            "Audio extraction created an empty file".to_string(),
        ));
    }

    Ok(())
}

/// Parse FFprobe JSON output
fn parse_probe_output(json_str: &str) -> MediaResult<ProbeReport> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| MediaError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| MediaError::ParseError("Missing format info".to_string()))?;

    let container = format
        .get("format_name")
        .and_then(|f| f.as_str())
        .map(str::to_string);

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    // Container duration first, then the first stream that reports one
    let duration_sec = parse_numeric_str(format.get("duration")).or_else(|| {
        streams
            .iter()
            .find_map(|s| parse_numeric_str(s.get("duration")))
    });

    let mut video: Option<VideoTrack> = None;
    let mut audio: Option<AudioTrack> = None;

    for stream in &streams {
        match stream.get("codec_type").and_then(|c| c.as_str()) {
            Some("video") if video.is_none() && !is_attached_picture(stream) => {
                video = Some(parse_video_stream(stream));
            }
            Some("audio") if audio.is_none() => {
                audio = Some(parse_audio_stream(stream));
            }
            _ => {}
        }
    }

    Ok(ProbeReport {
        container,
        duration_sec,
        video,
        audio,
    })
}

/// Cover art in audio containers shows up as a one-frame video stream
fn is_attached_picture(stream: &serde_json::Value) -> bool {
    stream
        .get("disposition")
        .and_then(|d| d.get("attached_pic"))
        .and_then(|v| v.as_u64())
        == Some(1)
}

fn parse_numeric_str<T: std::str::FromStr>(value: Option<&serde_json::Value>) -> Option<T> {
    value.and_then(|v| v.as_str()).and_then(|s| s.parse::<T>().ok())
}

fn parse_video_stream(stream: &serde_json::Value) -> VideoTrack {
    // Parse frame rate from r_frame_rate (e.g., "30/1" or "30000/1001")
    let fps = stream
        .get("r_frame_rate")
        .and_then(|f| f.as_str())
        .and_then(|s| match s.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().ok()?;
                let den: f64 = den.parse().ok()?;
                (den > 0.0).then(|| num / den)
            }
            None => s.parse().ok(),
        })
        .filter(|fps| *fps > 0.0);

    VideoTrack {
        codec: stream
            .get("codec_name")
            .and_then(|c| c.as_str())
            .map(str::to_string),
        width: stream.get("width").and_then(|w| w.as_u64()).map(|w| w as u32),
        height: stream.get("height").and_then(|h| h.as_u64()).map(|h| h as u32),
        fps,
    }
}

fn parse_audio_stream(stream: &serde_json::Value) -> AudioTrack {
    AudioTrack {
        codec: stream
            .get("codec_name")
            .and_then(|c| c.as_str())
            .map(str::to_string),
        sample_rate: parse_numeric_str(stream.get("sample_rate")),
        channels: stream
            .get("channels")
            .and_then(|c| c.as_u64())
            .and_then(|c| u8::try_from(c).ok()),
    }
}
