//! FFmpeg Detection Module
//!
//! Locates the `ffmpeg` and `ffprobe` binaries: explicit paths first, then
//! common install directories, then the system PATH.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{MediaError, MediaResult};

/// Information about a detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
}

/// Detect FFmpeg, honoring explicit binary paths when given.
pub fn detect_ffmpeg(
    ffmpeg_override: Option<&Path>,
    ffprobe_override: Option<&Path>,
) -> MediaResult<FFmpegInfo> {
    let ffmpeg_path = match ffmpeg_override {
        Some(path) if path.exists() => path.to_path_buf(),
        Some(path) => {
            return Err(MediaError::InvalidInput(format!(
                "Configured ffmpeg binary does not exist: {}",
                path.display()
            )))
        }
        None => find_binary("ffmpeg")?,
    };

    let ffprobe_path = match ffprobe_override {
        Some(path) if path.exists() => path.to_path_buf(),
        Some(path) => {
            return Err(MediaError::InvalidInput(format!(
                "Configured ffprobe binary does not exist: {}",
                path.display()
            )))
        }
        None => find_binary("ffprobe")?,
    };

    let version = get_ffmpeg_version(&ffmpeg_path)?;

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

/// Detect FFmpeg from common locations and the system PATH
pub fn detect_system_ffmpeg() -> MediaResult<FFmpegInfo> {
    detect_ffmpeg(None, None)
}

/// Find a binary by name in common locations, falling back to `which`/`where`
fn find_binary(name: &str) -> MediaResult<PathBuf> {
    #[cfg(target_os = "windows")]
    let file_name = format!("{name}.exe");

    #[cfg(not(target_os = "windows"))]
    let file_name = name.to_string();

    for dir in get_common_ffmpeg_paths() {
        let candidate = dir.join(&file_name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    #[cfg(target_os = "windows")]
    let lookup = "where";

    #[cfg(not(target_os = "windows"))]
    let lookup = "which";

    let output = Command::new(lookup)
        .arg(name)
        .output()
        .map_err(|_| MediaError::NotFound)?;

    if output.status.success() {
        let path_str = String::from_utf8_lossy(&output.stdout);
        if let Some(first_line) = path_str.lines().next() {
            let trimmed = first_line.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }
    }

    Err(MediaError::NotFound)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));

        // Chocolatey
        if let Ok(programdata) = std::env::var("ProgramData") {
            paths.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }

        // Scoop
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            paths.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/opt/local/bin")); // MacPorts
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Get FFmpeg version string
pub fn get_ffmpeg_version(ffmpeg_path: &Path) -> MediaResult<String> {
    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .map_err(MediaError::ProcessError)?;

    if !output.status.success() {
        return Err(MediaError::ExecutionFailed(format!(
            "{} -version exited with {}",
            ffmpeg_path.display(),
            output.status
        )));
    }

    parse_version_line(&String::from_utf8_lossy(&output.stdout))
}

/// Parse version from first line: "ffmpeg version X.X.X ..."
fn parse_version_line(output: &str) -> MediaResult<String> {
    let first_line = output
        .lines()
        .next()
        .ok_or_else(|| MediaError::ParseError("Could not parse FFmpeg version".to_string()))?;

    Ok(first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or(first_line)
        .to_string())
}
