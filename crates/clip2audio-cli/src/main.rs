//! clip2audio CLI
//!
//! Hosts the watched-folder pipeline and exposes the one-shot extractor and
//! the classifier for single files.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clip2audio_lib::core::classify::{Classifier, MediaKind};
use clip2audio_lib::core::logging::init_logging;
use clip2audio_lib::core::media::{detect_ffmpeg, extract_to, FFmpegCodec, FFmpegInfo};
use clip2audio_lib::{AudioFormat, PipelineConfig, PipelineService};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "clip2audio", version)]
#[command(about = "Watch a folder and turn dropped media into audio files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (RUST_LOG overrides it)
    #[arg(long, env = "DEBUG_LEVEL", default_value = "INFO", global = true)]
    log_level: String,

    /// Also write a daily rolling log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Explicit ffmpeg binary
    #[arg(long, global = true)]
    ffmpeg: Option<PathBuf>,

    /// Explicit ffprobe binary
    #[arg(long, global = true)]
    ffprobe: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a folder until Ctrl-C and extract audio from every new file
    Watch(WatchArgs),

    /// Extract the audio track of one video file
    Extract {
        /// Video file
        video: PathBuf,

        /// Output file (defaults to the video path with the format's extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target audio format
        #[arg(short, long, default_value = "m4a", value_parser = parse_format)]
        format: AudioFormat,
    },

    /// Report whether a file is a supported video or audio file
    Classify {
        path: PathBuf,

        /// Only check existence and extension
        #[arg(long)]
        no_content_check: bool,

        /// Print the classification as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct WatchArgs {
    /// Folder to watch for new files
    #[arg(long, env = "DOWNLOAD_DIR", default_value = "./downloads")]
    watch_dir: PathBuf,

    /// Folder that receives the audio files
    #[arg(long, env = "AUDIO_DIR", default_value = "./audios")]
    audio_dir: PathBuf,

    /// Scratch folder for intermediate files
    #[arg(long, env = "TMP_DIR", default_value = "./tmp")]
    tmp_dir: PathBuf,

    /// Target audio format
    #[arg(long, env = "AUDIO_FORMAT", default_value = "m4a", value_parser = parse_format)]
    format: AudioFormat,

    /// Concurrent runs (defaults to the number of CPUs)
    #[arg(long, env = "CLIP2AUDIO_WORKERS")]
    workers: Option<usize>,

    /// Maximum runs waiting for a worker
    #[arg(long)]
    max_pending: Option<usize>,

    /// Quiet period before a new file is reported
    #[arg(long, default_value_t = 500)]
    debounce_ms: u64,

    /// Classify by extension only
    #[arg(long)]
    no_content_check: bool,

    /// Abort a single extraction after this many seconds
    #[arg(long)]
    codec_timeout_secs: Option<u64>,

    /// Delete temp files older than this many seconds at startup
    #[arg(long)]
    stale_temp_secs: Option<u64>,

    /// Extra ignore glob, relative to the watch folder (repeatable)
    #[arg(long = "ignore")]
    ignore: Vec<String>,
}

fn parse_format(s: &str) -> Result<AudioFormat, String> {
    s.parse().map_err(|e: clip2audio_lib::CoreError| e.to_string())
}

impl WatchArgs {
    fn into_config(self, cli_ffmpeg: Option<PathBuf>, cli_ffprobe: Option<PathBuf>) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.watch_dir, self.audio_dir, self.tmp_dir)
            .with_format(self.format)
            .with_debounce(Duration::from_millis(self.debounce_ms));

        if let Some(workers) = self.workers {
            config = config.with_concurrency(workers);
        }
        if let Some(max_pending) = self.max_pending {
            config.max_pending_runs = max_pending;
        }
        config.check_content = !self.no_content_check;
        config.codec_timeout = self.codec_timeout_secs.map(Duration::from_secs);
        config.stale_temp_max_age = self.stale_temp_secs.map(Duration::from_secs);
        config.ignore_patterns = self.ignore;
        config.ffmpeg_path = cli_ffmpeg;
        config.ffprobe_path = cli_ffprobe;
        config
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let _log_guard = init_logging(&cli.log_level, cli.log_dir.as_deref())
        .context("Failed to initialize logging")?;

    match cli.command {
        Commands::Watch(args) => {
            let config = args.into_config(cli.ffmpeg, cli.ffprobe);
            watch(config).await
        }
        Commands::Extract {
            video,
            output,
            format,
        } => {
            let info = detect_ffmpeg(cli.ffmpeg.as_deref(), cli.ffprobe.as_deref())
                .context("FFmpeg is required for extraction")?;
            let codec = FFmpegCodec::new(info);
            let report = extract_to(&codec, &video, output.as_deref(), format)
                .await
                .with_context(|| format!("Failed to extract audio from {}", video.display()))?;

            println!(
                "Audio extracted: {} ({})",
                report.output.display(),
                report.size_display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Classify {
            path,
            no_content_check,
            json,
        } => {
            let check_content = !no_content_check;
            let info = match detect_ffmpeg(cli.ffmpeg.as_deref(), cli.ffprobe.as_deref()) {
                Ok(info) => info,
                Err(e) if check_content => {
                    return Err(e).context("FFmpeg is required for the content check");
                }
                // Never invoked without a content check
                Err(_) => FFmpegInfo {
                    ffmpeg_path: PathBuf::from("ffmpeg"),
                    ffprobe_path: PathBuf::from("ffprobe"),
                    version: "unknown".to_string(),
                },
            };

            let classifier = Classifier::new(Arc::new(FFmpegCodec::new(info)));
            let classification = classifier.classify(&path, check_content).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&classification)?);
            } else {
                println!("{:?}: {}", classification.kind, classification.detail);
            }

            Ok(if classification.kind == MediaKind::Unsupported {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

/// Runs the pipeline until Ctrl-C, then drains in-flight runs.
async fn watch(config: PipelineConfig) -> Result<ExitCode> {
    let mut service = PipelineService::start(config)
        .await
        .context("Failed to start the pipeline")?;
    let mut outcomes = service
        .take_outcome_rx()
        .context("Outcome channel already taken")?;

    info!(
        watch_dir = %service.config().watch_root.display(),
        audio_dir = %service.config().destination_dir.display(),
        "Watching for new files, press Ctrl-C to stop"
    );

    let (mut succeeded, mut failed) = (0u64, 0u64);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Cannot listen for Ctrl-C, stopping");
                }
                break;
            }
            outcome = outcomes.recv() => {
                // Each outcome has already been logged by the scheduler
                match outcome {
                    Some(outcome) if outcome.is_success() => succeeded += 1,
                    Some(_) => failed += 1,
                    None => break,
                }
            }
        }
    }

    info!("Shutting down, waiting for running conversions");
    let stats = service.shutdown(true).await;
    info!(
        succeeded = stats.succeeded,
        failed = stats.failed,
        rejected = stats.rejected,
        reported_succeeded = succeeded,
        reported_failed = failed,
        "Bye"
    );

    Ok(ExitCode::SUCCESS)
}
