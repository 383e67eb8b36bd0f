//! Pipeline Service
//!
//! Startup wiring and shutdown for the watched-folder pipeline:
//! configuration checks, FFmpeg detection, stale temp sweep, then the
//! watcher feeding the coordinator feeding the scheduler.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use super::classify::Classifier;
use super::config::PipelineConfig;
use super::coordinator::{CoordinatorHandle, CoordinatorStats, PipelineCoordinator};
use super::media::{detect_ffmpeg, FFmpegCodec, MediaCodec};
use super::pipeline::{RunOutcome, Scheduler, SchedulerStats};
use super::temp::TempFileManager;
use super::watch::{DirectoryWatcher, IgnoreRules};
use super::{CoreError, CoreResult};

/// A running pipeline
pub struct PipelineService {
    config: PipelineConfig,
    scheduler: Scheduler,
    watcher: Option<DirectoryWatcher>,
    coordinator: Option<CoordinatorHandle>,
    outcome_rx: Option<mpsc::UnboundedReceiver<RunOutcome>>,
}

impl PipelineService {
    /// Detects FFmpeg and starts the pipeline with it.
    pub async fn start(config: PipelineConfig) -> CoreResult<Self> {
        config.validate()?;

        let info = detect_ffmpeg(config.ffmpeg_path.as_deref(), config.ffprobe_path.as_deref())
            .map_err(|e| CoreError::Config(e.to_string()))?;
        info!(
            ffmpeg = %info.ffmpeg_path.display(),
            ffprobe = %info.ffprobe_path.display(),
            version = %info.version,
            "FFmpeg detected"
        );

        let codec = FFmpegCodec::new(info).with_timeout(config.codec_timeout);
        Self::start_with_codec(config, Arc::new(codec)).await
    }

    /// Starts the pipeline on an explicit codec.
    ///
    /// Any error here happens before the watcher is running.
    pub async fn start_with_codec(
        config: PipelineConfig,
        codec: Arc<dyn MediaCodec>,
    ) -> CoreResult<Self> {
        config.prepare()?;

        let temp = Arc::new(TempFileManager::new(&config.temp_root));
        if let Some(max_age) = config.stale_temp_max_age {
            temp.sweep_stale(max_age).await?;
        }

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let scheduler =
            Scheduler::new(&config, Arc::clone(&codec), temp).with_outcomes(outcome_tx);
        let coordinator = PipelineCoordinator::new(
            Classifier::new(codec),
            scheduler.clone(),
            config.check_content,
            config.concurrency,
        );

        let ignore = Arc::new(IgnoreRules::load(&config.watch_root, &config.ignore_patterns));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher =
            DirectoryWatcher::start(&config.watch_root, config.debounce, ignore, event_tx)?;
        let coordinator = coordinator.spawn(event_rx);

        info!(
            watch_root = %config.watch_root.display(),
            format = %config.audio_format,
            concurrency = config.concurrency,
            "Pipeline started"
        );

        Ok(Self {
            config,
            scheduler,
            watcher: Some(watcher),
            coordinator: Some(coordinator),
            outcome_rx: Some(outcome_rx),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Take the run outcome receiver (can only be called once).
    ///
    /// Outcomes queue up in memory until it is taken.
    pub fn take_outcome_rx(&mut self) -> Option<mpsc::UnboundedReceiver<RunOutcome>> {
        self.outcome_rx.take()
    }

    pub fn coordinator_stats(&self) -> CoordinatorStats {
        self.coordinator
            .as_ref()
            .map(CoordinatorHandle::stats)
            .unwrap_or_default()
    }

    /// Stops the watcher and the coordinator; with `drain`, waits for runs
    /// already submitted to finish.
    ///
    /// Events the watcher had not delivered yet are lost.
    pub async fn shutdown(mut self, drain: bool) -> SchedulerStats {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.stop().await;
        }
        if drain {
            self.scheduler.wait_idle().await;
        }

        let stats = self.scheduler.stats().await;
        info!(
            submitted = stats.submitted,
            succeeded = stats.succeeded,
            failed = stats.failed,
            in_flight = self.scheduler.in_flight(),
            "Pipeline stopped"
        );
        stats
    }
}
