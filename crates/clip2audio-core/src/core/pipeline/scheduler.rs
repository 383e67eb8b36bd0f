//! Run Scheduler
//!
//! Executes pipeline runs on the tokio runtime, bounded by a semaphore so at
//! most `concurrency` codec invocations happen at once. Submission never waits
//! for a run; outcomes are reported on an optional channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify, RwLock, Semaphore};
use tracing::{debug, error, warn};

use super::run::{PipelineRun, RunOutcome};
use crate::core::classify::MediaKind;
use crate::core::config::PipelineConfig;
use crate::core::media::MediaCodec;
use crate::core::temp::TempFileManager;
use crate::core::{AudioFormat, CoreError, CoreResult, RunId};

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    /// Runs accepted
    pub submitted: u64,
    /// Runs refused because the pending queue was full
    pub rejected: u64,
    /// Runs holding a worker slot
    pub running: usize,
    /// Runs waiting for a worker slot
    pub queued: usize,
    pub succeeded: u64,
    pub failed: u64,
    /// Peak concurrent runs
    pub peak_concurrent: usize,
}

/// Decrements the in-flight count when a run is done, however it ends
struct InFlightGuard {
    count: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl InFlightGuard {
    fn new(count: Arc<AtomicUsize>, idle: Arc<Notify>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count, idle }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded executor for pipeline runs
#[derive(Clone)]
pub struct Scheduler {
    codec: Arc<dyn MediaCodec>,
    temp: Arc<TempFileManager>,
    destination_dir: PathBuf,
    format: AudioFormat,
    max_pending: usize,
    /// Concurrency semaphore
    semaphore: Arc<Semaphore>,
    stats: Arc<RwLock<SchedulerStats>>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    /// Signalled whenever a queued run leaves the queue
    capacity: Arc<Notify>,
    outcomes: Option<mpsc::UnboundedSender<RunOutcome>>,
}

impl Scheduler {
    pub fn new(
        config: &PipelineConfig,
        codec: Arc<dyn MediaCodec>,
        temp: Arc<TempFileManager>,
    ) -> Self {
        Self {
            codec,
            temp,
            destination_dir: config.destination_dir.clone(),
            format: config.audio_format,
            max_pending: config.max_pending_runs.max(1),
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            stats: Arc::new(RwLock::new(SchedulerStats::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            capacity: Arc::new(Notify::new()),
            outcomes: None,
        }
    }

    /// Delivers every terminal outcome on `tx`
    pub fn with_outcomes(mut self, tx: mpsc::UnboundedSender<RunOutcome>) -> Self {
        self.outcomes = Some(tx);
        self
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Plans a run for `source` and schedules it without waiting for it.
    ///
    /// Fails with `ResourceExhausted` when `max_pending_runs` runs are
    /// already waiting for a worker slot; no run is created then.
    pub async fn submit(&self, source: &Path, kind: MediaKind) -> CoreResult<RunId> {
        let run = self.admit(source, kind).await?;
        let run_id = run.id().clone();
        let guard = InFlightGuard::new(self.in_flight.clone(), self.idle.clone());
        let this = self.clone();

        tokio::spawn(async move {
            let _guard = guard;
            this.drive(run).await;
        });

        Ok(run_id)
    }

    /// Plans and executes a run inline, returning its outcome.
    pub async fn run_now(&self, source: &Path, kind: MediaKind) -> CoreResult<RunOutcome> {
        let run = self.admit(source, kind).await?;
        let _guard = InFlightGuard::new(self.in_flight.clone(), self.idle.clone());
        Ok(self.drive(run).await)
    }

    /// Gets current statistics
    pub async fn stats(&self) -> SchedulerStats {
        self.stats.read().await.clone()
    }

    /// Runs submitted and not yet reported
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once no run is in flight
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Resolves once the pending queue has room for another run.
    ///
    /// Another caller may take the slot first, so `submit` can still be
    /// refused afterwards.
    pub async fn wait_for_capacity(&self) {
        loop {
            let notified = self.capacity.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.stats.read().await.queued < self.max_pending {
                return;
            }
            notified.await;
        }
    }

    /// Refuses work beyond the pending cap, then plans the run
    async fn admit(&self, source: &Path, kind: MediaKind) -> CoreResult<PipelineRun> {
        {
            let mut stats = self.stats.write().await;
            if stats.queued >= self.max_pending {
                stats.rejected += 1;
                warn!(
                    source = %source.display(),
                    queued = stats.queued,
                    "Run rejected: pending queue is full"
                );
                return Err(CoreError::ResourceExhausted(format!(
                    "pending run queue is full ({} waiting)",
                    stats.queued
                )));
            }

            stats.submitted += 1;
            stats.queued += 1;
        }

        match PipelineRun::plan(
            source,
            kind,
            self.format,
            &self.destination_dir,
            Arc::clone(&self.temp),
        ) {
            Ok(run) => {
                debug!(run_id = %run.id(), source = %source.display(), "Run submitted");
                Ok(run)
            }
            Err(e) => {
                {
                    let mut stats = self.stats.write().await;
                    stats.submitted -= 1;
                    stats.queued = stats.queued.saturating_sub(1);
                }
                self.capacity.notify_waiters();
                Err(e)
            }
        }
    }

    /// Waits for a slot, executes the run and reports it exactly once
    async fn drive(&self, run: PipelineRun) -> RunOutcome {
        let run_id = run.id().clone();
        let source = run.source().to_path_buf();
        let kind = run.media_kind();

        let outcome = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => {
                {
                    let mut stats = self.stats.write().await;
                    stats.queued = stats.queued.saturating_sub(1);
                    stats.running += 1;
                    if stats.running > stats.peak_concurrent {
                        stats.peak_concurrent = stats.running;
                    }
                }
                self.capacity.notify_waiters();

                // Separate task so a panicking codec cannot take the worker down;
                // the run's cleanup list still releases on unwind.
                let codec = Arc::clone(&self.codec);
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    run.execute(codec.as_ref()).await
                });
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        error!(run_id = %run_id, error = %join_err, "Run task aborted");
                        let err = CoreError::Internal(format!("run task aborted: {join_err}"));
                        RunOutcome::aborted(run_id, source, kind, self.format, &err)
                    }
                };

                let mut stats = self.stats.write().await;
                stats.running = stats.running.saturating_sub(1);
                outcome
            }
            Err(_) => {
                let mut stats = self.stats.write().await;
                stats.queued = stats.queued.saturating_sub(1);
                drop(stats);
                self.capacity.notify_waiters();
                drop(run);
                let err = CoreError::Internal("scheduler is shut down".to_string());
                RunOutcome::aborted(run_id, source, kind, self.format, &err)
            }
        };

        {
            let mut stats = self.stats.write().await;
            if outcome.is_success() {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        }

        outcome.log();
        if let Some(tx) = &self.outcomes {
            let _ = tx.send(outcome.clone());
        }
        outcome
    }
}
