//! Pipeline Coordinator
//!
//! Consumes watch events, classifies each file and hands supported ones to
//! the scheduler. Each event is handled on its own task, so a slow probe or
//! a long run never holds up the next event.
//!
//! At most `probe_limit` events are classified at once. When the scheduler's
//! pending queue is full, dispatch waits for room instead of dropping the
//! file, and the coordinator stops pulling new events until it has room.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::classify::{Classifier, MediaKind};
use super::pipeline::{Scheduler, RUN_EVENT_TARGET};
use super::watch::WatchEvent;
use super::{CoreError, RunId};

/// What happened to one watch event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A run was scheduled
    Submitted(RunId),
    /// Classified Unsupported and dropped
    Unsupported(String),
    /// Supported, but no run could be planned for it; the event is lost
    Rejected(String),
}

/// Event counters
#[derive(Debug, Default)]
struct Counters {
    events: AtomicU64,
    submitted: AtomicU64,
    unsupported: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of the coordinator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    pub events: u64,
    pub submitted: u64,
    pub unsupported: u64,
    pub rejected: u64,
}

/// Routes watch events to the classifier and the scheduler
#[derive(Clone)]
pub struct PipelineCoordinator {
    classifier: Classifier,
    scheduler: Scheduler,
    check_content: bool,
    /// Bounds concurrent content probes
    probes: Arc<Semaphore>,
    probe_limit: usize,
    counters: Arc<Counters>,
}

impl PipelineCoordinator {
    pub fn new(
        classifier: Classifier,
        scheduler: Scheduler,
        check_content: bool,
        probe_limit: usize,
    ) -> Self {
        let probe_limit = probe_limit.max(1);
        Self {
            classifier,
            scheduler,
            check_content,
            probes: Arc::new(Semaphore::new(probe_limit)),
            probe_limit,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            events: self.counters.events.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            unsupported: self.counters.unsupported.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Classifies the event's file and submits a run if it is supported.
    ///
    /// Returns once the run is scheduled, not when it finishes. Waits while
    /// the scheduler's pending queue is full.
    pub async fn dispatch(&self, event: WatchEvent) -> Dispatch {
        self.counters.events.fetch_add(1, Ordering::Relaxed);
        let path = event.path;

        let classification = {
            // The semaphore is never closed
            let _permit = self.probes.acquire().await.ok();
            self.classifier.classify(&path, self.check_content).await
        };
        if classification.kind == MediaKind::Unsupported {
            self.counters.unsupported.fetch_add(1, Ordering::Relaxed);
            warn!(
                path = %path.display(),
                detail = %classification.detail,
                "Unsupported file type, dropping event"
            );
            return Dispatch::Unsupported(classification.detail);
        }

        debug!(
            path = %path.display(),
            kind = ?classification.kind,
            detail = %classification.detail,
            "File classified"
        );

        loop {
            self.scheduler.wait_for_capacity().await;

            match self.scheduler.submit(&path, classification.kind).await {
                Ok(run_id) => {
                    self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                    info!(
                        run_id = %run_id,
                        path = %path.display(),
                        kind = ?classification.kind,
                        "Run submitted"
                    );
                    return Dispatch::Submitted(run_id);
                }
                // Another dispatch took the free slot
                Err(CoreError::ResourceExhausted(reason)) => {
                    debug!(path = %path.display(), reason = %reason, "Pending queue full, waiting");
                }
                Err(e) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target: RUN_EVENT_TARGET,
                        path = %path.display(),
                        kind = ?classification.kind,
                        error = %e,
                        "Run not submitted"
                    );
                    return Dispatch::Rejected(e.to_string());
                }
            }
        }
    }

    /// Consumes `events` on a background task until stopped or the channel closes.
    pub fn spawn(self, mut events: mpsc::UnboundedReceiver<WatchEvent>) -> CoordinatorHandle {
        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        let stats = self.clone();

        let task = tokio::spawn(async move {
            let mut dispatches: JoinSet<Dispatch> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = stop.notified() => {
                        debug!("Coordinator stopping");
                        break;
                    }
                    Some(_) = dispatches.join_next(), if !dispatches.is_empty() => {}
                    // Full: leave events in the channel until a dispatch finishes
                    event = events.recv(), if dispatches.len() < self.probe_limit => {
                        let Some(event) = event else {
                            debug!("Watch event channel closed");
                            break;
                        };
                        let coordinator = self.clone();
                        dispatches.spawn(async move { coordinator.dispatch(event).await });
                    }
                }
            }

            // Events still being classified are dropped with the coordinator
            dispatches.shutdown().await;
        });

        CoordinatorHandle {
            shutdown,
            task,
            coordinator: stats,
        }
    }
}

/// Handle to a running coordinator
pub struct CoordinatorHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
    coordinator: PipelineCoordinator,
}

impl CoordinatorHandle {
    pub fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    /// Stops consuming events and waits for the loop to exit.
    ///
    /// Runs already submitted keep going on the scheduler.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.task.await;
    }
}
