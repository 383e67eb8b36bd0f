//! Pipeline runs: chain planning and execution.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::task::{Task, TaskKind, TaskState};
use crate::core::classify::{extension_of, MediaKind};
use crate::core::fs::{copy_file, publish_atomic};
use crate::core::media::MediaCodec;
use crate::core::temp::{CleanupList, TempFileManager};
use crate::core::{new_id, AudioFormat, CoreError, CoreResult, FailureKind, RunId};

/// Log target of the terminal run event
pub const RUN_EVENT_TARGET: &str = "clip2audio::run";

// =============================================================================
// Run Outcome
// =============================================================================

/// Terminal state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Succeeded,
    Failed,
}

/// What a finished run reports, once
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: RunId,
    pub source: PathBuf,
    pub media_kind: MediaKind,
    pub format: AudioFormat,
    pub state: RunState,
    /// Published file, on success
    pub output: Option<PathBuf>,
    pub output_bytes: Option<u64>,
    pub failed_stage: Option<TaskKind>,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub tasks: Vec<Task>,
    /// Temp files that existed at cleanup
    pub temp_released: usize,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// Outcome for a run that never produced its own report
    pub(crate) fn aborted(
        run_id: RunId,
        source: PathBuf,
        media_kind: MediaKind,
        format: AudioFormat,
        error: &CoreError,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            run_id,
            source,
            media_kind,
            format,
            state: RunState::Failed,
            output: None,
            output_bytes: None,
            failed_stage: None,
            failure: error.failure_kind(),
            error: Some(error.to_string()),
            tasks: Vec::new(),
            temp_released: 0,
            started_at: now.clone(),
            finished_at: now,
            duration_ms: 0,
        }
    }

    /// Emits the single terminal event for this run
    pub fn log(&self) {
        match self.state {
            RunState::Succeeded => info!(
                target: RUN_EVENT_TARGET,
                run_id = %self.run_id,
                source = %self.source.display(),
                kind = ?self.media_kind,
                output = ?self.output,
                bytes = self.output_bytes.unwrap_or(0),
                duration_ms = self.duration_ms,
                "Run succeeded"
            ),
            RunState::Failed => warn!(
                target: RUN_EVENT_TARGET,
                run_id = %self.run_id,
                source = %self.source.display(),
                kind = ?self.media_kind,
                stage = %self.failed_stage.map(|s| s.to_string()).unwrap_or_default(),
                failure = ?self.failure,
                error = %self.error.as_deref().unwrap_or(""),
                duration_ms = self.duration_ms,
                "Run failed"
            ),
        }
    }
}

// =============================================================================
// Pipeline Run
// =============================================================================

/// The pre-built chain for one source file.
///
/// Temp paths are allocated while planning and owned by the run's cleanup
/// list, so they are released even for tasks that never start.
#[derive(Debug)]
pub struct PipelineRun {
    id: RunId,
    source: PathBuf,
    media_kind: MediaKind,
    format: AudioFormat,
    tasks: Vec<Task>,
    cleanup: CleanupList,
}

impl PipelineRun {
    /// Builds Stage -> [Transform] -> Finalize for `source`.
    ///
    /// Transform exists only for video; audio is passed through.
    pub fn plan(
        source: &Path,
        media_kind: MediaKind,
        format: AudioFormat,
        destination_dir: &Path,
        temp: Arc<TempFileManager>,
    ) -> CoreResult<Self> {
        if !media_kind.is_supported() {
            return Err(CoreError::InvalidInput(format!(
                "cannot plan a run for unsupported file {}",
                source.display()
            )));
        }
        let stem = source
            .file_stem()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("source has no base name: {}", source.display()))
            })?;

        let id = new_id();
        let mut cleanup = CleanupList::new(temp, id.clone());
        let final_path = destination_dir.join(format!(
            "{}.{}",
            stem.to_string_lossy(),
            format.extension()
        ));

        let staged = cleanup.allocate(&extension_of(source))?;
        let stage = Task::new(TaskKind::Stage, source, &staged, None);

        let mut tasks = Vec::with_capacity(3);
        let finalize = match media_kind {
            MediaKind::Video => {
                let extracted = cleanup.allocate(format.extension())?;
                let transform = Task::new(TaskKind::Transform, &staged, &extracted, Some(&stage));
                let finalize = Task::new(TaskKind::Finalize, &extracted, &final_path, Some(&transform));
                tasks.push(stage);
                tasks.push(transform);
                finalize
            }
            _ => {
                let finalize = Task::new(TaskKind::Finalize, &staged, &final_path, Some(&stage));
                tasks.push(stage);
                finalize
            }
        };
        tasks.push(finalize);

        debug!(
            run_id = %id,
            source = %source.display(),
            tasks = tasks.len(),
            "Planned run"
        );

        Ok(Self {
            id,
            source: source.to_path_buf(),
            media_kind,
            format,
            tasks,
            cleanup,
        })
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn media_kind(&self) -> MediaKind {
        self.media_kind
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Public path the run publishes to
    pub fn destination(&self) -> &Path {
        self.tasks
            .last()
            .map(|t| t.output_path.as_path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Temp paths owned by the run
    pub fn temp_paths(&self) -> &[PathBuf] {
        self.cleanup.paths()
    }

    /// Executes the chain in order and reports the outcome.
    ///
    /// Every temp path is released before this returns, on every path.
    pub async fn execute(mut self, codec: &dyn MediaCodec) -> RunOutcome {
        let started_at = chrono::Utc::now().to_rfc3339();
        let clock = Instant::now();

        let mut failure: Option<(TaskKind, CoreError)> = None;
        let mut output_bytes = None;

        for idx in 0..self.tasks.len() {
            if let Err(e) = self.check_dependency(idx) {
                failure = Some((self.tasks[idx].kind, e));
                break;
            }
            if let Err(e) = self.tasks[idx].start() {
                failure = Some((self.tasks[idx].kind, e));
                break;
            }

            let task = &self.tasks[idx];
            debug!(
                run_id = %self.id,
                task_id = %task.id,
                stage = %task.kind,
                input = %task.input_path.display(),
                output = %task.output_path.display(),
                "Task started"
            );

            let result = self.run_task(task, codec).await;
            let kind = task.kind;
            let task = &mut self.tasks[idx];
            match result {
                Ok(bytes) => {
                    if let Err(e) = task.succeed() {
                        failure = Some((kind, e));
                        break;
                    }
                    if kind == TaskKind::Finalize {
                        output_bytes = Some(bytes);
                    }
                    debug!(run_id = %self.id, task_id = %task.id, stage = %kind, bytes, "Task succeeded");
                }
                Err(e) => {
                    if let Err(transition) = task.fail(e.to_string()) {
                        error!(run_id = %self.id, task_id = %task.id, error = %transition, "Task state out of sync");
                    }
                    failure = Some((kind, e));
                    break;
                }
            }
        }

        let temp_released = self.cleanup.release_all();

        let (state, failed_stage, kind, error) = match failure {
            None => (RunState::Succeeded, None, None, None),
            Some((stage, e)) => (
                RunState::Failed,
                Some(stage),
                e.failure_kind(),
                Some(e.to_string()),
            ),
        };
        let output = (state == RunState::Succeeded).then(|| self.destination().to_path_buf());

        RunOutcome {
            run_id: self.id.clone(),
            source: self.source.clone(),
            media_kind: self.media_kind,
            format: self.format,
            state,
            output,
            output_bytes,
            failed_stage,
            failure: kind,
            error,
            tasks: std::mem::take(&mut self.tasks),
            temp_released,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            duration_ms: clock.elapsed().as_millis() as u64,
        }
    }

    /// A task may only start once the task it depends on has succeeded
    fn check_dependency(&self, idx: usize) -> CoreResult<()> {
        let task = &self.tasks[idx];
        let Some(dep_id) = &task.depends_on else {
            return Ok(());
        };
        let dep = self.tasks[..idx]
            .iter()
            .find(|t| &t.id == dep_id)
            .ok_or_else(|| {
                CoreError::Internal(format!("task {} depends on unknown task {}", task.id, dep_id))
            })?;
        if dep.state != TaskState::Succeeded {
            return Err(CoreError::Internal(format!(
                "task {} started before its dependency {} succeeded",
                task.id, dep.id
            )));
        }
        Ok(())
    }

    /// Runs one task, mapping every error onto the task's failure category
    async fn run_task(&self, task: &Task, codec: &dyn MediaCodec) -> CoreResult<u64> {
        match task.kind {
            TaskKind::Stage => copy_file(task.input(), task.output())
                .await
                .map_err(|e| {
                    CoreError::StageFailed(format!(
                        "cannot copy {}: {}",
                        task.input().display(),
                        e
                    ))
                }),
            TaskKind::Transform => {
                codec
                    .extract_audio(task.input(), task.output(), self.format)
                    .await?;
                let bytes = tokio::fs::metadata(task.output())
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                if bytes == 0 {
                    return Err(CoreError::Codec(format!(
                        "{} produced an empty file",
                        codec.name()
                    )));
                }
                Ok(bytes)
            }
            TaskKind::Finalize => {
                if self.media_kind == MediaKind::Audio
                    && extension_of(&self.source) != format!(".{}", self.format.extension())
                {
                    warn!(
                        run_id = %self.id,
                        source = %self.source.display(),
                        format = %self.format,
                        "Passing audio through unchanged; content keeps its original encoding"
                    );
                }
                publish_atomic(task.input(), task.output())
                    .await
                    .map_err(|e| {
                        CoreError::FinalizeFailed(format!(
                            "cannot publish {}: {}",
                            task.output().display(),
                            e
                        ))
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> Arc<TempFileManager> {
        let root = dir.path().join("tmp");
        std::fs::create_dir_all(&root).unwrap();
        Arc::new(TempFileManager::new(root))
    }

    #[test]
    fn test_plan_video_chain() {
        let dir = TempDir::new().unwrap();
        let run = PipelineRun::plan(
            Path::new("/in/clip.mp4"),
            MediaKind::Video,
            AudioFormat::M4a,
            Path::new("/out"),
            manager(&dir),
        )
        .unwrap();

        let kinds: Vec<TaskKind> = run.tasks().iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TaskKind::Stage, TaskKind::Transform, TaskKind::Finalize]);

        let [stage, transform, finalize] = run.tasks() else {
            panic!("expected three tasks");
        };
        assert!(stage.depends_on.is_none());
        assert_eq!(transform.depends_on.as_ref(), Some(&stage.id));
        assert_eq!(finalize.depends_on.as_ref(), Some(&transform.id));

        assert_eq!(stage.output().extension().unwrap(), "mp4");
        assert_eq!(transform.input(), stage.output());
        assert_eq!(transform.output().extension().unwrap(), "m4a");
        assert_eq!(finalize.input(), transform.output());
        assert_eq!(run.destination(), Path::new("/out/clip.m4a"));
        assert_eq!(run.temp_paths().len(), 2);
    }

    #[test]
    fn test_plan_audio_skips_transform() {
        let dir = TempDir::new().unwrap();
        let run = PipelineRun::plan(
            Path::new("/in/track.wav"),
            MediaKind::Audio,
            AudioFormat::Mp3,
            Path::new("/out"),
            manager(&dir),
        )
        .unwrap();

        let [stage, finalize] = run.tasks() else {
            panic!("expected two tasks");
        };
        assert_eq!(finalize.depends_on.as_ref(), Some(&stage.id));
        assert_eq!(finalize.input(), stage.output());
        assert_eq!(run.destination(), Path::new("/out/track.mp3"));
        assert_eq!(run.temp_paths().len(), 1);
    }

    #[test]
    fn test_plan_rejects_unsupported() {
        let dir = TempDir::new().unwrap();
        let err = PipelineRun::plan(
            Path::new("/in/notes.txt"),
            MediaKind::Unsupported,
            AudioFormat::M4a,
            Path::new("/out"),
            manager(&dir),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_dropping_a_planned_run_releases_temps() {
        let dir = TempDir::new().unwrap();
        let temp = manager(&dir);
        let run = PipelineRun::plan(
            Path::new("/in/clip.mp4"),
            MediaKind::Video,
            AudioFormat::M4a,
            Path::new("/out"),
            Arc::clone(&temp),
        )
        .unwrap();

        for path in run.temp_paths() {
            std::fs::write(path, b"partial").unwrap();
        }
        drop(run);

        assert_eq!(std::fs::read_dir(temp.root()).unwrap().count(), 0);
    }

    #[test]
    fn test_run_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let temp = manager(&dir);
        let plan = || {
            PipelineRun::plan(
                Path::new("/in/clip.mp4"),
                MediaKind::Video,
                AudioFormat::M4a,
                Path::new("/out"),
                Arc::clone(&temp),
            )
            .unwrap()
        };
        let (a, b) = (plan(), plan());
        assert_ne!(a.id(), b.id());
        assert_ne!(a.temp_paths(), b.temp_paths());
        assert_eq!(a.destination(), b.destination());
    }

    /// Audio runs never reach the codec
    struct UnusedCodec;

    #[async_trait::async_trait]
    impl MediaCodec for UnusedCodec {
        fn name(&self) -> &str {
            "unused"
        }

        async fn probe(&self, _: &Path) -> crate::core::media::MediaResult<crate::core::media::ProbeReport> {
            unreachable!("no probing during a run")
        }

        async fn extract_audio(
            &self,
            _: &Path,
            _: &Path,
            _: AudioFormat,
        ) -> crate::core::media::MediaResult<()> {
            unreachable!("audio is passed through")
        }
    }

    #[tokio::test]
    async fn test_out_of_order_task_state_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let temp = manager(&dir);
        let src = dir.path().join("track.wav");
        let out = dir.path().join("out");
        std::fs::write(&src, b"pcm").unwrap();

        let mut run = PipelineRun::plan(&src, MediaKind::Audio, AudioFormat::Wav, &out, Arc::clone(&temp))
            .unwrap();
        // Finalize already marked done before the chain ran
        run.tasks[1].state = TaskState::Succeeded;

        let outcome = run.execute(&UnusedCodec).await;

        assert_eq!(outcome.state, RunState::Failed);
        assert_eq!(outcome.failed_stage, Some(TaskKind::Finalize));
        assert_eq!(outcome.failure, None);
        assert!(outcome.error.as_deref().unwrap().contains("cannot move"));
        assert!(outcome.output.is_none());
        assert!(!out.join("track.wav").exists());
        assert_eq!(std::fs::read_dir(temp.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_audio_run_reports_every_task_succeeded() {
        let dir = TempDir::new().unwrap();
        let temp = manager(&dir);
        let src = dir.path().join("track.wav");
        let out = dir.path().join("out");
        std::fs::write(&src, b"pcm").unwrap();

        let run = PipelineRun::plan(&src, MediaKind::Audio, AudioFormat::Wav, &out, temp).unwrap();
        let outcome = run.execute(&UnusedCodec).await;

        assert!(outcome.is_success());
        assert!(outcome.tasks.iter().all(|t| t.state == TaskState::Succeeded));
        assert!(outcome.tasks.iter().all(|t| t.completed_at.is_some()));
        assert_eq!(std::fs::read(out.join("track.wav")).unwrap(), b"pcm");
    }
}
