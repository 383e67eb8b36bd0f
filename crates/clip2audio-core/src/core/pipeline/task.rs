//! Task records and their state machine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{new_id, CoreError, CoreResult, TaskId};

/// Task kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    /// Copy the source into the temp root
    Stage,
    /// Extract the audio track of a staged video
    Transform,
    /// Publish the artifact into the destination directory
    Finalize,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskKind::Stage => "stage",
            TaskKind::Transform => "transform",
            TaskKind::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Task state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    /// Succeeded and Failed never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// One node of a run's chain
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Task producing `input_path`; `None` for Stage
    pub depends_on: Option<TaskId>,
    pub state: TaskState,
    pub error: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Task {
    pub fn new(
        kind: TaskKind,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        depends_on: Option<&Task>,
    ) -> Self {
        Self {
            id: new_id(),
            kind,
            input_path: input_path.into(),
            output_path: output_path.into(),
            depends_on: depends_on.map(|t| t.id.clone()),
            state: TaskState::Pending,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn input(&self) -> &Path {
        &self.input_path
    }

    pub fn output(&self) -> &Path {
        &self.output_path
    }

    /// Pending -> Running
    pub fn start(&mut self) -> CoreResult<()> {
        if self.state != TaskState::Pending {
            return Err(self.transition_error(TaskState::Running));
        }
        self.state = TaskState::Running;
        self.started_at = Some(chrono::Utc::now().timestamp_millis());
        Ok(())
    }

    /// Running -> Succeeded
    pub fn succeed(&mut self) -> CoreResult<()> {
        self.finish(TaskState::Succeeded, None)
    }

    /// Running -> Failed
    pub fn fail(&mut self, error: impl Into<String>) -> CoreResult<()> {
        self.finish(TaskState::Failed, Some(error.into()))
    }

    fn finish(&mut self, state: TaskState, error: Option<String>) -> CoreResult<()> {
        if self.state != TaskState::Running {
            return Err(self.transition_error(state));
        }
        self.state = state;
        self.error = error;
        self.completed_at = Some(chrono::Utc::now().timestamp_millis());
        Ok(())
    }

    fn transition_error(&self, to: TaskState) -> CoreError {
        CoreError::Internal(format!(
            "task {} ({}) cannot move from {:?} to {:?}",
            self.id, self.kind, self.state, to
        ))
    }

    /// Elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> Option<i64> {
        self.started_at.map(|start| {
            let end = self
                .completed_at
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            end - start
        })
    }
}
