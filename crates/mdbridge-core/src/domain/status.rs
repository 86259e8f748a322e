//! Per-task run status - ephemeral, in-memory
//!
//! One [`SyncTaskStatus`] per task id, overwritten at the start of each run
//! and mutated as files are processed. The [`StatusRegistry`] is the shared
//! surface the API layer polls; nothing here survives a restart.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::newtypes::TaskId;

/// Most recent per-file events kept per run
const EVENT_RING_CAPACITY: usize = 100;

/// Lifecycle of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// Finished with zero failed files
    Success,
    /// At least one failed file, or an uncaught error
    Failed,
    /// Cooperative cancellation observed
    Cancelled,
}

/// Outcome of processing one file within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Completed,
    Skipped,
    Failed,
}

/// One entry in the per-run event ring buffer
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub outcome: FileOutcome,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Live status of one task's current (or last) run
#[derive(Debug, Clone)]
pub struct SyncTaskStatus {
    pub task_id: TaskId,
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub last_error: Option<String>,
    events: VecDeque<FileEvent>,
}

impl SyncTaskStatus {
    pub fn idle(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: RunState::Idle,
            started_at: None,
            finished_at: None,
            total: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            last_error: None,
            events: VecDeque::new(),
        }
    }

    /// Fresh status for a starting run
    pub fn start(task_id: TaskId) -> Self {
        Self {
            state: RunState::Running,
            started_at: Some(Utc::now()),
            ..Self::idle(task_id)
        }
    }

    /// Records one file's outcome, bumping the matching counter and the
    /// bounded event ring
    pub fn record(&mut self, path: &Path, outcome: FileOutcome, message: impl Into<String>) {
        let message = message.into();
        match outcome {
            FileOutcome::Completed => self.completed += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed => {
                self.failed += 1;
                self.last_error = Some(format!("{}: {}", path.display(), message));
            }
        }
        self.total += 1;

        if self.events.len() == EVENT_RING_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(FileEvent {
            path: path.to_path_buf(),
            outcome,
            message,
            at: Utc::now(),
        });
    }

    /// Finishes the run: Failed if any file failed, Success otherwise
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.state = if self.failed > 0 {
            RunState::Failed
        } else {
            RunState::Success
        };
    }

    /// Finishes the run as failed with a run-level error
    pub fn finish_failed(&mut self, error: impl Into<String>) {
        self.finished_at = Some(Utc::now());
        self.state = RunState::Failed;
        self.last_error = Some(error.into());
    }

    /// Finishes the run as cancelled; partial progress counters remain
    pub fn finish_cancelled(&mut self) {
        self.finished_at = Some(Utc::now());
        self.state = RunState::Cancelled;
    }

    pub fn events(&self) -> impl Iterator<Item = &FileEvent> {
        self.events.iter()
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

/// Shared, concurrent map of task id → current status
#[derive(Debug, Default)]
pub struct StatusRegistry {
    statuses: DashMap<TaskId, SyncTaskStatus>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: TaskId) -> SyncTaskStatus {
        self.statuses
            .get(&task_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| SyncTaskStatus::idle(task_id))
    }

    pub fn put(&self, status: SyncTaskStatus) {
        self.statuses.insert(status.task_id, status);
    }

    /// Applies a mutation to the stored status, creating an idle one first
    /// if the task has never run
    pub fn update<F: FnOnce(&mut SyncTaskStatus)>(&self, task_id: TaskId, f: F) {
        let mut entry = self
            .statuses
            .entry(task_id)
            .or_insert_with(|| SyncTaskStatus::idle(task_id));
        f(&mut entry);
    }
}
