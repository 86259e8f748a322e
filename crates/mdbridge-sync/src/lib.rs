//! mdbridge Sync - task runner, change filter and scheduler
//!
//! The driving side of the workspace:
//!
//! - [`runner`] - executes one sync run per task (download, upload,
//!   delete-reconciliation passes) against the injected port clients
//! - [`watcher`] - filesystem watching, debounce + self-write ignore
//!   filtering, and the per-task upload queue
//! - [`scheduler`] - the upload interval timer and the daily download timer
//! - [`conflict`] - divergent-edit detection feeding the conflict registry
//! - [`sanitize`] - remote names → safe local filenames
//!
//! Everything here is composed by the application shell via constructor
//! injection; there is no process-global state.

pub mod conflict;
pub mod runner;
pub mod sanitize;
pub mod scheduler;
pub mod watcher;

pub use conflict::{ConflictDetector, DetectionResult};
pub use runner::SyncRunner;
pub use scheduler::Scheduler;
pub use watcher::{ChangeEvent, ChangeFilter, FileWatcher, UploadQueue};

/// Errors raised by the sync layer itself
///
/// Remote-call failures stay `anyhow` at the port boundary; these are the
/// conditions the runner classifies for its own control flow.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The export/import job did not reach a terminal state within the
    /// configured attempt budget
    #[error("Job polling exhausted after {attempts} attempts: {context}")]
    JobPollExhausted { attempts: u32, context: String },

    /// The remote service reported the job failed
    #[error("Remote job failed: {0}")]
    JobFailed(String),
}
