//! Export/import job client port (driven/secondary port)
//!
//! Export-capable remote types (spreadsheets, bases) cannot be downloaded
//! directly; the service converts them through an asynchronous job. The
//! runner submits, then polls with a bounded attempt count and fixed
//! interval until a terminal status.

use serde::{Deserialize, Serialize};

use crate::domain::newtypes::ObjectToken;

/// File format requested from an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Xlsx,
    Csv,
    Docx,
}

/// Handle for a submitted export/import job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket(pub String);

/// Terminal or in-flight state of a polled job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Still converting; poll again
    Pending,
    /// Finished; the payload identifies the produced artifact
    /// (export: downloadable file token; import: created document token)
    Done(ObjectToken),
    /// Terminal failure reported by the service
    Failed(String),
}

impl JobStatus {
    /// True for `Done` and `Failed`
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Port trait for asynchronous conversion jobs
#[async_trait::async_trait]
pub trait IJobClient: Send + Sync {
    /// Submits an export job for a remote object
    async fn submit_export(
        &self,
        token: &ObjectToken,
        format: ExportFormat,
    ) -> anyhow::Result<JobTicket>;

    /// Polls an export job's status
    async fn poll_export(&self, ticket: &JobTicket) -> anyhow::Result<JobStatus>;

    /// Submits an import job converting an uploaded raw file into a
    /// structured document inside `folder`
    async fn submit_import(
        &self,
        file_token: &ObjectToken,
        folder: &ObjectToken,
        title: &str,
    ) -> anyhow::Result<JobTicket>;

    /// Polls an import job's status
    async fn poll_import(&self, ticket: &JobTicket) -> anyhow::Result<JobStatus>;
}
