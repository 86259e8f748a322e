//! Binary transfer client port (driven/secondary port)
//!
//! Raw upload/download primitives. The single-shot vs multipart choice is
//! made by the runner against the configured size threshold; this port just
//! exposes both shapes.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::domain::newtypes::ObjectToken;

/// Port trait for binary content transfer
#[async_trait::async_trait]
pub trait ITransferClient: Send + Sync {
    /// Uploads a local file in a single request, returning its token
    async fn upload(
        &self,
        folder: &ObjectToken,
        name: &str,
        source: &Path,
    ) -> anyhow::Result<ObjectToken>;

    /// Uploads a large local file in chunks, returning its token
    async fn upload_multipart(
        &self,
        folder: &ObjectToken,
        name: &str,
        source: &Path,
    ) -> anyhow::Result<ObjectToken>;

    /// Streams an object's content to `dest`, then stamps `modified_at`
    /// onto the written file so later mtime comparisons stay meaningful
    async fn download(
        &self,
        token: &ObjectToken,
        dest: &Path,
        modified_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    /// Streams an export-job artifact to `dest`
    ///
    /// Artifacts live behind a different endpoint than drive files and
    /// carry no mtime of their own.
    async fn download_artifact(&self, artifact: &ObjectToken, dest: &Path) -> anyhow::Result<()>;
}
