//! Sync run execution
//!
//! [`SyncRunner`] performs one full run for a task: a download pass walking
//! the remote folder tree, an upload pass draining the local change queue,
//! and a delete-reconciliation pass executing due tombstones. All remote
//! calls go through injected port clients; transient failures are retried
//! with exponential backoff. Runs are cooperative: a [`CancellationToken`]
//! is checked between files and inside job-poll waits.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mdbridge_core::config::Config;
use mdbridge_core::domain::block_state::document_state;
use mdbridge_core::domain::link::RemoteObjectType;
use mdbridge_core::domain::newtypes::{ContentHash, ObjectToken, TaskId};
use mdbridge_core::ports::{
    DeleteOutcome, ExportFormat, ICredentialProvider, IDocClient, IDriveClient, IJobClient,
    IStateRepository, ITransferClient, JobStatus, JobTicket, RemoteObject, RemoteObjectKind,
};
use mdbridge_core::{
    DocUpdateMode, FileOutcome, MarkdownMode, StatusRegistry, SyncDirection, SyncLink, SyncTask,
    SyncTaskStatus, SyncTombstone, TombstoneSource,
};

use mdbridge_codec::{diff, split_markdown, BlockTree, Decoder, DiffOutcome};

use crate::conflict::ConflictDetector;
use crate::sanitize::sanitize_file_name;
use crate::watcher::{ChangeFilter, UploadQueue};
use crate::SyncError;

// ============================================================================
// Retry policy
// ============================================================================

/// Maximum retry attempts for transient remote errors
const MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff (1 second)
const BASE_DELAY_SECS: u64 = 1;

/// Determines whether an error is transient (retryable)
///
/// Transient errors include network failures, rate limiting (HTTP 429) and
/// server errors (HTTP 5xx).
fn is_transient_error(err: &anyhow::Error) -> bool {
    let err_str = format!("{err:#}").to_lowercase();

    if err_str.contains("network")
        || err_str.contains("connection")
        || err_str.contains("timeout")
        || err_str.contains("dns")
        || err_str.contains("reset by peer")
        || err_str.contains("broken pipe")
    {
        return true;
    }

    if err_str.contains("429")
        || err_str.contains("too many requests")
        || err_str.contains("rate limit")
    {
        return true;
    }

    if err_str.contains("500")
        || err_str.contains("502")
        || err_str.contains("503")
        || err_str.contains("504")
        || err_str.contains("server error")
    {
        return true;
    }

    false
}

/// Runs an async operation, retrying transient errors with exponential
/// backoff
async fn with_retry<F, Fut, T>(operation_name: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..=MAX_RETRIES {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_transient_error(&err) {
                    let delay_secs = BASE_DELAY_SECS * 2u64.pow(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_secs,
                        error = %err,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                    last_error = Some(err);
                } else {
                    return Err(err);
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("retry budget exhausted")))
}

// ============================================================================
// SyncRunner
// ============================================================================

/// Remote folder name holding raw Markdown mirror copies
const MIRROR_FOLDER: &str = ".md-mirror";

/// Local folder name (relative to each document) for downloaded assets
const ASSETS_FOLDER: &str = "assets";

/// Executes sync runs for tasks, one at a time per task
pub struct SyncRunner {
    drive: Arc<dyn IDriveClient>,
    docs: Arc<dyn IDocClient>,
    jobs: Arc<dyn IJobClient>,
    transfer: Arc<dyn ITransferClient>,
    credentials: Arc<dyn ICredentialProvider>,
    repository: Arc<dyn IStateRepository>,
    status: Arc<StatusRegistry>,
    conflicts: ConflictDetector,
    filter: Arc<ChangeFilter>,
    queue: Arc<UploadQueue>,
    config: Config,
    active: DashMap<TaskId, CancellationToken>,
}

impl SyncRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        drive: Arc<dyn IDriveClient>,
        docs: Arc<dyn IDocClient>,
        jobs: Arc<dyn IJobClient>,
        transfer: Arc<dyn ITransferClient>,
        credentials: Arc<dyn ICredentialProvider>,
        repository: Arc<dyn IStateRepository>,
        status: Arc<StatusRegistry>,
        conflicts: ConflictDetector,
        filter: Arc<ChangeFilter>,
        queue: Arc<UploadQueue>,
        config: Config,
    ) -> Self {
        Self {
            drive,
            docs,
            jobs,
            transfer,
            credentials,
            repository,
            status,
            conflicts,
            filter,
            queue,
            config,
            active: DashMap::new(),
        }
    }

    /// Starts a run for a task
    ///
    /// If a run is already active for this task the call is a no-op and
    /// returns the current status. The returned status is the state after
    /// the run finishes (the call awaits completion).
    pub async fn start(&self, task_id: TaskId) -> Result<SyncTaskStatus> {
        let cancel = CancellationToken::new();
        match self.active.entry(task_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                info!(task_id = %task_id, "Run already active, skipping");
                return Ok(self.status.get(task_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }

        let result = self.run_guarded(task_id, &cancel).await;
        self.active.remove(&task_id);
        result?;
        Ok(self.status.get(task_id))
    }

    /// Requests cancellation of an active run; returns false if none
    pub fn cancel(&self, task_id: TaskId) -> bool {
        match self.active.get(&task_id) {
            Some(token) => {
                info!(task_id = %task_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// The last observed status for a task
    pub fn status(&self, task_id: TaskId) -> SyncTaskStatus {
        self.status.get(task_id)
    }

    async fn run_guarded(&self, task_id: TaskId, cancel: &CancellationToken) -> Result<()> {
        let task = self
            .repository
            .get_task(task_id)
            .await?
            .with_context(|| format!("Unknown task: {task_id}"))?;

        if !task.is_enabled() {
            debug!(task_id = %task_id, "Task disabled, skipping run");
            return Ok(());
        }

        info!(task_id = %task_id, name = task.name(), "Run starting");
        self.status.put(SyncTaskStatus::start(task_id));

        let outcome = self.run_passes(&task, cancel).await;

        match outcome {
            Ok(()) if cancel.is_cancelled() => {
                info!(task_id = %task_id, "Run cancelled");
                self.status.update(task_id, |s| s.finish_cancelled());
            }
            Ok(()) => {
                self.status.update(task_id, |s| s.finish());
                info!(task_id = %task_id, "Run finished");
            }
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Run failed");
                self.status
                    .update(task_id, |s| s.finish_failed(format!("{err:#}")));
            }
        }
        Ok(())
    }

    async fn run_passes(&self, task: &SyncTask, cancel: &CancellationToken) -> Result<()> {
        // Fail fast before touching any pass if credentials are broken
        self.credentials
            .bearer_token()
            .await
            .context("Credential preflight failed")?;

        if task.direction().allows_download() && !cancel.is_cancelled() {
            self.download_pass(task, cancel).await?;
        }
        if task.direction().allows_upload() && !cancel.is_cancelled() {
            self.upload_pass(task, cancel).await?;
        }
        if !cancel.is_cancelled() {
            self.delete_pass(task, cancel).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Download pass
    // ========================================================================

    #[tracing::instrument(skip_all, fields(task_id = %task.id()))]
    async fn download_pass(&self, task: &SyncTask, cancel: &CancellationToken) -> Result<()> {
        let task_id = task.id();
        debug!("Download pass starting");

        // Walk the remote tree breadth-first, recording folder links as we
        // go so the upload pass can resolve parents later. Mirror folders
        // hold our own copies and are never pulled down.
        let mut pending: Vec<(ObjectToken, PathBuf)> =
            vec![(task.remote_folder().clone(), task.local_root().to_path_buf())];
        let mut files: Vec<(RemoteObject, PathBuf)> = Vec::new();
        let mut seen_tokens: HashSet<String> = HashSet::new();

        while let Some((folder, local_dir)) = pending.pop() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let children = with_retry("list_folder", || self.drive.list_folder(&folder)).await?;
            for child in children {
                seen_tokens.insert(child.token.to_string());
                match child.kind {
                    RemoteObjectKind::Folder => {
                        if child.name == MIRROR_FOLDER {
                            continue;
                        }
                        let dir = local_dir.join(sanitize_file_name(&child.name));
                        if self.repository.get_link(&dir).await?.is_none() {
                            let link = SyncLink::new(
                                dir.clone(),
                                child.token.clone(),
                                RemoteObjectType::Folder,
                                task_id,
                            );
                            self.repository.save_link(&link).await?;
                        }
                        pending.push((child.token.clone(), dir));
                    }
                    _ => files.push((child, local_dir.clone())),
                }
            }
        }

        let token_paths = self.known_token_paths(task).await?;

        for (object, local_dir) in files {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let path = self.effective_local_path(task, &object, &local_dir).await?;
            if let Err(err) = self
                .download_one(task, &object, &path, &token_paths, cancel)
                .await
            {
                warn!(path = %path.display(), error = %err, "Download failed");
                self.status
                    .update(task_id, |s| s.record(&path, FileOutcome::Failed, format!("{err:#}")));
            }
        }

        if !cancel.is_cancelled() {
            self.detect_cloud_deletions(task, &seen_tokens).await?;
        }

        Ok(())
    }

    /// Paths for remote tokens the task already knows, keyed by token
    ///
    /// Fed to the decoder so inline links to sibling documents render as
    /// relative file links instead of raw URLs.
    async fn known_token_paths(&self, task: &SyncTask) -> Result<HashMap<String, PathBuf>> {
        let mut map = HashMap::new();
        for link in self.repository.list_links(task.id()).await? {
            if let Ok(rel) = link.local_path().strip_prefix(task.local_root()) {
                map.insert(link.remote_token().to_string(), rel.to_path_buf());
            }
        }
        Ok(map)
    }

    /// The local path a remote object maps to
    ///
    /// An existing link wins so local renames stick; otherwise derive from
    /// the sanitized remote name plus the kind-specific extension.
    async fn effective_local_path(
        &self,
        task: &SyncTask,
        object: &RemoteObject,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        if let Some(link) = self.repository.get_link_by_token(&object.token).await? {
            if link.task_id() == task.id() {
                return Ok(link.local_path().to_path_buf());
            }
        }
        let base = sanitize_file_name(&object.name);
        let name = match object.kind {
            RemoteObjectKind::Document => format!("{base}.md"),
            RemoteObjectKind::Sheet => format!("{base}.xlsx"),
            RemoteObjectKind::Base => format!("{base}.csv"),
            _ => base,
        };
        Ok(local_dir.join(name))
    }

    async fn download_one(
        &self,
        task: &SyncTask,
        object: &RemoteObject,
        path: &Path,
        token_paths: &HashMap<String, PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let task_id = task.id();
        let link = self.repository.get_link(path).await?;

        if let Some(ref link) = link {
            // Both fingerprints must hold before skipping: a locally
            // tampered file is re-fetched even when the remote sat still
            if link.remote_unchanged(object.revision, object.modified_at)
                && path.exists()
                && self.local_matches_link(path, link).await?
            {
                debug!(path = %path.display(), "Both sides unchanged, skipping");
                self.status
                    .update(task_id, |s| s.record(path, FileOutcome::Skipped, "remote unchanged"));
                return Ok(());
            }
            // A local file stamped newer than the remote's last-known mtime
            // is left alone in bidirectional mode; the upload pass owns it.
            if task.direction() == SyncDirection::Bidirectional
                && self.local_newer_than_known_remote(path, link)
            {
                debug!(path = %path.display(), "Local file newer, skipping download");
                self.status
                    .update(task_id, |s| s.record(path, FileOutcome::Skipped, "local newer"));
                return Ok(());
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let remote_type = match object.kind {
            RemoteObjectKind::Document => {
                self.download_document(object, path, token_paths).await?;
                RemoteObjectType::Document
            }
            RemoteObjectKind::Sheet => {
                self.download_via_export(object, path, ExportFormat::Xlsx, cancel)
                    .await?;
                RemoteObjectType::Sheet
            }
            RemoteObjectKind::Base => {
                self.download_via_export(object, path, ExportFormat::Csv, cancel)
                    .await?;
                RemoteObjectType::Base
            }
            _ => {
                self.filter.register_ignore(path);
                with_retry("download", || {
                    self.transfer.download(&object.token, path, object.modified_at)
                })
                .await?;
                RemoteObjectType::File
            }
        };

        let bytes = tokio::fs::read(path).await?;
        let hash = hash_bytes(&bytes)?;
        let mut link = link.unwrap_or_else(|| {
            SyncLink::new(path.to_path_buf(), object.token.clone(), remote_type, task_id)
        });
        link.record_local(hash, bytes.len() as u64, file_mtime(path)?);
        link.record_remote(object.revision, object.modified_at);
        self.repository.save_link(&link).await?;

        self.status
            .update(task_id, |s| s.record(path, FileOutcome::Completed, "downloaded"));
        Ok(())
    }

    /// True when the file on disk still carries the hash the link recorded
    async fn local_matches_link(&self, path: &Path, link: &SyncLink) -> Result<bool> {
        let bytes = tokio::fs::read(path).await?;
        Ok(link.local_unchanged(&hash_bytes(&bytes)?))
    }

    fn local_newer_than_known_remote(&self, path: &Path, link: &SyncLink) -> bool {
        let Some(remote_mtime) = link.remote_mtime() else {
            return false;
        };
        match file_mtime(path) {
            Ok(local_mtime) => local_mtime > remote_mtime,
            Err(_) => false,
        }
    }

    /// Renders a block document to Markdown, writes it, stamps the remote
    /// mtime, fetches missing assets, and re-baselines the block ledger
    async fn download_document(
        &self,
        object: &RemoteObject,
        path: &Path,
        token_paths: &HashMap<String, PathBuf>,
    ) -> Result<()> {
        let raw = with_retry("fetch_blocks", || self.docs.fetch_blocks(&object.token)).await?;
        let tree = BlockTree::parse(&raw)?;
        let output = Decoder::new(token_paths, ASSETS_FOLDER).decode(&tree)?;

        self.filter.register_ignore(path);
        tokio::fs::write(path, output.markdown.as_bytes()).await?;
        if let Some(mtime) = object.modified_at {
            stamp_mtime(path, mtime)?;
        }

        let doc_dir = path.parent().unwrap_or_else(|| Path::new("."));
        for asset in &output.assets {
            let dest = doc_dir.join(&asset.relative_path);
            if dest.exists() {
                continue;
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let token = ObjectToken::new(asset.token.clone())?;
            self.filter.register_ignore(&dest);
            if let Err(err) =
                with_retry("download_asset", || self.transfer.download(&token, &dest, None)).await
            {
                warn!(asset = %dest.display(), error = %err, "Asset download failed");
            }
        }

        // Re-baseline so the next partial diff compares against what the
        // remote actually holds
        let blocks = split_markdown(&output.markdown);
        let hashes: Vec<ContentHash> = blocks.iter().map(|b| b.hash.clone()).collect();
        self.repository
            .replace_block_state(&object.token, &document_state(&object.token, &hashes))
            .await?;
        Ok(())
    }

    /// Converts an export-only object through a remote job, then downloads
    /// the produced artifact
    async fn download_via_export(
        &self,
        object: &RemoteObject,
        path: &Path,
        format: ExportFormat,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ticket =
            with_retry("submit_export", || self.jobs.submit_export(&object.token, format)).await?;
        let artifact = self
            .await_job(&ticket, JobKind::Export, cancel)
            .await
            .with_context(|| format!("Export of {} did not complete", object.name))?;

        self.filter.register_ignore(path);
        with_retry("download_artifact", || self.transfer.download_artifact(&artifact, path))
            .await?;
        if let Some(mtime) = object.modified_at {
            stamp_mtime(path, mtime)?;
        }
        Ok(())
    }

    /// Polls a job until terminal, bounded by the configured attempt budget
    async fn await_job(
        &self,
        ticket: &JobTicket,
        kind: JobKind,
        cancel: &CancellationToken,
    ) -> Result<ObjectToken> {
        let interval = Duration::from_secs(self.config.jobs.poll_interval);
        for _ in 0..self.config.jobs.poll_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    anyhow::bail!("cancelled while polling job {}", ticket.0);
                }
                _ = tokio::time::sleep(interval) => {}
            }
            let status = match kind {
                JobKind::Export => {
                    with_retry("poll_export", || self.jobs.poll_export(ticket)).await?
                }
                JobKind::Import => {
                    with_retry("poll_import", || self.jobs.poll_import(ticket)).await?
                }
            };
            match status {
                JobStatus::Pending => continue,
                JobStatus::Done(artifact) => return Ok(artifact),
                JobStatus::Failed(reason) => return Err(SyncError::JobFailed(reason).into()),
            }
        }
        Err(SyncError::JobPollExhausted {
            attempts: self.config.jobs.poll_attempts,
            context: ticket.0.clone(),
        }
        .into())
    }

    /// Raises or refreshes cloud tombstones for linked objects that vanished
    /// from the remote listing
    async fn detect_cloud_deletions(
        &self,
        task: &SyncTask,
        seen_tokens: &HashSet<String>,
    ) -> Result<()> {
        let task_id = task.id();
        for link in self.repository.list_links(task_id).await? {
            if link.remote_type() == RemoteObjectType::MarkdownMirror
                || seen_tokens.contains(&link.remote_token().to_string())
            {
                continue;
            }
            // A missing local copy still gets a tombstone; removal is then
            // a no-op but the delete pass retires the stale link row
            let path = link.local_path().to_path_buf();
            match self.repository.get_live_tombstone(task_id, &path).await? {
                Some(mut existing) => {
                    // Earliest-wins: a re-observation never extends the
                    // grace window
                    let now = Utc::now();
                    existing.refresh(now, now + task.delete_grace());
                    self.repository.save_tombstone(&existing).await?;
                }
                None => {
                    let tombstone = SyncTombstone::new(
                        task_id,
                        path.clone(),
                        link.remote_token().clone(),
                        TombstoneSource::Cloud,
                        "remote object no longer listed",
                        task.delete_grace(),
                    );
                    info!(path = %path.display(), "Cloud deletion observed, tombstone raised");
                    self.repository.save_tombstone(&tombstone).await?;
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Upload pass
    // ========================================================================

    #[tracing::instrument(skip_all, fields(task_id = %task.id()))]
    async fn upload_pass(&self, task: &SyncTask, cancel: &CancellationToken) -> Result<()> {
        let task_id = task.id();
        debug!("Upload pass starting");

        let mut candidates = self.queue.drain(task_id);
        for path in self.scan_local_changes(task).await? {
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }

        // Folder tokens created or discovered during this run
        let mut mirror_folders: HashMap<String, ObjectToken> = HashMap::new();

        for path in candidates {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if let Err(err) = self.upload_one(task, &path, &mut mirror_folders, cancel).await {
                warn!(path = %path.display(), error = %err, "Upload failed");
                self.status
                    .update(task_id, |s| s.record(&path, FileOutcome::Failed, format!("{err:#}")));
            }
        }
        Ok(())
    }

    /// Walks the local tree for files whose content diverged from their
    /// link, or which have no link yet
    ///
    /// Hidden entries and asset folders are excluded; assets only move in
    /// the download direction.
    async fn scan_local_changes(&self, task: &SyncTask) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut dirs = vec![task.local_root().to_path_buf()];
        while let Some(dir) = dirs.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "Cannot scan directory");
                    continue;
                }
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if name != ASSETS_FOLDER {
                        dirs.push(path);
                    }
                    continue;
                }
                match self.repository.get_link(&path).await? {
                    Some(link) => {
                        let bytes = tokio::fs::read(&path).await?;
                        if !link.local_unchanged(&hash_bytes(&bytes)?) {
                            out.push(path);
                        }
                    }
                    None => out.push(path),
                }
            }
        }
        Ok(out)
    }

    async fn upload_one(
        &self,
        task: &SyncTask,
        path: &Path,
        mirror_folders: &mut HashMap<String, ObjectToken>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let task_id = task.id();
        let link = self.repository.get_link(path).await?;

        if !path.exists() {
            if let Some(link) = link {
                self.raise_local_tombstone(task, &link).await?;
                self.status
                    .update(task_id, |s| s.record(path, FileOutcome::Skipped, "locally removed"));
            }
            return Ok(());
        }

        // A file that reappears under a pending tombstone is alive again
        if let Some(mut tombstone) = self.repository.get_live_tombstone(task_id, path).await? {
            tombstone.cancel("path reappeared before propagation")?;
            self.repository.save_tombstone(&tombstone).await?;
            info!(path = %path.display(), "Tombstone cancelled, path reappeared");
        }

        let bytes = tokio::fs::read(path).await?;
        let hash = hash_bytes(&bytes)?;

        if let Some(ref link) = link {
            if link.local_unchanged(&hash) {
                self.status
                    .update(task_id, |s| s.record(path, FileOutcome::Skipped, "unchanged"));
                return Ok(());
            }
        }

        let is_markdown = path.extension().is_some_and(|e| e == "md");
        if is_markdown && task.markdown_mode() == MarkdownMode::DownloadOnly {
            self.status
                .update(task_id, |s| s.record(path, FileOutcome::Skipped, "download-only"));
            return Ok(());
        }

        // Divergent-edit check against the live remote revision
        if let Some(ref link) = link {
            if link.remote_type() != RemoteObjectType::Folder {
                let remote = with_retry("get_metadata", || {
                    self.drive.get_metadata(link.remote_token())
                })
                .await?;
                let local_preview = preview(&bytes);
                let remote_preview = format!(
                    "revision {} modified {}",
                    remote.revision,
                    remote
                        .modified_at
                        .map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339()),
                );
                let detection =
                    self.conflicts
                        .check(link, &hash, remote.revision, &local_preview, &remote_preview);
                if detection.is_conflict() {
                    self.status
                        .update(task_id, |s| s.record(path, FileOutcome::Skipped, "conflict"));
                    return Ok(());
                }
            }
        }

        if is_markdown {
            self.upload_document(task, path, &bytes, hash, link, mirror_folders, cancel)
                .await?;
        } else {
            self.upload_plain_file(task, path, &bytes, hash, link).await?;
        }

        self.status
            .update(task_id, |s| s.record(path, FileOutcome::Completed, "uploaded"));
        Ok(())
    }

    async fn raise_local_tombstone(&self, task: &SyncTask, link: &SyncLink) -> Result<()> {
        let task_id = task.id();
        let path = link.local_path().to_path_buf();
        match self.repository.get_live_tombstone(task_id, &path).await? {
            Some(mut existing) => {
                let now = Utc::now();
                existing.refresh(now, now + task.delete_grace());
                self.repository.save_tombstone(&existing).await?;
            }
            None => {
                let tombstone = SyncTombstone::new(
                    task_id,
                    path.clone(),
                    link.remote_token().clone(),
                    TombstoneSource::Local,
                    "local file removed",
                    task.delete_grace(),
                );
                info!(path = %path.display(), "Local deletion observed, tombstone raised");
                self.repository.save_tombstone(&tombstone).await?;
            }
        }
        Ok(())
    }

    async fn upload_plain_file(
        &self,
        task: &SyncTask,
        path: &Path,
        bytes: &[u8],
        hash: ContentHash,
        link: Option<SyncLink>,
    ) -> Result<()> {
        let folder = self.resolve_remote_folder(task, parent_dir(path)?).await?;
        let name = file_name(path)?;

        let token = if (bytes.len() as u64) >= self.config.multipart_threshold_bytes() {
            with_retry("upload_multipart", || {
                self.transfer.upload_multipart(&folder, &name, path)
            })
            .await?
        } else {
            with_retry("upload", || self.transfer.upload(&folder, &name, path)).await?
        };

        let remote = with_retry("get_metadata", || self.drive.get_metadata(&token)).await?;
        let mut link = link.unwrap_or_else(|| {
            SyncLink::new(path.to_path_buf(), token.clone(), RemoteObjectType::File, task.id())
        });
        link.set_remote_token(token);
        link.record_local(hash, bytes.len() as u64, file_mtime(path)?);
        link.record_remote(remote.revision, remote.modified_at);
        self.repository.save_link(&link).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_document(
        &self,
        task: &SyncTask,
        path: &Path,
        bytes: &[u8],
        hash: ContentHash,
        link: Option<SyncLink>,
        mirror_folders: &mut HashMap<String, ObjectToken>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let content = String::from_utf8_lossy(bytes).into_owned();
        let folder = self.resolve_remote_folder(task, parent_dir(path)?).await?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .context("Markdown file without a name")?;

        match link {
            Some(link) if link.remote_type() == RemoteObjectType::Document => {
                let token = link.remote_token().clone();
                self.push_document_edit(task, &token, &content).await?;
                self.refresh_link_after_upload(link, &token, path, bytes, hash).await?;
            }
            other_link => {
                let existing =
                    with_retry("find_document", || self.docs.find_document_by_name(&folder, &title))
                        .await?;
                let token = match existing {
                    Some(token) => {
                        // Same name already remote: overwrite rather than
                        // create a duplicate
                        let payload = with_retry("convert_markdown", || {
                            self.docs.convert_markdown(&content)
                        })
                        .await?;
                        with_retry("replace_document", || {
                            self.docs.replace_document(&token, &payload)
                        })
                        .await?;
                        self.bootstrap_block_state(&token, &content).await?;
                        token
                    }
                    None => self.import_new_document(&folder, path, &title, cancel).await?,
                };
                let link = other_link.unwrap_or_else(|| {
                    SyncLink::new(
                        path.to_path_buf(),
                        token.clone(),
                        RemoteObjectType::Document,
                        task.id(),
                    )
                });
                self.refresh_link_after_upload(link, &token, path, bytes, hash).await?;
            }
        }

        if task.markdown_mode() == MarkdownMode::Enhanced {
            self.upload_mirror_copy(&folder, path, mirror_folders).await?;
        }
        Ok(())
    }

    /// Applies a local Markdown edit to the remote block tree
    ///
    /// Partial patching requires the recorded block ledger to agree with
    /// the live child count; any drift falls back to a full replace.
    async fn push_document_edit(
        &self,
        task: &SyncTask,
        document: &ObjectToken,
        content: &str,
    ) -> Result<()> {
        let blocks = split_markdown(content);

        let want_partial = matches!(
            task.doc_update_mode(),
            DocUpdateMode::Auto | DocUpdateMode::Partial
        );
        if !want_partial {
            return self.full_replace(document, content).await;
        }

        let mut state = self.repository.get_block_state(document).await?;
        state.sort_by_key(|item| item.index);
        let prev: Vec<ContentHash> = state.into_iter().map(|item| item.hash).collect();

        let raw = with_retry("fetch_blocks", || self.docs.fetch_blocks(document)).await?;
        let live_children = BlockTree::parse(&raw)?.root_children().len();

        match diff::compute(&prev, &blocks, live_children) {
            DiffOutcome::Unchanged => {
                debug!(document = %document, "No block-level changes");
            }
            DiffOutcome::Drifted => {
                info!(document = %document, "Remote edited out of band, full replace");
                self.full_replace(document, content).await?;
            }
            DiffOutcome::Patch { start, delete_len, insert } => {
                debug!(
                    document = %document,
                    start, delete_len, insert = insert.len(),
                    "Applying block patch"
                );
                if delete_len > 0 {
                    with_retry("delete_children", || {
                        self.docs.delete_children(document, start as u32, delete_len as u32)
                    })
                    .await?;
                }
                if !insert.is_empty() {
                    let text = insert
                        .iter()
                        .map(|b| b.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    let payload =
                        with_retry("convert_markdown", || self.docs.convert_markdown(&text))
                            .await?;
                    with_retry("insert_children", || {
                        self.docs.insert_children(document, start as u32, &payload)
                    })
                    .await?;
                }
                let hashes: Vec<ContentHash> = blocks.iter().map(|b| b.hash.clone()).collect();
                self.repository
                    .replace_block_state(document, &document_state(document, &hashes))
                    .await?;
            }
        }
        Ok(())
    }

    async fn full_replace(&self, document: &ObjectToken, content: &str) -> Result<()> {
        let payload =
            with_retry("convert_markdown", || self.docs.convert_markdown(content)).await?;
        with_retry("replace_document", || self.docs.replace_document(document, &payload)).await?;
        self.bootstrap_block_state(document, content).await
    }

    async fn bootstrap_block_state(&self, document: &ObjectToken, content: &str) -> Result<()> {
        let hashes: Vec<ContentHash> = split_markdown(content)
            .iter()
            .map(|b| b.hash.clone())
            .collect();
        self.repository
            .replace_block_state(document, &document_state(document, &hashes))
            .await
    }

    /// Creates a brand-new remote document through the import job
    ///
    /// The raw Markdown is uploaded as an intermediate file, converted by
    /// the service, and the intermediate is removed afterwards whether the
    /// conversion succeeded or not.
    async fn import_new_document(
        &self,
        folder: &ObjectToken,
        path: &Path,
        title: &str,
        cancel: &CancellationToken,
    ) -> Result<ObjectToken> {
        let name = file_name(path)?;
        let intermediate =
            with_retry("upload", || self.transfer.upload(folder, &name, path)).await?;

        let imported = async {
            let ticket = with_retry("submit_import", || {
                self.jobs.submit_import(&intermediate, folder, title)
            })
            .await?;
            self.await_job(&ticket, JobKind::Import, cancel).await
        }
        .await;

        if let Err(err) =
            with_retry("delete_object", || self.drive.delete_object(&intermediate)).await
        {
            warn!(error = %err, "Could not remove intermediate upload");
        }

        imported
    }

    async fn refresh_link_after_upload(
        &self,
        mut link: SyncLink,
        token: &ObjectToken,
        path: &Path,
        bytes: &[u8],
        hash: ContentHash,
    ) -> Result<()> {
        let remote = with_retry("get_metadata", || self.drive.get_metadata(token)).await?;
        link.set_remote_token(token.clone());
        link.record_local(hash, bytes.len() as u64, file_mtime(path)?);
        link.record_remote(remote.revision, remote.modified_at);
        self.repository.save_link(&link).await
    }

    /// Uploads the raw Markdown into the parent folder's mirror subfolder
    async fn upload_mirror_copy(
        &self,
        parent: &ObjectToken,
        path: &Path,
        mirror_folders: &mut HashMap<String, ObjectToken>,
    ) -> Result<()> {
        let mirror = match mirror_folders.get(&parent.to_string()) {
            Some(token) => token.clone(),
            None => {
                let token = self.find_or_create_mirror(parent).await?;
                mirror_folders.insert(parent.to_string(), token.clone());
                token
            }
        };
        let name = file_name(path)?;
        with_retry("upload_mirror", || self.transfer.upload(&mirror, &name, path)).await?;
        Ok(())
    }

    async fn find_or_create_mirror(&self, parent: &ObjectToken) -> Result<ObjectToken> {
        let children = with_retry("list_folder", || self.drive.list_folder(parent)).await?;
        if let Some(existing) = children
            .iter()
            .find(|c| c.kind == RemoteObjectKind::Folder && c.name == MIRROR_FOLDER)
        {
            return Ok(existing.token.clone());
        }
        with_retry("create_folder", || self.drive.create_folder(parent, MIRROR_FOLDER)).await
    }

    /// Maps a local directory to its remote folder token, creating missing
    /// remote folders on the way down
    async fn resolve_remote_folder(
        &self,
        task: &SyncTask,
        local_dir: &Path,
    ) -> Result<ObjectToken> {
        if local_dir == task.local_root() {
            return Ok(task.remote_folder().clone());
        }
        if let Some(link) = self.repository.get_link(local_dir).await? {
            return Ok(link.remote_token().clone());
        }

        let parent = local_dir
            .parent()
            .with_context(|| format!("Path escapes the task root: {}", local_dir.display()))?;
        if !parent.starts_with(task.local_root()) && parent != task.local_root() {
            anyhow::bail!("Path outside the task root: {}", local_dir.display());
        }

        let parent_token = Box::pin(self.resolve_remote_folder(task, parent)).await?;
        let name = file_name(local_dir)?;
        let token =
            with_retry("create_folder", || self.drive.create_folder(&parent_token, &name)).await?;

        let link = SyncLink::new(
            local_dir.to_path_buf(),
            token.clone(),
            RemoteObjectType::Folder,
            task.id(),
        );
        self.repository.save_link(&link).await?;
        Ok(token)
    }

    // ========================================================================
    // Delete-reconciliation pass
    // ========================================================================

    #[tracing::instrument(skip_all, fields(task_id = %task.id()))]
    async fn delete_pass(&self, task: &SyncTask, cancel: &CancellationToken) -> Result<()> {
        let task_id = task.id();
        let due = self
            .repository
            .list_due_tombstones(task_id, Utc::now())
            .await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!(task_id = %task_id, count = due.len(), "Delete pass starting");

        for mut tombstone in due {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let path = tombstone.local_path().to_path_buf();
            let result = match tombstone.source() {
                TombstoneSource::Cloud => self.execute_local_removal(&tombstone).await,
                TombstoneSource::Local => self.execute_remote_removal(task, &tombstone).await,
            };
            match result {
                Ok(()) => {
                    tombstone.mark_executed()?;
                    self.repository.save_tombstone(&tombstone).await?;
                    self.repository.delete_link(&path).await?;
                    self.status
                        .update(task_id, |s| s.record(&path, FileOutcome::Completed, "deleted"));
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Deletion failed, backing off");
                    tombstone.mark_failed(
                        format!("{err:#}"),
                        chrono::Duration::seconds(self.config.deletion.retry_backoff as i64),
                    );
                    self.repository.save_tombstone(&tombstone).await?;
                    self.status
                        .update(task_id, |s| s.record(&path, FileOutcome::Failed, format!("{err:#}")));
                }
            }
        }
        Ok(())
    }

    /// Propagates a cloud-side deletion to the local tree
    async fn execute_local_removal(&self, tombstone: &SyncTombstone) -> Result<()> {
        let path = tombstone.local_path();
        if !path.exists() {
            return Ok(());
        }
        self.filter.register_ignore(path);
        if path.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        info!(path = %path.display(), "Local copy removed");
        Ok(())
    }

    /// Propagates a local deletion to the remote, mirror copy included
    async fn execute_remote_removal(
        &self,
        task: &SyncTask,
        tombstone: &SyncTombstone,
    ) -> Result<()> {
        let link = self.repository.get_link(tombstone.local_path()).await?;

        match with_retry("delete_object", || {
            self.drive.delete_object(tombstone.remote_token())
        })
        .await?
        {
            DeleteOutcome::Deleted => {
                info!(token = %tombstone.remote_token(), "Remote object deleted");
            }
            DeleteOutcome::AlreadyAbsent => {
                debug!(token = %tombstone.remote_token(), "Remote object already gone");
            }
        }

        // Best-effort mirror cleanup; a stray mirror copy is harmless
        if task.markdown_mode() == MarkdownMode::Enhanced
            && link.is_some_and(|l| l.remote_type() == RemoteObjectType::Document)
        {
            if let Err(err) = self.remove_mirror_copy(task, tombstone).await {
                warn!(error = %err, "Mirror cleanup failed");
            }
        }
        Ok(())
    }

    async fn remove_mirror_copy(&self, task: &SyncTask, tombstone: &SyncTombstone) -> Result<()> {
        let parent_dir = tombstone
            .local_path()
            .parent()
            .context("Tombstone path without a parent")?;
        let parent = self.resolve_remote_folder(task, parent_dir).await?;

        let children = with_retry("list_folder", || self.drive.list_folder(&parent)).await?;
        let Some(mirror) = children
            .iter()
            .find(|c| c.kind == RemoteObjectKind::Folder && c.name == MIRROR_FOLDER)
        else {
            return Ok(());
        };

        let name = file_name(tombstone.local_path())?;
        let copies = with_retry("list_folder", || self.drive.list_folder(&mirror.token)).await?;
        if let Some(copy) = copies.iter().find(|c| c.name == name) {
            with_retry("delete_object", || self.drive.delete_object(&copy.token)).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum JobKind {
    Export,
    Import,
}

// ============================================================================
// Small helpers
// ============================================================================

fn hash_bytes(bytes: &[u8]) -> Result<ContentHash> {
    let hex = format!("{:x}", Sha256::digest(bytes));
    Ok(ContentHash::new(hex)?)
}

fn file_mtime(path: &Path) -> Result<DateTime<Utc>> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Stamps the remote mtime onto a file written by the runner, keeping later
/// newer-local comparisons meaningful
fn stamp_mtime(path: &Path, mtime: DateTime<Utc>) -> Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(std::time::SystemTime::from(mtime))?;
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Path without a file name: {}", path.display()))
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .with_context(|| format!("Path without a parent: {}", path.display()))
}

fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.chars().take(160).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_error_classification() {
        assert!(is_transient_error(&anyhow::anyhow!("connection refused")));
        assert!(is_transient_error(&anyhow::anyhow!("HTTP 429 Too Many Requests")));
        assert!(is_transient_error(&anyhow::anyhow!("HTTP 503 Service Unavailable")));
        assert!(!is_transient_error(&anyhow::anyhow!("HTTP 404 Not Found")));
        assert!(!is_transient_error(&anyhow::anyhow!("permission denied")));
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_permanent_error() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = with_retry("op", || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(anyhow::anyhow!("permission denied")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_transient_error() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry("op", move || {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("connection reset by peer"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.ok(), Some(2));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn test_preview_truncates() {
        let long = "x".repeat(500);
        assert_eq!(preview(long.as_bytes()).len(), 160);
    }
}
