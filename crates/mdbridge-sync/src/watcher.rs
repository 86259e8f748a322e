//! File watching and change filtering
//!
//! [`FileWatcher`] wraps the `notify` crate and converts raw OS events into
//! [`ChangeEvent`] values on an mpsc channel. [`ChangeFilter`] applies the
//! two per-path admission policies before an event reaches the per-task
//! [`UploadQueue`]:
//!
//! - a minimum-interval debounce suppressing repeat notifications for the
//!   same path inside a window
//! - a TTL'd ignore registration the runner sets *before* writing a file,
//!   so the notification for its own write is swallowed instead of being
//!   re-queued as a user edit
//!
//! Both policies key on the event's canonical path: the rename destination
//! when present, else the source path.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mdbridge_core::domain::newtypes::TaskId;

// ============================================================================
// ChangeEvent
// ============================================================================

/// A filesystem change, decoupled from notify's raw event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { old: PathBuf, new: PathBuf },
}

impl ChangeEvent {
    /// The canonical path for filtering and queueing: the rename
    /// destination when present
    pub fn path(&self) -> &Path {
        match self {
            ChangeEvent::Created(p) | ChangeEvent::Modified(p) | ChangeEvent::Deleted(p) => p,
            ChangeEvent::Renamed { new, .. } => new,
        }
    }
}

/// Converts a `notify::Event` into our internal representation
///
/// Access events and other kinds with no sync significance map to `None`.
fn map_notify_event(event: &notify::Event) -> Option<ChangeEvent> {
    let paths = &event.paths;
    match &event.kind {
        EventKind::Create(_) => Some(ChangeEvent::Created(paths.first()?.clone())),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if paths.len() >= 2 {
                Some(ChangeEvent::Renamed {
                    old: paths[0].clone(),
                    new: paths[1].clone(),
                })
            } else {
                Some(ChangeEvent::Modified(paths.first()?.clone()))
            }
        }
        EventKind::Modify(_) => Some(ChangeEvent::Modified(paths.first()?.clone())),
        EventKind::Remove(_) => Some(ChangeEvent::Deleted(paths.first()?.clone())),
        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            None
        }
    }
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches directory trees via the OS-native mechanism (inotify on Linux)
pub struct FileWatcher {
    watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Creates the watcher and the channel its events arrive on
    pub fn new() -> Result<(Self, mpsc::Receiver<ChangeEvent>)> {
        let (tx, rx) = mpsc::channel::<ChangeEvent>(1024);

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if let Some(change) = map_notify_event(&event) {
                        if let Err(e) = tx.blocking_send(change) {
                            warn!(error = %e, "Change receiver dropped, event lost");
                        }
                    }
                }
                Err(err) => error!(error = %err, "File watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        Ok((Self { watcher }, rx))
    }

    /// Starts watching a task root recursively
    pub fn watch(&mut self, root: &Path) -> Result<()> {
        info!(path = %root.display(), "Starting recursive watch");
        self.watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", root.display()))
    }

    /// Stops watching a task root
    pub fn unwatch(&mut self, root: &Path) -> Result<()> {
        info!(path = %root.display(), "Stopping watch");
        self.watcher
            .unwatch(root)
            .with_context(|| format!("Failed to unwatch path: {}", root.display()))
    }
}

// ============================================================================
// ChangeFilter
// ============================================================================

/// Per-path debounce and self-write ignore admission
///
/// Shared between the runner (which registers ignores before writing) and
/// the event pump (which asks for admission). Each map is keyed by the
/// canonical path; no cross-task locking is involved.
pub struct ChangeFilter {
    debounce: Duration,
    ignore_ttl: Duration,
    last_admitted: DashMap<PathBuf, Instant>,
    ignores: DashMap<PathBuf, Instant>,
}

impl ChangeFilter {
    pub fn new(debounce: Duration, ignore_ttl: Duration) -> Self {
        Self {
            debounce,
            ignore_ttl,
            last_admitted: DashMap::new(),
            ignores: DashMap::new(),
        }
    }

    /// Registers a self-write ignore for `path`, valid for the TTL
    ///
    /// The runner calls this *before* it writes, so the subsequent
    /// notification is already covered by the time it fires.
    pub fn register_ignore(&self, path: &Path) {
        self.ignores
            .insert(path.to_path_buf(), Instant::now() + self.ignore_ttl);
    }

    /// Decides whether a change for `path` reaches the upload queue
    pub fn admit(&self, path: &Path) -> bool {
        self.admit_at(path, Instant::now())
    }

    fn admit_at(&self, path: &Path, now: Instant) -> bool {
        if let Some(until) = self.ignores.get(path).map(|e| *e) {
            if now < until {
                debug!(path = %path.display(), "Swallowing self-write notification");
                return false;
            }
            self.ignores.remove(path);
        }

        if let Some(last) = self.last_admitted.get(path).map(|e| *e) {
            if now.duration_since(last) < self.debounce {
                debug!(path = %path.display(), "Debounced repeat notification");
                return false;
            }
        }
        self.last_admitted.insert(path.to_path_buf(), now);
        true
    }
}

// ============================================================================
// UploadQueue
// ============================================================================

/// Per-task queue of candidate paths awaiting the next upload pass
///
/// The pump pushes, the runner drains at the start of its upload pass.
/// Duplicate pushes between drains collapse into one entry.
#[derive(Debug, Default)]
pub struct UploadQueue {
    pending: DashMap<TaskId, Vec<PathBuf>>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task_id: TaskId, path: PathBuf) {
        let mut entry = self.pending.entry(task_id).or_default();
        if !entry.contains(&path) {
            entry.push(path);
        }
    }

    /// Takes everything queued for a task, leaving it empty
    pub fn drain(&self, task_id: TaskId) -> Vec<PathBuf> {
        self.pending
            .remove(&task_id)
            .map(|(_, paths)| paths)
            .unwrap_or_default()
    }

    pub fn len(&self, task_id: TaskId) -> usize {
        self.pending.get(&task_id).map_or(0, |e| e.len())
    }
}

// ============================================================================
// Event pump
// ============================================================================

/// Routes watcher events to task queues until shutdown
///
/// `roots` maps each watched task to its local root; an event belongs to
/// the task whose root contains its canonical path. Admission runs through
/// the shared [`ChangeFilter`] first.
pub async fn pump_events(
    mut rx: mpsc::Receiver<ChangeEvent>,
    roots: std::sync::Arc<DashMap<TaskId, PathBuf>>,
    filter: std::sync::Arc<ChangeFilter>,
    queue: std::sync::Arc<UploadQueue>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Event pump shutting down");
                return;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    info!("Watcher channel closed, event pump stopping");
                    return;
                };
                let path = event.path().to_path_buf();
                if !filter.admit(&path) {
                    continue;
                }
                let task = roots
                    .iter()
                    .find(|entry| path.starts_with(entry.value()))
                    .map(|entry| *entry.key());
                match task {
                    Some(task_id) => {
                        debug!(path = %path.display(), task_id = %task_id, "Queueing local change");
                        queue.push(task_id, path);
                    }
                    None => debug!(path = %path.display(), "Event outside any watched root"),
                }
            }
        }
    }
}
