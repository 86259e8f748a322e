//! Periodic orchestration
//!
//! The scheduler drives two timers on top of the [`SyncRunner`]:
//!
//! - an upload cycle every `sync.upload_interval` seconds, which refreshes
//!   the watched roots and runs every upload-capable task that has queued
//!   local changes
//! - a download cycle once a day at `sync.download_time` (local wall
//!   clock), which runs every download-capable task
//!
//! The watcher event pump runs alongside on the same shutdown token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mdbridge_core::config::{parse_download_time, Config};
use mdbridge_core::domain::newtypes::TaskId;
use mdbridge_core::ports::IStateRepository;
use mdbridge_core::{Owner, SyncTask};

use crate::runner::SyncRunner;
use crate::watcher::{pump_events, ChangeEvent, ChangeFilter, FileWatcher, UploadQueue};

/// Drives scheduled sync runs until shutdown
pub struct Scheduler {
    runner: Arc<SyncRunner>,
    repository: Arc<dyn IStateRepository>,
    queue: Arc<UploadQueue>,
    filter: Arc<ChangeFilter>,
    roots: Arc<DashMap<TaskId, PathBuf>>,
    config: Config,
    owner: Owner,
    shutdown: CancellationToken,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<SyncRunner>,
        repository: Arc<dyn IStateRepository>,
        queue: Arc<UploadQueue>,
        filter: Arc<ChangeFilter>,
        config: Config,
        owner: Owner,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            runner,
            repository,
            queue,
            filter,
            roots: Arc::new(DashMap::new()),
            config,
            owner,
            shutdown,
        }
    }

    /// Runs the timer loops until the shutdown token fires
    ///
    /// Takes ownership of the watcher and its event channel; the event pump
    /// is spawned on the same shutdown token.
    pub async fn run(
        self,
        mut watcher: FileWatcher,
        events: mpsc::Receiver<ChangeEvent>,
    ) -> Result<()> {
        let (hour, minute) = parse_download_time(&self.config.sync.download_time)
            .context("Invalid download_time in configuration")?;

        let pump = tokio::spawn(pump_events(
            events,
            self.roots.clone(),
            self.filter.clone(),
            self.queue.clone(),
            self.shutdown.child_token(),
        ));

        let mut upload_tick =
            tokio::time::interval(Duration::from_secs(self.config.sync.upload_interval));
        // The first tick of an interval fires immediately; consume it so the
        // first upload cycle happens one interval after startup.
        upload_tick.tick().await;

        info!(
            upload_interval = self.config.sync.upload_interval,
            download_time = %self.config.sync.download_time,
            "Scheduler started"
        );

        loop {
            let until_download = sleep_until_daily(Local::now().naive_local(), hour, minute);
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = upload_tick.tick() => {
                    self.upload_cycle(&mut watcher).await;
                }
                _ = tokio::time::sleep(until_download) => {
                    self.download_cycle().await;
                }
            }
        }

        pump.await.ok();
        Ok(())
    }

    /// Refreshes watches and runs tasks with pending local changes
    async fn upload_cycle(&self, watcher: &mut FileWatcher) {
        debug!("Upload cycle starting");
        let tasks = match self.enabled_tasks().await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "Cannot list tasks for upload cycle");
                return;
            }
        };

        for task in &tasks {
            if !task.direction().allows_upload() {
                continue;
            }
            self.ensure_watched(watcher, task);
            if self.queue.len(task.id()) == 0 {
                continue;
            }
            if let Err(err) = self.runner.start(task.id()).await {
                warn!(task_id = %task.id(), error = %err, "Scheduled run failed to start");
            }
        }
    }

    /// Runs every download-capable task once
    async fn download_cycle(&self) {
        info!("Daily download cycle starting");
        let tasks = match self.enabled_tasks().await {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "Cannot list tasks for download cycle");
                return;
            }
        };

        for task in &tasks {
            if !task.direction().allows_download() {
                continue;
            }
            if let Err(err) = self.runner.start(task.id()).await {
                warn!(task_id = %task.id(), error = %err, "Scheduled run failed to start");
            }
        }
    }

    async fn enabled_tasks(&self) -> Result<Vec<SyncTask>> {
        let tasks = self.repository.list_tasks(&self.owner).await?;
        Ok(tasks.into_iter().filter(SyncTask::is_enabled).collect())
    }

    fn ensure_watched(&self, watcher: &mut FileWatcher, task: &SyncTask) {
        let root = task.local_root().to_path_buf();
        let already = self
            .roots
            .get(&task.id())
            .is_some_and(|entry| *entry.value() == root);
        if already {
            return;
        }
        // A root change means re-watching the new location
        if let Some((_, old_root)) = self.roots.remove(&task.id()) {
            if let Err(err) = watcher.unwatch(&old_root) {
                debug!(path = %old_root.display(), error = %err, "Unwatch failed");
            }
        }
        match watcher.watch(&root) {
            Ok(()) => {
                self.roots.insert(task.id(), root);
            }
            Err(err) => warn!(path = %root.display(), error = %err, "Watch failed"),
        }
    }
}

/// Time remaining until the next daily occurrence of `hour:minute`
///
/// If the wall-clock time has already passed today, the occurrence is
/// tomorrow.
fn sleep_until_daily(now: NaiveDateTime, hour: u32, minute: u32) -> Duration {
    let next = next_daily_occurrence(now, hour, minute);
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

fn next_daily_occurrence(now: NaiveDateTime, hour: u32, minute: u32) -> NaiveDateTime {
    let today = now
        .date()
        .and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| now.date().and_hms_opt(0, 0, 0).unwrap_or(now));
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .and_then(|d| d.and_hms_opt(h, m, 0))
            .expect("valid test datetime")
    }

    #[test]
    fn test_occurrence_later_today() {
        let next = next_daily_occurrence(at(1, 0), 3, 30);
        assert_eq!(next, at(3, 30));
    }

    #[test]
    fn test_occurrence_rolls_to_tomorrow() {
        let next = next_daily_occurrence(at(4, 0), 3, 30);
        assert_eq!(next, at(3, 30) + chrono::Duration::days(1));
    }

    #[test]
    fn test_exact_time_rolls_to_tomorrow() {
        let next = next_daily_occurrence(at(3, 30), 3, 30);
        assert_eq!(next, at(3, 30) + chrono::Duration::days(1));
    }

    #[test]
    fn test_sleep_duration_positive() {
        let d = sleep_until_daily(at(1, 0), 3, 30);
        assert_eq!(d, Duration::from_secs(2 * 3600 + 30 * 60));
    }
}
