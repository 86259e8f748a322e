//! Conflict surface - divergent concurrent edits
//!
//! A conflict is flagged exactly when the local content hash differs from
//! the link's last-synced hash *and* the remote revision counter has
//! advanced past the link's recorded revision. Conflicts are surfaced for
//! an explicit user choice, never merged, and never persisted across
//! restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::newtypes::TaskId;

/// Which side the user chose when resolving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSide {
    Local,
    Remote,
}

/// An unresolved (or user-resolved) divergent edit on one path
#[derive(Debug, Clone)]
pub struct ConflictItem {
    pub task_id: TaskId,
    pub local_path: PathBuf,
    pub local_preview: String,
    pub remote_preview: String,
    pub detected_at: DateTime<Utc>,
    pub resolved: Option<ConflictSide>,
}

impl ConflictItem {
    pub fn new(
        task_id: TaskId,
        local_path: PathBuf,
        local_preview: impl Into<String>,
        remote_preview: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            local_path,
            local_preview: local_preview.into(),
            remote_preview: remote_preview.into(),
            detected_at: Utc::now(),
            resolved: None,
        }
    }

    pub fn resolve(&mut self, side: ConflictSide) {
        self.resolved = Some(side);
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

/// In-memory conflict flag store, keyed by local path
///
/// Purely a notification surface for the API layer; cleared on restart.
#[derive(Debug, Default)]
pub struct ConflictRegistry {
    items: DashMap<PathBuf, ConflictItem>,
}

impl ConflictRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the flag for a path
    pub fn raise(&self, item: ConflictItem) {
        self.items.insert(item.local_path.clone(), item);
    }

    pub fn get(&self, path: &Path) -> Option<ConflictItem> {
        self.items.get(path).map(|r| r.clone())
    }

    /// Marks a flagged path resolved with the chosen side
    pub fn resolve(&self, path: &Path, side: ConflictSide) -> bool {
        match self.items.get_mut(path) {
            Some(mut entry) => {
                entry.resolve(side);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self, path: &Path) {
        self.items.remove(path);
    }

    /// Snapshot of all unresolved conflicts
    pub fn unresolved(&self) -> Vec<ConflictItem> {
        self.items
            .iter()
            .filter(|r| !r.is_resolved())
            .map(|r| r.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_resolve() {
        let registry = ConflictRegistry::new();
        let path = PathBuf::from("/home/u/notes/a.md");
        registry.raise(ConflictItem::new(
            TaskId::new(),
            path.clone(),
            "local text",
            "remote text",
        ));

        assert_eq!(registry.unresolved().len(), 1);
        assert!(registry.resolve(&path, ConflictSide::Local));
        assert!(registry.unresolved().is_empty());

        let item = registry.get(&path).unwrap();
        assert_eq!(item.resolved, Some(ConflictSide::Local));
    }

    #[test]
    fn test_resolve_unknown_path() {
        let registry = ConflictRegistry::new();
        assert!(!registry.resolve(Path::new("/nope"), ConflictSide::Remote));
    }

    #[test]
    fn test_raise_overwrites_previous_flag() {
        let registry = ConflictRegistry::new();
        let path = PathBuf::from("/home/u/notes/a.md");
        let task = TaskId::new();

        registry.raise(ConflictItem::new(task, path.clone(), "old", "old"));
        registry.raise(ConflictItem::new(task, path.clone(), "new", "new"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&path).unwrap().local_preview, "new");
    }
}
