//! Conflict detection
//!
//! A conflict exists exactly when both sides moved since the last sync:
//! the current local content hash differs from the link's recorded hash
//! AND the remote revision counter has advanced past the link's recorded
//! revision. One condition alone is an ordinary upload or download, never
//! a conflict. Detected conflicts are pushed into the shared registry with
//! both previews attached and are never auto-resolved.

use std::sync::Arc;

use tracing::warn;

use mdbridge_core::domain::conflict::{ConflictItem, ConflictRegistry};
use mdbridge_core::domain::link::SyncLink;
use mdbridge_core::domain::newtypes::ContentHash;

/// Result of checking one linked path
#[derive(Debug, Clone)]
pub enum DetectionResult {
    NoConflict,
    Conflicted(ConflictItem),
}

impl DetectionResult {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DetectionResult::Conflicted(_))
    }
}

/// Flags divergent concurrent edits into the conflict registry
pub struct ConflictDetector {
    registry: Arc<ConflictRegistry>,
}

impl ConflictDetector {
    pub fn new(registry: Arc<ConflictRegistry>) -> Self {
        Self { registry }
    }

    /// Checks one link against current observations and raises a flag when
    /// both sides changed
    pub fn check(
        &self,
        link: &SyncLink,
        current_hash: &ContentHash,
        remote_revision: i64,
        local_preview: &str,
        remote_preview: &str,
    ) -> DetectionResult {
        let local_changed = !link.local_unchanged(current_hash);
        let remote_advanced = remote_revision > link.remote_revision();

        if !(local_changed && remote_advanced) {
            return DetectionResult::NoConflict;
        }

        warn!(
            path = %link.local_path().display(),
            recorded_revision = link.remote_revision(),
            remote_revision,
            "Divergent edit detected, flagging conflict"
        );

        let item = ConflictItem::new(
            link.task_id(),
            link.local_path().to_path_buf(),
            local_preview,
            remote_preview,
        );
        self.registry.raise(item.clone());
        DetectionResult::Conflicted(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::Utc;
    use mdbridge_core::domain::link::RemoteObjectType;
    use mdbridge_core::domain::newtypes::{ObjectToken, TaskId};

    fn hash(c: char) -> ContentHash {
        ContentHash::new(c.to_string().repeat(64)).unwrap()
    }

    /// Link with recorded local hash 'a' and remote revision 1
    fn synced_link() -> SyncLink {
        let mut link = SyncLink::new(
            PathBuf::from("/home/u/notes/a.md"),
            ObjectToken::new("doc1").unwrap(),
            RemoteObjectType::Document,
            TaskId::new(),
        );
        link.record_local(hash('a'), 10, Utc::now());
        link.record_remote(1, Some(Utc::now()));
        link
    }

    fn detector() -> (ConflictDetector, Arc<ConflictRegistry>) {
        let registry = Arc::new(ConflictRegistry::new());
        (ConflictDetector::new(registry.clone()), registry)
    }

    #[test]
    fn test_no_conflict_when_only_remote_advanced() {
        let (detector, registry) = detector();
        let link = synced_link();
        // Local hash still matches; remote moved 1 → 2
        let result = detector.check(&link, &hash('a'), 2, "local", "remote");
        assert!(!result.is_conflict());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_no_conflict_when_only_local_changed() {
        let (detector, registry) = detector();
        let link = synced_link();
        let result = detector.check(&link, &hash('b'), 1, "local", "remote");
        assert!(!result.is_conflict());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_conflict_when_both_sides_moved() {
        let (detector, registry) = detector();
        let link = synced_link();

        let result = detector.check(&link, &hash('b'), 2, "local edit", "remote edit");
        assert!(result.is_conflict());

        let flagged = registry.get(link.local_path()).unwrap();
        assert_eq!(flagged.local_preview, "local edit");
        assert_eq!(flagged.remote_preview, "remote edit");
        assert!(!flagged.is_resolved());
    }

    #[test]
    fn test_unsynced_link_conflicts_once_remote_moves() {
        let (detector, registry) = detector();
        let link = SyncLink::new(
            PathBuf::from("/home/u/notes/b.md"),
            ObjectToken::new("doc2").unwrap(),
            RemoteObjectType::Document,
            TaskId::new(),
        );
        // No recorded hash: any local content counts as changed
        let result = detector.check(&link, &hash('c'), 1, "l", "r");
        assert!(result.is_conflict());
        assert_eq!(registry.unresolved().len(), 1);
    }
}
