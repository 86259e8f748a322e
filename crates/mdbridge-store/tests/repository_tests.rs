//! Integration tests for SqliteStateRepository
//!
//! These tests verify all IStateRepository methods using an in-memory
//! SQLite database. Each test function creates a fresh database to
//! ensure test isolation.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use uuid::Uuid;

use mdbridge_core::domain::{
    block_state::document_state,
    link::{RemoteObjectType, SyncLink},
    newtypes::{ContentHash, ObjectToken, TaskId},
    task::{DeletePolicy, DocUpdateMode, MarkdownMode, Owner, SyncDirection, SyncTask},
    tombstone::{SyncTombstone, TombstoneSource, TombstoneStatus},
};
use mdbridge_core::ports::IStateRepository;
use mdbridge_store::{DatabasePool, SqliteStateRepository};

// ============================================================================
// Test helpers
// ============================================================================

/// Create a fresh in-memory repository for each test
async fn setup() -> SqliteStateRepository {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStateRepository::new(pool.pool().clone())
}

fn test_owner() -> Owner {
    Owner::new("device-1", "acct-1")
}

fn create_test_task(root: &str, folder: &str) -> SyncTask {
    SyncTask::new(
        "Notes",
        PathBuf::from(root),
        ObjectToken::new(folder).unwrap(),
        SyncDirection::Bidirectional,
        MarkdownMode::Enhanced,
        DocUpdateMode::Auto,
        DeletePolicy::Safe,
        86_400,
        test_owner(),
    )
    .unwrap()
}

fn create_test_link(path: &str, token: &str, task_id: TaskId) -> SyncLink {
    SyncLink::new(
        PathBuf::from(path),
        ObjectToken::new(token).unwrap(),
        RemoteObjectType::Document,
        task_id,
    )
}

fn create_test_tombstone(task_id: TaskId, path: &str, grace_secs: i64) -> SyncTombstone {
    SyncTombstone::new(
        task_id,
        PathBuf::from(path),
        ObjectToken::new("doc1").unwrap(),
        TombstoneSource::Cloud,
        "missing from remote listing",
        Duration::seconds(grace_secs),
    )
}

fn hash(c: char) -> ContentHash {
    ContentHash::new(c.to_string().repeat(64)).unwrap()
}

// ============================================================================
// Task tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_task() {
    let repo = setup().await;
    let task = create_test_task("/home/u/notes", "fldA");
    repo.save_task(&task).await.unwrap();

    let retrieved = repo.get_task(task.id()).await.unwrap().unwrap();
    assert_eq!(retrieved.name(), "Notes");
    assert_eq!(retrieved.local_root(), Path::new("/home/u/notes"));
    assert_eq!(retrieved.remote_folder().as_str(), "fldA");
    assert_eq!(retrieved.direction(), SyncDirection::Bidirectional);
    assert_eq!(retrieved.markdown_mode(), MarkdownMode::Enhanced);
    assert_eq!(retrieved.delete_policy(), DeletePolicy::Safe);
    assert_eq!(retrieved.delete_grace_secs(), 86_400);
    assert!(retrieved.is_enabled());
    assert_eq!(retrieved.owner(), &test_owner());
}

#[tokio::test]
async fn test_get_nonexistent_task() {
    let repo = setup().await;
    let result = repo.get_task(TaskId::new()).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_save_task_is_upsert() {
    let repo = setup().await;
    let mut task = create_test_task("/home/u/notes", "fldA");
    repo.save_task(&task).await.unwrap();

    task.set_enabled(false);
    repo.save_task(&task).await.unwrap();

    let retrieved = repo.get_task(task.id()).await.unwrap().unwrap();
    assert!(!retrieved.is_enabled());
}

#[tokio::test]
async fn test_list_tasks_scoped_to_owner() {
    let repo = setup().await;
    let mine = create_test_task("/home/u/notes", "fldA");
    repo.save_task(&mine).await.unwrap();

    let theirs = SyncTask::new(
        "Other device",
        PathBuf::from("/home/u/other"),
        ObjectToken::new("fldB").unwrap(),
        SyncDirection::DownloadOnly,
        MarkdownMode::DownloadOnly,
        DocUpdateMode::Full,
        DeletePolicy::Strict,
        0,
        Owner::new("device-2", "acct-1"),
    )
    .unwrap();
    repo.save_task(&theirs).await.unwrap();

    let listed = repo.list_tasks(&test_owner()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id(), mine.id());
}

#[tokio::test]
async fn test_delete_task() {
    let repo = setup().await;
    let task = create_test_task("/home/u/notes", "fldA");
    repo.save_task(&task).await.unwrap();

    repo.delete_task(task.id()).await.unwrap();
    assert!(repo.get_task(task.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_save_task_rejects_overlapping_root() {
    let repo = setup().await;
    repo.save_task(&create_test_task("/home/u/notes", "fldA"))
        .await
        .unwrap();

    let nested = create_test_task("/home/u/notes/sub", "fldB");
    assert!(repo.save_task(&nested).await.is_err());

    let same_folder = create_test_task("/home/u/elsewhere", "fldA");
    assert!(repo.save_task(&same_folder).await.is_err());
}

// ============================================================================
// Link tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_link() {
    let repo = setup().await;
    let task_id = TaskId::new();
    let mut link = create_test_link("/home/u/notes/a.md", "docA", task_id);
    let mtime = Utc::now();
    link.record_local(hash('a'), 1024, mtime);
    link.record_remote(7, Some(mtime));
    repo.save_link(&link).await.unwrap();

    let retrieved = repo
        .get_link(Path::new("/home/u/notes/a.md"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(retrieved.remote_token().as_str(), "docA");
    assert_eq!(retrieved.remote_type(), RemoteObjectType::Document);
    assert_eq!(retrieved.task_id(), task_id);
    assert_eq!(retrieved.local_hash(), Some(&hash('a')));
    assert_eq!(retrieved.local_size(), 1024);
    assert_eq!(retrieved.remote_revision(), 7);
    // RFC 3339 round-trips at full precision
    assert_eq!(retrieved.local_mtime(), Some(mtime));
    assert_eq!(retrieved.remote_mtime(), Some(mtime));
}

#[tokio::test]
async fn test_get_link_by_token() {
    let repo = setup().await;
    let link = create_test_link("/home/u/notes/a.md", "docA", TaskId::new());
    repo.save_link(&link).await.unwrap();

    let found = repo
        .get_link_by_token(&ObjectToken::new("docA").unwrap())
        .await
        .unwrap();
    assert!(found.is_some());
    assert_eq!(found.unwrap().local_path(), Path::new("/home/u/notes/a.md"));

    let missing = repo
        .get_link_by_token(&ObjectToken::new("docZ").unwrap())
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_save_link_upserts_by_path() {
    let repo = setup().await;
    let task_id = TaskId::new();
    let link = create_test_link("/home/u/notes/a.md", "docA", task_id);
    repo.save_link(&link).await.unwrap();

    // Re-created remote document: same path, new token
    let mut repointed = link.clone();
    repointed.set_remote_token(ObjectToken::new("docB").unwrap());
    repo.save_link(&repointed).await.unwrap();

    let links = repo.list_links(task_id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].remote_token().as_str(), "docB");
}

#[tokio::test]
async fn test_list_links_scoped_to_task() {
    let repo = setup().await;
    let task_a = TaskId::new();
    let task_b = TaskId::new();
    repo.save_link(&create_test_link("/home/u/a/one.md", "doc1", task_a))
        .await
        .unwrap();
    repo.save_link(&create_test_link("/home/u/a/two.md", "doc2", task_a))
        .await
        .unwrap();
    repo.save_link(&create_test_link("/home/u/b/one.md", "doc3", task_b))
        .await
        .unwrap();

    let links = repo.list_links(task_a).await.unwrap();
    assert_eq!(links.len(), 2);
    assert!(links.iter().all(|l| l.task_id() == task_a));
}

#[tokio::test]
async fn test_delete_link() {
    let repo = setup().await;
    let link = create_test_link("/home/u/notes/a.md", "docA", TaskId::new());
    repo.save_link(&link).await.unwrap();

    repo.delete_link(Path::new("/home/u/notes/a.md"))
        .await
        .unwrap();
    assert!(repo
        .get_link(Path::new("/home/u/notes/a.md"))
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Tombstone tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_live_tombstone() {
    let repo = setup().await;
    let task_id = TaskId::new();
    let ts = create_test_tombstone(task_id, "/home/u/notes/gone.md", 3600);
    repo.save_tombstone(&ts).await.unwrap();

    let live = repo
        .get_live_tombstone(task_id, Path::new("/home/u/notes/gone.md"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.id(), ts.id());
    assert_eq!(live.status(), TombstoneStatus::Pending);
    assert_eq!(live.source(), TombstoneSource::Cloud);
    assert_eq!(live.reason(), "missing from remote listing");
}

#[tokio::test]
async fn test_terminal_tombstone_is_not_live() {
    let repo = setup().await;
    let task_id = TaskId::new();
    let mut ts = create_test_tombstone(task_id, "/home/u/notes/gone.md", 0);
    ts.mark_executed().unwrap();
    repo.save_tombstone(&ts).await.unwrap();

    let live = repo
        .get_live_tombstone(task_id, Path::new("/home/u/notes/gone.md"))
        .await
        .unwrap();
    assert!(live.is_none());
}

#[tokio::test]
async fn test_failed_tombstone_is_live() {
    let repo = setup().await;
    let task_id = TaskId::new();
    let mut ts = create_test_tombstone(task_id, "/home/u/notes/gone.md", 0);
    ts.mark_failed("remote 500", Duration::seconds(600));
    repo.save_tombstone(&ts).await.unwrap();

    let live = repo
        .get_live_tombstone(task_id, Path::new("/home/u/notes/gone.md"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(live.status(), TombstoneStatus::Failed);
}

#[tokio::test]
async fn test_list_due_tombstones_filters_and_orders() {
    let repo = setup().await;
    let task_id = TaskId::new();

    let due_now = create_test_tombstone(task_id, "/home/u/notes/a.md", 0);
    let due_later = create_test_tombstone(task_id, "/home/u/notes/b.md", 7200);
    let mut executed = create_test_tombstone(task_id, "/home/u/notes/c.md", 0);
    executed.mark_executed().unwrap();

    repo.save_tombstone(&due_now).await.unwrap();
    repo.save_tombstone(&due_later).await.unwrap();
    repo.save_tombstone(&executed).await.unwrap();

    let due = repo
        .list_due_tombstones(task_id, Utc::now())
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id(), due_now.id());

    // Everything pending falls inside a wide-enough horizon
    let all = repo
        .list_due_tombstones(task_id, Utc::now() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].expire_at() <= all[1].expire_at());
}

#[tokio::test]
async fn test_tombstone_refresh_round_trips_earliest_wins() {
    let repo = setup().await;
    let task_id = TaskId::new();
    let ts = create_test_tombstone(task_id, "/home/u/notes/gone.md", 3600);
    repo.save_tombstone(&ts).await.unwrap();

    // Re-observed later: refresh against the stored row must keep the
    // original clocks
    let mut stored = repo
        .get_live_tombstone(task_id, Path::new("/home/u/notes/gone.md"))
        .await
        .unwrap()
        .unwrap();
    let original_expire = stored.expire_at();
    stored.refresh(Utc::now(), Utc::now() + Duration::seconds(7200));
    repo.save_tombstone(&stored).await.unwrap();

    let reloaded = repo
        .get_live_tombstone(task_id, Path::new("/home/u/notes/gone.md"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.expire_at(), original_expire);
}

#[tokio::test]
async fn test_delete_tombstone() {
    let repo = setup().await;
    let task_id = TaskId::new();
    let ts = create_test_tombstone(task_id, "/home/u/notes/gone.md", 0);
    repo.save_tombstone(&ts).await.unwrap();

    repo.delete_tombstone(ts.id()).await.unwrap();
    assert!(repo
        .get_live_tombstone(task_id, Path::new("/home/u/notes/gone.md"))
        .await
        .unwrap()
        .is_none());

    // Deleting again is a no-op
    repo.delete_tombstone(Uuid::new_v4()).await.unwrap();
}

// ============================================================================
// Block state tests
// ============================================================================

#[tokio::test]
async fn test_block_state_empty_for_unknown_document() {
    let repo = setup().await;
    let doc = ObjectToken::new("docA").unwrap();
    let state = repo.get_block_state(&doc).await.unwrap();
    assert!(state.is_empty());
}

#[tokio::test]
async fn test_replace_and_get_block_state() {
    let repo = setup().await;
    let doc = ObjectToken::new("docA").unwrap();
    let items = document_state(&doc, &[hash('a'), hash('b'), hash('c')]);
    repo.replace_block_state(&doc, &items).await.unwrap();

    let state = repo.get_block_state(&doc).await.unwrap();
    assert_eq!(state.len(), 3);
    for (i, item) in state.iter().enumerate() {
        assert_eq!(item.index, i as u32);
        assert_eq!(item.total_blocks, 3);
    }
    assert_eq!(state[1].hash, hash('b'));
}

#[tokio::test]
async fn test_replace_block_state_is_full_replacement() {
    let repo = setup().await;
    let doc = ObjectToken::new("docA").unwrap();
    let three = document_state(&doc, &[hash('a'), hash('b'), hash('c')]);
    repo.replace_block_state(&doc, &three).await.unwrap();

    // Shrinking the document must not leave stale rows behind
    let one = document_state(&doc, &[hash('d')]);
    repo.replace_block_state(&doc, &one).await.unwrap();

    let state = repo.get_block_state(&doc).await.unwrap();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].hash, hash('d'));
    assert_eq!(state[0].total_blocks, 1);
}

#[tokio::test]
async fn test_block_state_scoped_per_document() {
    let repo = setup().await;
    let doc_a = ObjectToken::new("docA").unwrap();
    let doc_b = ObjectToken::new("docB").unwrap();
    repo.replace_block_state(&doc_a, &document_state(&doc_a, &[hash('a')]))
        .await
        .unwrap();
    repo.replace_block_state(&doc_b, &document_state(&doc_b, &[hash('b'), hash('c')]))
        .await
        .unwrap();

    repo.clear_block_state(&doc_a).await.unwrap();

    assert!(repo.get_block_state(&doc_a).await.unwrap().is_empty());
    assert_eq!(repo.get_block_state(&doc_b).await.unwrap().len(), 2);
}
