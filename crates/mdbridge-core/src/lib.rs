//! mdbridge Core - Domain logic and port definitions
//!
//! This crate contains the pure domain layer of mdbridge: the entities that
//! describe a sync pairing and its bookkeeping (tasks, links, tombstones,
//! block state), the ephemeral run/conflict surfaces, and the port traits
//! that the runner consumes (drive listing, document blocks, export/import
//! jobs, binary transfer, credentials, persistence).
//!
//! No I/O happens here. Adapters live in sibling crates (`mdbridge-store`
//! for SQLite persistence) or outside this workspace (HTTP clients).

pub mod config;
pub mod domain;
pub mod logging;
pub mod ports;

pub use domain::{
    block_state::BlockStateItem,
    conflict::{ConflictItem, ConflictRegistry, ConflictSide},
    link::SyncLink,
    status::{FileEvent, FileOutcome, RunState, StatusRegistry, SyncTaskStatus},
    task::{DeletePolicy, DocUpdateMode, MarkdownMode, Owner, SyncDirection, SyncTask},
    tombstone::{SyncTombstone, TombstoneSource, TombstoneStatus},
};
