//! Domain layer: entities, value objects, and validation rules
//!
//! Entities are constructed through validating constructors and mutated
//! through methods that preserve their invariants (earliest-wins tombstone
//! timing, link fingerprint updates, status transitions).

pub mod block_state;
pub mod conflict;
pub mod errors;
pub mod link;
pub mod newtypes;
pub mod status;
pub mod task;
pub mod tombstone;
