//! Domain error types

use thiserror::Error;

/// Errors raised by domain-level validation and state transitions
#[derive(Debug, Error)]
pub enum DomainError {
    /// An identifier string failed validation
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// A path failed validation (relative, empty, or outside the task root)
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Two enabled tasks for the same owner would cover overlapping trees
    #[error("Task overlaps with existing task '{other}': {reason}")]
    TaskOverlap { other: String, reason: String },

    /// A state transition was requested that the entity does not allow
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Configuration value rejected during validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
