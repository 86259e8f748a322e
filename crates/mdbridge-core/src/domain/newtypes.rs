//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers that flow between the runner,
//! the codec, and the persistence layer. Each newtype validates at
//! construction time so the rest of the code can assume well-formed values.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// TaskId
// ============================================================================

/// Identifier for a configured sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new random TaskId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid task id UUID: {e}")))
    }
}

// ============================================================================
// ObjectToken
// ============================================================================

/// Opaque identifier for a remote object (folder, document, file, block root)
///
/// Tokens are assigned by the remote service and carry no structure we can
/// inspect; the only local invariant is non-emptiness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectToken(String);

impl ObjectToken {
    /// Create a token, rejecting empty or whitespace-only strings
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(DomainError::InvalidId(
                "Remote object token must not be empty".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Borrow the token string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ObjectToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ObjectToken {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// ContentHash
// ============================================================================

/// SHA-256 content fingerprint, stored as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a hash from a 64-character lowercase hex string
    pub fn new(hex: impl Into<String>) -> Result<Self, DomainError> {
        let hex = hex.into();
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidId(format!(
                "Content hash must be 64 hex characters, got '{hex}'"
            )));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Borrow the hex string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn test_task_id_roundtrip() {
        let id = TaskId::new();
        let parsed = TaskId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_object_token_rejects_empty() {
        assert!(ObjectToken::new("").is_err());
        assert!(ObjectToken::new("   ").is_err());
        assert!(ObjectToken::new("doccnAbc123").is_ok());
    }

    #[test]
    fn test_content_hash_validates_hex() {
        assert!(ContentHash::new(HEX_A).is_ok());
        assert!(ContentHash::new("abc").is_err());
        assert!(ContentHash::new("z".repeat(64)).is_err());
    }

    #[test]
    fn test_content_hash_normalizes_case() {
        let upper = HEX_A.to_ascii_uppercase();
        let hash = ContentHash::new(upper).unwrap();
        assert_eq!(hash.as_str(), HEX_A);
    }
}
