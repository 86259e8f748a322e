//! Credential provider port (driven/secondary port)
//!
//! Token acquisition and refresh are opaque to the core. An operation that
//! cannot obtain a credential fails; the runner records the failure and
//! moves on.

/// Port trait supplying a currently-valid bearer credential on demand
#[async_trait::async_trait]
pub trait ICredentialProvider: Send + Sync {
    /// Returns a bearer token valid for at least the next request
    async fn bearer_token(&self) -> anyhow::Result<String>;
}
