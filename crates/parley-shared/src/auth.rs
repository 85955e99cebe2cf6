//! Authentication collaborator interface.
//!
//! Token issuance lives outside this engine; the transport and the REST
//! client only ever *use* tokens.  The provider is injected at construction
//! time so tests can substitute a double.

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by an [`AuthProvider`].
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("no credentials available")]
    NotAuthenticated,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Source of bearer tokens for the chat backend.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current access token, if any.
    async fn get_access_token(&self) -> Option<String>;

    /// Exchange the current credentials for a fresh access token.
    async fn refresh_token(&self) -> Result<String, AuthError>;
}

/// Provider backed by a fixed token.  Refreshing re-issues the same token;
/// useful for tests and long-lived service credentials.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_access_token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    async fn refresh_token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}
