use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider failures, classified at the capability boundary so the
/// scheduler never inspects provider-specific error shapes.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceError {
    /// Provider asked us to back off for at least `retry_after_secs`.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Account authorization is gone; manual re-onboarding required.
    #[error("account authorization expired")]
    AuthExpired,

    /// Channel requires an approval we do not have yet.
    #[error("channel access pending approval")]
    PermissionPending,

    /// Connectivity or provider hiccup worth retrying with another account.
    #[error("transient network failure: {message}")]
    NetworkTransient { message: String },
}

impl SourceError {
    pub fn network(message: impl Into<String>) -> Self {
        SourceError::NetworkTransient { message: message.into() }
    }
}
