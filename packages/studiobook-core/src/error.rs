//! Error types shared across the session layer and API client.

use thiserror::Error;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Credential store or profile cache could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status or an unsuccessful envelope
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl SessionError {
    pub(crate) fn storage(err: anyhow::Error) -> Self {
        SessionError::Storage(format!("{:#}", err))
    }

    /// True when the server rejected the credential (HTTP 401)
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SessionError::Api { status: 401, .. })
    }
}
