//! Sandbox error taxonomy

use thiserror::Error;

/// Error type for sandbox operations
#[derive(Debug, Error)]
pub enum SandboxError {
    /// A sandbox operation was attempted with no session
    #[error("no active sandbox session")]
    NoActiveSession,
    /// The remote session expired; the held id is stale
    #[error("sandbox session timed out: {0}")]
    Timeout(String),
    #[error("failed to create sandbox: {0}")]
    Create(String),
    #[error("failed to reconnect to sandbox {id}: {message}")]
    Reconnect { id: String, message: String },
    #[error("unknown file operation: {0}")]
    UnknownOperation(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("sandbox request failed: {0}")]
    Remote(String),
    #[error("sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// The stale-session signal that triggers resume-then-retry
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout(_))
    }

    /// Stable machine-readable kind, used in tool results
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::NoActiveSession => "no_active_session",
            SandboxError::Timeout(_) => "session_timeout",
            SandboxError::Create(_) => "session_create",
            SandboxError::Reconnect { .. } => "session_reconnect",
            SandboxError::UnknownOperation(_) => "unknown_operation",
            SandboxError::UnsupportedLanguage(_) => "unsupported_language",
            SandboxError::Remote(_) => "sandbox_error",
            SandboxError::Io(_) => "io_error",
        }
    }
}

impl From<reqwest::Error> for SandboxError {
    fn from(e: reqwest::Error) -> Self {
        SandboxError::Remote(e.to_string())
    }
}
