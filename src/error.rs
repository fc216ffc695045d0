// Error handling module
// Defines the client error taxonomy surfaced to callers

use std::fmt;

use thiserror::Error;

/// Why a 401 ended up terminal instead of being recovered by a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The request was marked skip-refresh (refresh/logout endpoints)
    SkipRefresh,

    /// The request carried no stored credential, nothing to refresh
    NoCredential,

    /// The request carried a caller-supplied Authorization header
    CallerCredential,

    /// The request was already retried once after a refresh
    AlreadyRetried,

    /// The refresh round failed and the session was terminated
    RefreshFailed,

    /// Login rejected the supplied email/password
    InvalidCredentials,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            AuthFailure::SkipRefresh => "request is not eligible for token refresh",
            AuthFailure::NoCredential => "no credential to refresh",
            AuthFailure::CallerCredential => "caller-supplied credential was rejected",
            AuthFailure::AlreadyRetried => "request was rejected again after token refresh",
            AuthFailure::RefreshFailed => "session expired",
            AuthFailure::InvalidCredentials => "invalid email or password",
        };
        f.write_str(msg)
    }
}

/// Errors that can occur while talking to the clinic backend
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network unreachable, timeout, or other transport-level failure
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Terminal authentication failure
    #[error("Authentication failed: {0}")]
    Unauthorized(AuthFailure),

    /// Non-success status from the clinic backend
    #[error("Clinic API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The request descriptor could not be turned into an HTTP request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// True when the transport failure was a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Transport(e) if e.is_timeout())
    }

    /// True for any terminal authentication failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    /// Short category used in structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Transport(e) if e.is_timeout() => "timeout",
            ClientError::Transport(e) if e.is_connect() => "connection_failed",
            ClientError::Transport(e) if e.is_body() => "body_error",
            ClientError::Transport(_) => "transport",
            ClientError::Unauthorized(_) => "unauthorized",
            ClientError::Api { .. } => "api_error",
            ClientError::InvalidRequest(_) => "invalid_request",
            ClientError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Maximum length for response bodies carried in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ClientError {
    /// Build an API error from a status and body, truncating large bodies
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        };
        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::InvalidResponse(e.to_string())
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
