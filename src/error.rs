/// Error Handling Module
///
/// Error taxonomy for the session client:
/// 1. Credential decoding errors (always recovered locally by logging out)
/// 2. Session errors (terminal for the current session)
/// 3. API errors surfaced to callers of the request pipeline
/// 4. Storage errors from the persistence boundary
/// 5. Structured error logging with request context

use std::error::Error as StdError;
use std::fmt;

// ============================================================================
// 1. CREDENTIAL DECODING
// ============================================================================

/// An access token that cannot be turned into an identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a three-part base64url token with a readable header and payload
    Malformed(String),
    /// Payload is readable but its claims do not map onto an identity
    Claims(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(msg) => write!(f, "Malformed access token: {}", msg),
            DecodeError::Claims(msg) => write!(f, "Access token claims are invalid: {}", msg),
        }
    }
}

impl StdError for DecodeError {}

// ============================================================================
// 2. SESSION ERRORS
// ============================================================================

/// Failures that end the current session.
///
/// `Clone` because a single refresh failure is handed to every request that
/// was queued behind the refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A 401 arrived while no refresh credential was stored
    NoRefreshCredential,
    /// The refresh endpoint refused the refresh credential, answered with
    /// something other than a usable access token, or could not be reached
    RefreshRejected { status: Option<u16>, reason: String },
    /// The request driving the refresh was dropped before it settled
    RefreshAbandoned,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoRefreshCredential => write!(f, "No refresh token available"),
            SessionError::RefreshRejected {
                status: Some(status),
                reason,
            } => write!(f, "Token refresh rejected ({}): {}", status, reason),
            SessionError::RefreshRejected { status: None, reason } => {
                write!(f, "Token refresh failed: {}", reason)
            }
            SessionError::RefreshAbandoned => write!(f, "Token refresh was abandoned"),
        }
    }
}

impl StdError for SessionError {}

// ============================================================================
// 3. API ERRORS
// ============================================================================

/// Errors returned by [`crate::client::ApiClient`]
#[derive(Debug)]
pub enum ApiError {
    /// Any non-2xx answer other than 401, passed through untouched
    NonAuthFailure { status: u16, body: String },
    /// 401 on a request that already went through a refresh
    Unauthorized { body: String },
    /// The session ended while this request was being handled
    Session(SessionError),
    /// The request never produced an HTTP response
    Transport(String),
    /// The request could not be built
    InvalidRequest(String),
    /// The response body did not have the expected shape
    InvalidResponse(String),
}

impl ApiError {
    /// HTTP status that produced this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NonAuthFailure { status, .. } => Some(*status),
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Session(SessionError::RefreshRejected { status, .. }) => *status,
            _ => None,
        }
    }

    /// True when the error ended the session (the user has been logged out)
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, ApiError::Session(_))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NonAuthFailure { status, body } => {
                write!(f, "Request failed with status {}: {}", status, body)
            }
            ApiError::Unauthorized { body } => write!(f, "Unauthorized after token refresh: {}", body),
            ApiError::Session(e) => write!(f, "{}", e),
            ApiError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl StdError for ApiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ApiError::Session(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.to_string())
    }
}

// ============================================================================
// 4. STORAGE ERRORS
// ============================================================================

/// Durable storage failures
#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "Storage I/O error: {}", e),
            StorageError::Serialization(e) => write!(f, "Storage format error: {}", e),
        }
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Serialization(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err)
    }
}

// ============================================================================
// 5. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Per-request context for structured failure logs
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn log_error(&self, error: &ApiError) {
        let started = self.timestamp.to_rfc3339();
        match error {
            ApiError::NonAuthFailure { status, .. } => {
                tracing::warn!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    started = %started,
                    status = *status,
                    "Request failed"
                );
            }
            ApiError::Unauthorized { .. } => {
                tracing::warn!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    started = %started,
                    "Request rejected after token refresh"
                );
            }
            ApiError::Session(e) => {
                tracing::warn!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    started = %started,
                    error = %e,
                    "Session terminated"
                );
            }
            ApiError::Transport(_) | ApiError::InvalidRequest(_) | ApiError::InvalidResponse(_) => {
                tracing::error!(
                    request_id = %self.request_id,
                    operation = %self.operation,
                    started = %started,
                    error = %error,
                    "Request error"
                );
            }
        }
    }
}
