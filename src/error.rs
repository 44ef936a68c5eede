use std::path::PathBuf;
use std::time::Duration;

use crate::types::ApiResponse;

/// Why a token refresh did not produce a new token triple.
///
/// Cloneable so one outcome can be fanned out to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshFailure {
    #[error("refresh token rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("malformed refresh response: {0}")]
    Malformed(String),

    #[error("refresh timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("refreshed tokens could not be stored: {0}")]
    Storage(String),

    #[error("refresh was interrupted before completing")]
    Interrupted,
}

impl RefreshFailure {
    pub fn code(&self) -> &'static str {
        match self {
            RefreshFailure::Rejected { .. } => "rejected",
            RefreshFailure::Transport(_) => "transport",
            RefreshFailure::Malformed(_) => "malformed",
            RefreshFailure::Timeout(_) => "timeout",
            RefreshFailure::NoRefreshToken => "no_refresh_token",
            RefreshFailure::Storage(_) => "storage",
            RefreshFailure::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FarmgateError {
    #[error("{request} was rejected as unauthorized (HTTP {})", .response.status.as_u16())]
    Unauthorized {
        request: String,
        response: Box<ApiResponse>,
    },

    #[error("{request} failed: session expired and could not be refreshed ({reason})")]
    RefreshFailed {
        request: String,
        reason: RefreshFailure,
        /// The 401 that triggered recovery; `None` for proactive refreshes.
        original: Option<Box<ApiResponse>>,
    },

    /// The refresh this request waited on never finished. The session is
    /// left as it was, so the request can simply be retried.
    #[error("{request} failed: the session refresh it waited on was interrupted")]
    RefreshInterrupted { request: String },

    #[error("{request} was still unauthorized after refreshing the session")]
    RecoveryExhausted {
        request: String,
        response: Box<ApiResponse>,
    },

    #[error("{request} returned HTTP {status}: {body}")]
    Status {
        request: String,
        status: u16,
        body: String,
    },

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("Timeout after {}ms calling {request}", .duration.as_millis())]
    Timeout { request: String, duration: Duration },

    #[error("Transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Not logged in. Run: farmgate login <username>")]
    NotLoggedIn,

    #[error("Token storage error at {}: {detail}", path.display())]
    Storage { path: PathBuf, detail: String },

    #[error("Error in config {}: {detail}", path.display())]
    ConfigError { path: PathBuf, detail: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl FarmgateError {
    /// The error a request sees when the refresh it depended on failed.
    /// `original` is the 401 that triggered a reactive refresh.
    pub fn from_refresh(
        request: String,
        reason: RefreshFailure,
        original: Option<Box<ApiResponse>>,
    ) -> Self {
        match reason {
            RefreshFailure::Interrupted => FarmgateError::RefreshInterrupted { request },
            reason => FarmgateError::RefreshFailed {
                request,
                reason,
                original,
            },
        }
    }

    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            FarmgateError::Unauthorized { .. } => "unauthorized",
            FarmgateError::RefreshFailed { .. } => "refresh_failed",
            FarmgateError::RefreshInterrupted { .. } => "refresh_interrupted",
            FarmgateError::RecoveryExhausted { .. } => "recovery_exhausted",
            FarmgateError::Status { .. } => "http_status",
            FarmgateError::Cancelled(_) => "cancelled",
            FarmgateError::Timeout { .. } => "timeout",
            FarmgateError::Transport(_) => "transport_error",
            FarmgateError::Decode(_) => "decode_error",
            FarmgateError::NotLoggedIn => "not_logged_in",
            FarmgateError::Storage { .. } => "storage_error",
            FarmgateError::ConfigError { .. } => "config_error",
            FarmgateError::InvalidArgument(_) => "invalid_argument",
            FarmgateError::IoError(_) => "io_error",
        }
    }

    /// The `METHOD path` label of the request this error belongs to, if any.
    pub fn request(&self) -> Option<&str> {
        match self {
            FarmgateError::Unauthorized { request, .. }
            | FarmgateError::RefreshFailed { request, .. }
            | FarmgateError::RefreshInterrupted { request }
            | FarmgateError::RecoveryExhausted { request, .. }
            | FarmgateError::Status { request, .. }
            | FarmgateError::Timeout { request, .. } => Some(request),
            FarmgateError::Cancelled(request) => Some(request),
            _ => None,
        }
    }

    /// HTTP status of the response that ended the request, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FarmgateError::Unauthorized { response, .. }
            | FarmgateError::RecoveryExhausted { response, .. } => {
                Some(response.status.as_u16())
            }
            FarmgateError::RefreshFailed { original, .. } => {
                original.as_ref().map(|r| r.status.as_u16())
            }
            FarmgateError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the error means the local session is gone and the user has
    /// to log in again.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            FarmgateError::RefreshFailed { .. }
                | FarmgateError::RecoveryExhausted { .. }
                | FarmgateError::NotLoggedIn
        )
    }

    /// Produce a structured JSON error object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if let Some(request) = self.request() {
            obj.insert("request".into(), serde_json::Value::String(request.to_string()));
        }
        if let Some(status) = self.status() {
            obj.insert("status".into(), serde_json::Value::from(status));
        }
        if let FarmgateError::RefreshFailed { reason, .. } = self {
            obj.insert(
                "reason".into(),
                serde_json::Value::String(reason.code().to_string()),
            );
        }
        obj.insert("message".into(), serde_json::Value::String(self.to_string()));
        obj.insert("code".into(), serde_json::Value::String(self.code().to_string()));
        serde_json::json!({ "error": obj })
    }
}
