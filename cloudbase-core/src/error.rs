//! Top-level error types for the CloudBase SDK.
//!
//! Every error renders with a fixed `[cloudbase][KIND]` prefix and exposes an
//! [`ErrorKind`] so callers can branch on the category without matching on
//! message text.

use std::fmt;

use thiserror::Error;

use crate::cache::StoreError;

/// Name used in the prefix of every error message.
pub const SDK_NAME: &str = "cloudbase";

/// Error category tag carried by every [`SdkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or contradictory caller input.
    InvalidParams,
    /// The operation is not valid for the handle's current state.
    InvalidOperation,
    /// The backend explicitly refused the operation.
    OperationFail,
    /// The backend answered, but without the fields the protocol requires.
    MalformedResponse,
    /// Transport failure or timeout.
    NetworkError,
    /// Credential storage failure.
    StorageError,
    /// Anything else, e.g. a failed navigation.
    UnknownError,
}

impl ErrorKind {
    /// Wire-style tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParams => "INVALID_PARAMS",
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::OperationFail => "OPERATION_FAIL",
            Self::MalformedResponse => "MALFORMED_RESPONSE",
            Self::NetworkError => "NETWORK_ERROR",
            Self::StorageError => "STORAGE_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for every fallible SDK operation.
#[derive(Debug, Error)]
pub enum SdkError {
    /// Caller supplied invalid or contradictory parameters.
    #[error("[cloudbase][INVALID_PARAMS] {message}")]
    InvalidParams { message: String },

    /// The handle cannot perform this operation (e.g. it was never configured).
    #[error("[cloudbase][INVALID_OPERATION] {message}")]
    InvalidOperation { message: String },

    /// The backend answered with an error code.
    #[error("[cloudbase][OPERATION_FAIL] action:{action} failed: {code}{}", format_message(.message))]
    BackendRejected {
        action: String,
        code: String,
        message: Option<String>,
    },

    /// The backend answered without a field the protocol requires.
    #[error("[cloudbase][MALFORMED_RESPONSE] action:{action} {message}")]
    MalformedResponse { action: String, message: String },

    /// The transport failed before a response was decoded.
    #[error("[cloudbase][NETWORK_ERROR] {message}")]
    Network { message: String },

    /// The request did not finish within the configured timeout.
    #[error("[cloudbase][NETWORK_ERROR] request had been abort since didn't finished within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Credential storage failed.
    #[error("[cloudbase][STORAGE_ERROR] {0}")]
    Storage(#[from] StoreError),

    /// Redirect navigation could not be performed.
    #[error("[cloudbase][UNKNOWN_ERROR] navigation failed: {message}")]
    Navigation { message: String },

    /// Unclassified failure.
    #[error("[cloudbase][UNKNOWN_ERROR] {message}")]
    Unknown { message: String },
}

fn format_message(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(" ({m})"))
        .unwrap_or_default()
}

impl SdkError {
    pub(crate) fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            Self::BackendRejected { .. } => ErrorKind::OperationFail,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Network { .. } | Self::Timeout { .. } => ErrorKind::NetworkError,
            Self::Storage(_) => ErrorKind::StorageError,
            Self::Navigation { .. } | Self::Unknown { .. } => ErrorKind::UnknownError,
        }
    }

    /// The backend error code, when the backend rejected the call.
    pub fn backend_code(&self) -> Option<&str> {
        match self {
            Self::BackendRejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SdkError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network {
            message: e.to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type SdkResult<T> = Result<T, SdkError>;

/// A non-fatal warning returned by deprecated entry points.
///
/// The operation "completes" with this value instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeprecationWarning {
    pub kind: ErrorKind,
    pub message: String,
}

impl DeprecationWarning {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::OperationFail,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeprecationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}] {}", SDK_NAME, self.kind, self.message)
    }
}
