use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ArborError>;

/// Remote side of a stale page edit, returned so the editor can offer
/// keep-mine / take-theirs / merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevisionConflict {
    pub page_id: String,
    pub path: String,
    pub origin_revision_id: Option<String>,
    pub remote_revision_id: String,
    pub remote_body: String,
    pub remote_author: String,
    pub remote_created_at: String,
}

#[derive(Debug, Error)]
pub enum ArborError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("revision conflict on {}: remote revision is {}", .0.path, .0.remote_revision_id)]
    RevisionConflict(Box<RevisionConflict>),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub operation: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ArborError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::Conflict(_) => "CONFLICT",
            Self::RevisionConflict(_) => "REVISION_CONFLICT",
            Self::Transient(_) => "TRANSIENT",
            Self::OperationFailed(_) => "OPERATION_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn lock_poisoned(name: &str) -> Self {
        Self::Internal(format!("{name} lock poisoned"))
    }

    /// Failures a ledger-driven retry can reasonably expect to clear.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Rebuilds an equivalent error for callers that shared someone else's
    /// in-flight request and therefore never owned the original value.
    #[must_use]
    pub fn replicate(&self) -> Self {
        match self {
            Self::InvalidPath(message) => Self::InvalidPath(message.clone()),
            Self::Validation(message) => Self::Validation(message.clone()),
            Self::NotFound(message) => Self::NotFound(message.clone()),
            Self::PermissionDenied(message) => Self::PermissionDenied(message.clone()),
            Self::Conflict(message) => Self::Conflict(message.clone()),
            Self::RevisionConflict(conflict) => Self::RevisionConflict(conflict.clone()),
            Self::Transient(message) => Self::Transient(message.clone()),
            Self::OperationFailed(message) => Self::OperationFailed(message.clone()),
            Self::Internal(message) => Self::Internal(message.clone()),
            other if other.is_transient() => Self::Transient(other.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }

    pub fn to_payload(&self, operation: impl Into<String>, path: Option<String>) -> ErrorPayload {
        let details = match self {
            Self::RevisionConflict(conflict) => serde_json::to_value(conflict.as_ref()).ok(),
            _ => None,
        };
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            operation: operation.into(),
            trace_id: Uuid::new_v4().to_string(),
            path,
            details,
        }
    }
}
