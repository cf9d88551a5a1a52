use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum IndexerError {
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    #[error("Index already registered: {0}")]
    IndexAlreadyRegistered(String),

    #[error("Invalid index identifier: {0:?}")]
    InvalidIndexId(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Already in batching mode for index {0}")]
    AlreadyBatching(String),

    #[error("Not in batching mode for index {0}")]
    NotBatching(String),

    #[error("Engine failure on index {index}: {message}")]
    Engine { index: String, message: String },

    #[error("Could not obtain write lock on index {index}: {message}")]
    LockObtainFailed { index: String, message: String },

    #[error("Transport failure sending to {destination}: {message}")]
    TransportFailure {
        destination: String,
        message: String,
    },

    #[error("Read handle {reader_id} on index {index} released more times than it was acquired")]
    DoubleRelease { index: String, reader_id: u64 },

    #[error("Operation queue for index {index} is full ({capacity} batches pending)")]
    RejectedOverload { index: String, capacity: usize },

    #[error("Manager is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Tantivy error: {0}")]
    Tantivy(String),
}

pub type Result<T> = std::result::Result<T, IndexerError>;

impl From<std::io::Error> for IndexerError {
    fn from(e: std::io::Error) -> Self {
        IndexerError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        IndexerError::Json(e.to_string())
    }
}

impl From<tantivy::TantivyError> for IndexerError {
    fn from(e: tantivy::TantivyError) -> Self {
        IndexerError::Tantivy(e.to_string())
    }
}

impl IndexerError {
    /// Wraps an engine-level error with the index it happened on.
    ///
    /// Lock contention keeps its own variant so the executor can tell a
    /// legitimate external lock holder apart from a broken writer.
    pub fn engine(index: &str, e: tantivy::TantivyError) -> Self {
        match e {
            tantivy::TantivyError::LockFailure(lock_err, msg) => IndexerError::LockObtainFailed {
                index: index.to_string(),
                message: match msg {
                    Some(m) => format!("{}: {}", lock_err, m),
                    None => lock_err.to_string(),
                },
            },
            other => IndexerError::Engine {
                index: index.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub fn is_lock_failure(&self) -> bool {
        matches!(self, IndexerError::LockObtainFailed { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IndexerError::UnknownIndex(_) => StatusCode::NOT_FOUND,
            IndexerError::IndexAlreadyRegistered(_) => StatusCode::CONFLICT,
            IndexerError::InvalidIndexId(_) => StatusCode::BAD_REQUEST,
            IndexerError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            IndexerError::AlreadyBatching(_) => StatusCode::CONFLICT,
            IndexerError::NotBatching(_) => StatusCode::CONFLICT,
            IndexerError::Engine { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            IndexerError::LockObtainFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
            IndexerError::TransportFailure { .. } => StatusCode::BAD_GATEWAY,
            IndexerError::DoubleRelease { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            IndexerError::RejectedOverload { .. } => StatusCode::SERVICE_UNAVAILABLE,
            IndexerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            IndexerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IndexerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IndexerError::Json(_) => StatusCode::BAD_REQUEST,
            IndexerError::Tantivy(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name, used in HTTP error bodies.
    pub fn error_code(&self) -> &'static str {
        match self {
            IndexerError::UnknownIndex(_) => "unknown_index",
            IndexerError::IndexAlreadyRegistered(_) => "index_already_registered",
            IndexerError::InvalidIndexId(_) => "invalid_index_id",
            IndexerError::InvalidOperation(_) => "invalid_operation",
            IndexerError::AlreadyBatching(_) => "already_batching",
            IndexerError::NotBatching(_) => "not_batching",
            IndexerError::Engine { .. } => "engine_failure",
            IndexerError::LockObtainFailed { .. } => "lock_obtain_failed",
            IndexerError::TransportFailure { .. } => "transport_failure",
            IndexerError::DoubleRelease { .. } => "double_release",
            IndexerError::RejectedOverload { .. } => "rejected_overload",
            IndexerError::ShuttingDown => "shutting_down",
            IndexerError::Config(_) => "config_error",
            IndexerError::Io(_) => "io_error",
            IndexerError::Json(_) => "json_error",
            IndexerError::Tantivy(_) => "tantivy_error",
        }
    }
}

#[cfg(feature = "axum-support")]
use axum::response::{IntoResponse, Json, Response};

#[cfg(feature = "axum-support")]
#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<&'static str>,
}

#[cfg(feature = "axum-support")]
impl IntoResponse for IndexerError {
    fn into_response(self) -> Response {
        let suggestion = match &self {
            IndexerError::RejectedOverload { .. } | IndexerError::LockObtainFailed { .. } => {
                Some("Retry after a short delay")
            }
            IndexerError::UnknownIndex(_) => Some("Check the index name against GET /internal/status"),
            _ => None,
        };
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        let body = ErrorResponse {
            error: self.error_code(),
            message: self.to_string(),
            suggestion,
        };
        (status, Json(body)).into_response()
    }
}
