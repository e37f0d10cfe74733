use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("NOT_EMPTY: {0}")]
    NotEmpty(String),
    #[error("REFERENCE_CONFLICT: {0}")]
    ReferenceConflict(String),
    #[error("UPLOAD_FAILED: {0}")]
    Upload(String),
    #[error("BAD_REQUEST: {0}")]
    BadRequest(String),
    #[error("STORAGE: {0}")]
    Storage(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Storage and io failures carry backend details that must not reach callers.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Io(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Logs a storage failure with its context and swaps it for a generic error.
/// Typed failures (validation, not found, ...) pass through untouched.
pub fn conceal_storage_failure(error: AppError, operation: &str, subject: &str) -> AppError {
    if !error.is_storage_failure() {
        return error;
    }
    tracing::error!(operation, subject, error = %error, "storage failure");
    AppError::Internal(format!("could not {} '{}'", operation, subject))
}
