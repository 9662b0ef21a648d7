use thiserror::Error;

/// Errors from template persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access template storage")]
    Io(#[from] std::io::Error),
    #[error("failed to encode or decode templates")]
    Serde(#[from] serde_json::Error),
}

/// Errors surfaced by the service handle.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("timer driver is no longer running")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type ServiceResult<T> = Result<T, ServiceError>;
