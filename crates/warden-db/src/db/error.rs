use thiserror::Error;
use warden_core::UploadError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        UploadError::PersistenceFailed(err.to_string())
    }
}
