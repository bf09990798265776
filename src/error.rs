use thiserror::Error;

use crate::shortcode::GenerationError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("link not found")]
    NotFound,
    #[error("storage unavailable: {0}")]
    Unavailable(#[source] StorageError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("failed to get {query}: {source}")]
    Aggregation {
        query: &'static str,
        #[source]
        source: StorageError,
    },
    #[error("invalid destination url: {0}")]
    InvalidDestination(String),
    #[error("no free short code after {0} attempts")]
    SlugExhausted(usize),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ServiceError::NotFound,
            other => ServiceError::Unavailable(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
