use thiserror::Error;

/// Infrastructure-level store failures. Expected race outcomes (lost a
/// conditional update, stale view, invalid transition) are never an `Err` —
/// they are `Ok(None)` from the calling `Backlog`/`RunSupervisor` method.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored row failed to decode: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}
