use thiserror::Error;

/// Errors produced while deriving keys, talking to storage, or replaying.
#[derive(Debug, Error)]
pub enum RetentionError {
    /// The storage has no response for the requested key.
    #[error("response is not retained")]
    NotRetained,

    #[error("failed to derive cache key: {0}")]
    KeyDerivation(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    /// A retained response could not be written back to the caller.
    #[error("failed to write the retained response: {0}")]
    WriteFailure(String),
}

impl RetentionError {
    /// Returns `true` for the distinguished miss outcome.
    pub fn is_not_retained(&self) -> bool {
        matches!(self, RetentionError::NotRetained)
    }
}
