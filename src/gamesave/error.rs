use thiserror::Error;

#[derive(Error, Debug)]
pub enum GameSaveError {
    #[error("Blob not found: {container}/{blob}")]
    BlobNotFound { container: String, blob: String },

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Quota exceeded: update needs {needed} bytes, {remaining} remaining")]
    QuotaExceeded { needed: u64, remaining: i64 },

    #[error("No storage session has been established")]
    NotInitialized,

    #[error("No active slot")]
    NoActiveSlot,

    #[error("Invalid slot number: {0}")]
    InvalidSlot(u32),

    #[error("Cannot change the sync-on-demand setting once a session has been established")]
    SyncModeLocked,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GameSaveError {
    /// True for the "nothing stored here" outcomes, which callers treat as
    /// absence rather than failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GameSaveError::BlobNotFound { .. } | GameSaveError::ContainerNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GameSaveError>;
