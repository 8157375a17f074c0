use thiserror::Error;

/// Core error types for EntitySearch document operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid document: {message}")]
    InvalidDocument { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new InvalidDocument error
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
