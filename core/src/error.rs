//! Crate-wide error taxonomy.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The single error taxonomy shared by every component of the pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error in {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("embedding/LLM backend error: {0}")]
    Backend(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("security error: {0}")]
    Security(String),
}

impl CoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::Config(msg.into())
    }

    pub fn security(msg: impl Into<String>) -> Self {
        CoreError::Security(msg.into())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Backend(err.to_string())
    }
}
