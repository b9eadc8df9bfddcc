//! Error types for Palaver.

use thiserror::Error;

/// Primary error type for all Palaver operations.
#[derive(Error, Debug)]
pub enum PalaverError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Bus closed")]
    BusClosed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Iteration limit of {0} exceeded")]
    IterationLimit(u32),
}

impl PalaverError {
    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether this error should abort the whole process rather than one turn.
    ///
    /// Everything except a closed bus is scoped to the conversation turn that
    /// triggered it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BusClosed)
    }
}

impl From<rusqlite::Error> for PalaverError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Memory(err.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, PalaverError>;
