use thiserror::Error;

/// Main error type for relnet
#[derive(Error, Debug)]
pub enum RelnetError {
    /// Caller supplied unusable arguments (e.g. fewer than two query entities)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// None of the requested entities exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A link, label, or graph-algorithm provider failed
    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    /// A provider call exceeded its deadline
    #[error("Provider call timed out after {0} ms")]
    Timeout(u64),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelnetError {
    /// True for errors that originate in an external provider, including timeouts.
    /// These abort the whole request with no partial network.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            RelnetError::ProviderFailure(_) | RelnetError::Timeout(_) | RelnetError::Database(_)
        )
    }
}

/// Convenient Result type using RelnetError
pub type Result<T> = std::result::Result<T, RelnetError>;
