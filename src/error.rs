//! Error types for Muse

use thiserror::Error;

/// Main error type for the orchestration engine
#[derive(Error, Debug)]
pub enum MuseError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Embedding generation failed
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    /// An external provider (model, search, analysis) failed
    #[error("{kind} provider error: {message}")]
    Provider {
        kind: &'static str,
        message: String,
        /// Network-level failures worth retrying
        transient: bool,
    },

    /// Classifier output could not be used
    #[error("Classification error: {0}")]
    Classification(String),

    /// A bounded wait elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MuseError {
    pub fn provider(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            kind,
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            kind,
            message: message.into(),
            transient: true,
        }
    }

    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        matches!(self, MuseError::Provider { transient: true, .. } | MuseError::Timeout(_))
    }
}

impl From<serde_json::Error> for MuseError {
    fn from(e: serde_json::Error) -> Self {
        MuseError::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MuseError>;
