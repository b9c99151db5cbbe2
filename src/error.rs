//! Error types for the pv-migrate CLI

use pv_migrate_engine::MigrationError;

/// CLI error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The engine could not complete the migration
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Invalid command-line input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what was wrong
        message: String,
    },

    /// The run was stopped before the engine finished
    #[error("migration interrupted: {reason}")]
    Interrupted {
        /// What stopped the run
        reason: String,
    },
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an interruption error
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::Interrupted {
            reason: reason.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, Error>;
