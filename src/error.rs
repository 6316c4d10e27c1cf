//! Error types for the database utility
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Error Enum ==
/// Unified error type for the database utility.
///
/// Errors are `Clone` so that a single failed initialization can be handed to
/// every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required setting is absent or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The database handle could not be produced for an endpoint
    #[error(
        "Failed to get database for endpoint {endpoint}: {reason}. \
         Unable to connect to Cosmos, will try again on the next request"
    )]
    Initialization { endpoint: String, reason: String },

    /// A remote collaborator rejected or failed the request
    #[error("Remote error: {0}")]
    Remote(String),

    /// The remote resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller stopped waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// The cache was disposed
    #[error("Cache has been disposed")]
    Disposed,

    /// The initialization task ended without producing a result
    #[error("Initialization was interrupted before producing a result")]
    Interrupted,

    /// An initialization was requested outside a tokio runtime
    #[error("No tokio runtime available to run the initialization")]
    NoRuntime,
}

// == Result Type Alias ==
/// Convenience Result type for the database utility.
pub type Result<T> = std::result::Result<T, Error>;
