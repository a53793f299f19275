use thiserror::Error;

/// Magos Dominus error types
#[derive(Error, Debug)]
pub enum MagosError {
    /// Configuration error (missing env, bad hook path)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Registry rejected our token (401)
    #[error("Registry auth failed for {repo}")]
    AuthError { repo: String },

    /// Manifest or repository not found (404)
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Unexpected registry response
    #[error("Registry protocol error: status {status}")]
    ProtocolError { status: u16 },

    /// Token endpoint returned a non-200
    #[error("Token exchange failed: status {status}")]
    TokenError { status: u16 },

    /// No semver tag matched the tag list
    #[error("No semver match: {0}")]
    ResolveError(String),

    /// Digest pin requested with a malformed digest
    #[error("Invalid digest {0:?}")]
    InvalidDigestError(String),

    /// Tag update requested with an empty reference
    #[error("Empty image reference")]
    EmptyRefError,

    /// Reconcile hook exceeded its deadline
    #[error("Deadline exceeded: {0}")]
    DeadlineError(String),

    /// Git host operation failed
    #[error("Git host error: {0}")]
    GitHostError(String),

    /// Malformed image reference
    #[error("Image reference error: {0}")]
    ImageRefError(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for MagosError {
    fn from(err: serde_json::Error) -> Self {
        MagosError::SerializationError(err.to_string())
    }
}

/// Result type alias for Magos Dominus operations
pub type Result<T> = std::result::Result<T, MagosError>;
