//! Error kinds shared across the store, identity service, and search.

use wicket_codec::CodecError;

/// Failure from a store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The main log's header or a record failed its structural or CRC-8
    /// check. Fatal when loading the main log; recoverable (as a "topic not
    /// found") when loading an archive file.
    #[error("log corruption: {0}")]
    Corruption(String),

    /// A topic or post ID referenced by the caller does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's permission mask lacks the bit required for this
    /// operation.
    #[error("permission denied: {0}")]
    Permission(String),

    /// A topic has reached the 4000-post ceiling, or the topic ID space is
    /// exhausted.
    #[error("too many: {0}")]
    TooMany(String),

    /// A cooldown window has not yet elapsed, or a UUID has already been
    /// seen.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The poster's dice roll mandates a challenge that has not been
    /// supplied.
    #[error("challenge required")]
    ChallengeRequired,

    /// The external challenge verifier rejected the supplied response.
    #[error("challenge failed")]
    ChallengeFailed,

    /// Caller-supplied content failed a size or format constraint.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The log file could not be opened, sought, or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        Self::Corruption(e.to_string())
    }
}

/// Convenience alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
