//! Storage error types.

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A storage operation failed.
    #[error("storage error: {0}")]
    Internal(String),

    /// Connection to the storage backend failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The key is invalid.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A `SCAN` match pattern could not be compiled.
    #[error("invalid pattern {pattern}: {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The command targeted a key holding a different kind of value.
    #[error("wrong type for {key}: expected {expected}, found {actual}")]
    WrongType {
        /// The key that was targeted.
        key: String,
        /// The kind the command operates on.
        expected: &'static str,
        /// The kind stored at the key.
        actual: &'static str,
    },

    /// A `SCAN` cursor that was never issued, already used or expired.
    #[error("invalid cursor: {0}")]
    InvalidCursor(u64),

    /// The command requires a key that does not exist.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// The backend answered with a reply the caller could not interpret.
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        /// Name of the command that was executed.
        command: &'static str,
        /// Debug rendering of the reply.
        reply: String,
    },
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
