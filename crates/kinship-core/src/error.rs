//! Error types for the relationship layer.
//!
//! Data-consistency problems are never errors: the audit engine reports
//! them as findings. Errors are reserved for write-path conflicts, misuse
//! of the API, and failures of the underlying store.

use kinship_storage::StorageError;
use thiserror::Error;

/// Errors raised by the relationship layer.
#[derive(Debug, Error)]
pub enum KinshipError {
    /// A unique index already maps the value to a different identifier.
    #[error("{model}.{field} = {value:?} already belongs to {existing:?} (attempted by {attempted:?})")]
    RecordExists {
        /// Model type.
        model: String,
        /// Indexed field.
        field: String,
        /// Conflicting field value.
        value: String,
        /// Identifier currently holding the value.
        existing: String,
        /// Identifier that tried to claim it.
        attempted: String,
    },

    /// An operation cannot run inside the current context.
    #[error("{operation} is not supported inside a {context}")]
    OperationUnsupportedInContext {
        /// The rejected operation.
        operation: &'static str,
        /// Where it was attempted.
        context: &'static str,
    },

    /// A caller-supplied argument is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No index with this name is declared on the model.
    #[error("model {model} declares no index on {name}")]
    UnknownIndex {
        /// Model type.
        model: String,
        /// Requested field or index name.
        name: String,
    },

    /// No participation with this collection is declared on the model.
    #[error("model {model} declares no participation in {collection}")]
    UnknownParticipation {
        /// Model type.
        model: String,
        /// Requested collection.
        collection: String,
    },

    /// The key-value store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for relationship-layer operations.
pub type KinshipResult<T> = Result<T, KinshipError>;
