//! Prelude module - commonly used types for convenient import.
//!
//! Use `use kinship_storage::prelude::*;` to import all essential types.

// Errors
pub use crate::{StorageError, StorageResult};

// Command model
pub use crate::{Command, Reply, ValueKind};

// Stores and typed access
pub use crate::{Connection, KvStore, MemoryKvStore, Pipeline};
