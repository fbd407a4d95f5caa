//! Key-value store trait and the in-memory implementation.
//!
//! The [`KvStore`] trait is the whole boundary between Kinship and the
//! store: single commands through [`execute`](KvStore::execute) and ordered
//! batches through [`execute_pipeline`](KvStore::execute_pipeline).
//! Implementations:
//!
//! - **In-memory** (always available): For tests and ephemeral data
//! - **`SurrealKV`** (behind `kv` feature): Persistent, embedded
//!
//! # Pipelines
//!
//! A pipeline is ordered best-effort batching, not a transaction. If a
//! command fails the remaining commands are skipped and the error is
//! returned; commands already applied stay applied.

use std::sync::RwLock;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::command::{Command, Reply};
use crate::error::{StorageError, StorageResult};
use crate::keyspace::Keyspace;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a key is safe for storage.
///
/// Keys must be non-empty and must not contain the null byte.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(())
}

/// Validate every key a command names.
pub(crate) fn validate_command(command: &Command) -> StorageResult<()> {
    command.keys().into_iter().try_for_each(validate_key)
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Key-value store trait.
///
/// Implementations must be safe to share between concurrent callers.
/// Timeouts and retries belong to the implementation (or its caller);
/// failures surface as [`StorageError`] unchanged.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Execute a single command.
    async fn execute(&self, command: Command) -> StorageResult<Reply>;

    /// Execute commands in order, returning one reply per command.
    async fn execute_pipeline(&self, commands: Vec<Command>) -> StorageResult<Vec<Reply>>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (always available)
// ---------------------------------------------------------------------------

/// In-memory key-value store for tests and ephemeral data.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: RwLock<Keyspace>,
}

impl MemoryKvStore {
    /// Create a new empty in-memory KV store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(Keyspace::new()),
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn execute(&self, command: Command) -> StorageResult<Reply> {
        validate_command(&command)?;
        trace!(command = command.name(), keys = ?command.keys(), "execute");
        if command.is_read_only() {
            let data = self
                .data
                .read()
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            data.query(&command)
        } else {
            let mut data = self
                .data
                .write()
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            data.apply(command)
        }
    }

    async fn execute_pipeline(&self, commands: Vec<Command>) -> StorageResult<Vec<Reply>> {
        commands.iter().try_for_each(validate_command)?;
        debug!(commands = commands.len(), "execute pipeline");
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        commands
            .into_iter()
            .map(|command| data.apply(command))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sadd(key: &str, member: &str) -> Command {
        Command::SAdd {
            key: key.into(),
            member: member.into(),
        }
    }

    #[tokio::test]
    async fn test_memory_set_and_get() {
        let store = MemoryKvStore::new();
        store
            .execute(Command::Set {
                key: "k".into(),
                value: "v".into(),
            })
            .await
            .unwrap();
        let val = store
            .execute(Command::Get { key: "k".into() })
            .await
            .unwrap();
        assert_eq!(val, Reply::Bulk("v".into()));
    }

    #[tokio::test]
    async fn test_memory_get_missing() {
        let store = MemoryKvStore::new();
        let val = store
            .execute(Command::Get {
                key: "missing".into(),
            })
            .await
            .unwrap();
        assert_eq!(val, Reply::Nil);
    }

    #[tokio::test]
    async fn test_memory_pipeline_replies_in_order() {
        let store = MemoryKvStore::new();
        let replies = store
            .execute_pipeline(vec![
                sadd("s", "a"),
                sadd("s", "a"),
                Command::SCard { key: "s".into() },
            ])
            .await
            .unwrap();
        assert_eq!(replies, vec![Reply::Int(1), Reply::Int(0), Reply::Int(1)]);
    }

    #[tokio::test]
    async fn test_memory_pipeline_stops_at_first_error() {
        let store = MemoryKvStore::new();
        let result = store
            .execute_pipeline(vec![
                sadd("s", "a"),
                Command::HSet {
                    key: "s".into(),
                    field: "f".into(),
                    value: "v".into(),
                },
                sadd("t", "b"),
            ])
            .await;
        assert!(result.is_err());
        // The first command stays applied; the one after the failure never ran.
        let s = store
            .execute(Command::SCard { key: "s".into() })
            .await
            .unwrap();
        assert_eq!(s, Reply::Int(1));
        let t = store
            .execute(Command::Exists { key: "t".into() })
            .await
            .unwrap();
        assert_eq!(t, Reply::Int(0));
    }

    #[tokio::test]
    async fn test_memory_rejects_empty_key() {
        let store = MemoryKvStore::new();
        assert!(
            store
                .execute(Command::Get { key: String::new() })
                .await
                .is_err()
        );
    }

    #[test]
    fn test_validate_key_rejects_null_byte() {
        assert!(validate_key("k\0bad").is_err());
    }
}
