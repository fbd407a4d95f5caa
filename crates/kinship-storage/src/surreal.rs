//! Persistent key-value store backed by `SurrealKV`.
//!
//! Every logical key maps to one `SurrealKV` entry holding the JSON encoding
//! of its typed value. Each command (and each pipeline) runs inside a single
//! `SurrealKV` transaction: the touched keys are loaded into a scratch
//! [`Keyspace`], the commands are applied there, and the results are written
//! back before commit.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::command::{Command, Reply};
use crate::cursor::ScanCursors;
use crate::error::{StorageError, StorageResult};
use crate::keyspace::{Keyspace, Value};
use crate::kv::{KvStore, validate_command};
use crate::pattern;

/// Persistent key-value store backed by `SurrealKV`.
///
/// ACID-compliant, versioned, embedded LSM-tree storage.
///
/// # Example
///
/// ```rust,ignore
/// use kinship_storage::SurrealKvStore;
///
/// let store = SurrealKvStore::open("./data/kv")?;
/// store.execute(Command::SAdd { key: "team:1:members".into(), member: "u1".into() }).await?;
/// ```
pub struct SurrealKvStore {
    tree: surrealkv::Tree,
    cursors: ScanCursors,
}

impl std::fmt::Debug for SurrealKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvStore").finish_non_exhaustive()
    }
}

fn map_kv_err(e: &surrealkv::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

fn decode(bytes: &[u8]) -> StorageResult<Value> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn encode(value: &Value) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl SurrealKvStore {
    /// Open a persistent KV store at the given directory path.
    ///
    /// Creates the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the store cannot be opened.
    pub fn open(path: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let tree = surrealkv::TreeBuilder::new()
            .with_path(path.as_ref().to_path_buf())
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self {
            tree,
            cursors: ScanCursors::default(),
        })
    }

    /// Close the store, flushing any pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the flush fails.
    pub async fn close(&self) -> StorageResult<()> {
        self.tree
            .close()
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    /// Run commands against a scratch keyspace inside one transaction.
    async fn run(&self, commands: Vec<Command>) -> StorageResult<Vec<Reply>> {
        if commands.iter().any(|c| matches!(c, Command::Scan { .. })) {
            return Err(StorageError::Internal(
                "SCAN is only supported as a standalone command".to_string(),
            ));
        }
        let read_only = commands.iter().all(Command::is_read_only);
        let touched: BTreeSet<String> = commands
            .iter()
            .flat_map(|c| c.keys().into_iter().map(str::to_string))
            .collect();

        let mut scratch = Keyspace::new();
        let mut tx = if read_only {
            self.tree
                .begin_with_mode(surrealkv::Mode::ReadOnly)
                .map_err(|ref e| map_kv_err(e))?
        } else {
            self.tree.begin().map_err(|ref e| map_kv_err(e))?
        };

        for key in &touched {
            let ck = key.as_bytes().to_vec();
            if let Some(bytes) = tx.get(&ck).map_err(|ref e| map_kv_err(e))? {
                scratch.load(key.clone(), decode(&bytes)?);
            }
        }

        let replies = commands
            .into_iter()
            .map(|command| scratch.apply(command))
            .collect::<StorageResult<Vec<_>>>()?;

        if !read_only {
            for key in &touched {
                let ck = key.as_bytes().to_vec();
                match scratch.value(key) {
                    Some(value) => tx.set(&ck, &encode(value)?).map_err(|ref e| map_kv_err(e))?,
                    None => {
                        if tx.get(&ck).map_err(|ref e| map_kv_err(e))?.is_some() {
                            tx.delete(&ck).map_err(|ref e| map_kv_err(e))?;
                        }
                    },
                }
            }
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(replies)
    }

    /// One `SCAN` page over the whole tree, in key order.
    fn scan(&self, command: &Command) -> StorageResult<Reply> {
        let Command::Scan {
            cursor,
            pattern,
            count,
            kind,
        } = command
        else {
            return Err(StorageError::Internal("expected SCAN".to_string()));
        };
        let matcher = pattern.as_deref().map(pattern::compile).transpose()?;
        let count = (*count).max(1);

        // Keys never contain NUL, so `last + "\0"` is the first key after it.
        let range_start = match self.cursors.resume(*cursor)? {
            Some(last) => {
                let mut bytes = last.into_bytes();
                bytes.push(0);
                bytes
            },
            None => vec![0u8],
        };
        let range_end = vec![0xffu8];

        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let mut iter = tx
            .range(&range_start, &range_end)
            .map_err(|ref e| map_kv_err(e))?;
        iter.seek_first().map_err(|ref e| map_kv_err(e))?;

        let mut page = Vec::new();
        while iter.valid() && page.len() < count {
            let raw_key = iter.key();
            if let Ok(key) = std::str::from_utf8(&raw_key[..]) {
                page.push(key.to_string());
            }
            iter.next().map_err(|ref e| map_kv_err(e))?;
        }
        let more = iter.valid();
        drop(iter);

        let mut keys = Vec::new();
        for key in &page {
            if matcher.as_ref().is_some_and(|m| !m.is_match(key)) {
                continue;
            }
            if let Some(wanted) = kind {
                let ck = key.as_bytes().to_vec();
                let Some(bytes) = tx.get(&ck).map_err(|ref e| map_kv_err(e))? else {
                    continue;
                };
                if decode(&bytes)?.kind() != *wanted {
                    continue;
                }
            }
            keys.push(key.clone());
        }

        let cursor = match page.pop() {
            Some(last) if more => self.cursors.park(last)?,
            _ => 0,
        };
        Ok(Reply::Scan { cursor, keys })
    }
}

#[async_trait]
impl KvStore for SurrealKvStore {
    async fn execute(&self, command: Command) -> StorageResult<Reply> {
        validate_command(&command)?;
        trace!(command = command.name(), keys = ?command.keys(), "execute");
        if matches!(command, Command::Scan { .. }) {
            return self.scan(&command);
        }
        self.run(vec![command])
            .await?
            .pop()
            .ok_or_else(|| StorageError::Internal("missing reply".to_string()))
    }

    async fn execute_pipeline(&self, commands: Vec<Command>) -> StorageResult<Vec<Reply>> {
        commands.iter().try_for_each(validate_command)?;
        debug!(commands = commands.len(), "execute pipeline");
        self.run(commands).await
    }
}
