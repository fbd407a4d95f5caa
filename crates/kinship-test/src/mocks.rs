//! Mock stores for testing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kinship_storage::{Command, KvStore, MemoryKvStore, Reply, StorageError, StorageResult};

/// A store that records every command before passing it to an in-memory
/// store.
///
/// Uses `std::sync::Mutex` internally; the lock is never held across an
/// await.
#[derive(Debug, Clone, Default)]
pub struct RecordingKvStore {
    inner: Arc<MemoryKvStore>,
    log: Arc<Mutex<Vec<Command>>>,
}

impl RecordingKvStore {
    /// Create an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, command: &Command) {
        if let Ok(mut guard) = self.log.lock() {
            guard.push(command.clone());
        }
    }

    /// Every command seen so far.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.log.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Commands that may have changed the keyspace.
    #[must_use]
    pub fn writes(&self) -> Vec<Command> {
        self.commands()
            .into_iter()
            .filter(|c| !c.is_read_only())
            .collect()
    }

    /// Every key named by a write.
    #[must_use]
    pub fn written_keys(&self) -> BTreeSet<String> {
        self.writes()
            .iter()
            .flat_map(|c| c.keys().into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    /// Forget every recorded command.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.log.lock() {
            guard.clear();
        }
    }
}

#[async_trait]
impl KvStore for RecordingKvStore {
    async fn execute(&self, command: Command) -> StorageResult<Reply> {
        self.record(&command);
        self.inner.execute(command).await
    }

    async fn execute_pipeline(&self, commands: Vec<Command>) -> StorageResult<Vec<Reply>> {
        for command in &commands {
            self.record(command);
        }
        self.inner.execute_pipeline(commands).await
    }
}

/// A store that fails commands by name once armed.
///
/// Commands are passed through until [`fail_on`](Self::fail_on) names them;
/// after that they fail with [`StorageError::Connection`].
#[derive(Debug, Clone, Default)]
pub struct FailingKvStore {
    inner: Arc<MemoryKvStore>,
    failing: Arc<Mutex<BTreeSet<&'static str>>>,
}

impl FailingKvStore {
    /// Create a store that fails nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command named `name` (e.g. `"ZREM"`).
    pub fn fail_on(&self, name: &'static str) {
        if let Ok(mut guard) = self.failing.lock() {
            guard.insert(name);
        }
    }

    /// Fail every command.
    pub fn fail_all(&self) {
        self.fail_on("*");
    }

    /// Stop failing.
    pub fn heal(&self) {
        if let Ok(mut guard) = self.failing.lock() {
            guard.clear();
        }
    }

    fn check(&self, command: &Command) -> StorageResult<()> {
        let failing = self
            .failing
            .lock()
            .map(|g| g.contains("*") || g.contains(command.name()))
            .unwrap_or(false);
        if failing {
            return Err(StorageError::Connection(format!(
                "injected failure on {}",
                command.name()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FailingKvStore {
    async fn execute(&self, command: Command) -> StorageResult<Reply> {
        self.check(&command)?;
        self.inner.execute(command).await
    }

    async fn execute_pipeline(&self, commands: Vec<Command>) -> StorageResult<Vec<Reply>> {
        for command in &commands {
            self.check(command)?;
        }
        self.inner.execute_pipeline(commands).await
    }
}
