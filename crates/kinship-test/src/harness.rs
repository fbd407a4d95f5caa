//! Test harness helpers.

use std::io::Write;
use std::sync::Arc;

use kinship_config::Config;
use kinship_core::{ModelDescriptor, Repository};
use kinship_storage::{KvStore, MemoryKvStore};
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;

use crate::fixtures::{TEAM, test_config, user_descriptor, user_record};

/// Set up test logging with the given filter.
///
/// Safe to call from every test; only the first call installs a
/// subscriber.
pub fn setup_test_logging(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_test_writer()
        .try_init();
}

/// Set up test logging with default filter (warn level).
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}

/// Write `content` to a temporary `.toml` file.
///
/// # Panics
///
/// Panics if the file cannot be created or written.
#[must_use]
pub fn test_config_file(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write to temp file");
    file.flush().expect("Failed to flush temp file");
    file
}

/// A repository over a fresh in-memory store, with the user fixture
/// descriptor.
#[derive(Debug, Clone)]
pub struct TestRepo {
    /// The repository under test.
    pub repo: Repository,
    /// The user descriptor.
    pub user: ModelDescriptor,
}

impl TestRepo {
    /// Default configuration, in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Custom configuration, in-memory store.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self::with_store(Arc::new(MemoryKvStore::new()), config)
    }

    /// Custom store, e.g. one of the mocks.
    #[must_use]
    pub fn with_store(store: Arc<dyn KvStore>, config: Config) -> Self {
        setup_test_logging_default();
        Self {
            repo: Repository::new(store, config),
            user: user_descriptor(),
        }
    }

    /// Use a different descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, desc: ModelDescriptor) -> Self {
        self.user = desc;
        self
    }

    /// Save one fixture user per id; `created` counts up from 1000 in
    /// steps of 10.
    ///
    /// # Panics
    ///
    /// Panics if a save fails.
    pub async fn seed_users(&self, ids: &[&str]) {
        let mut created = 1000.0;
        for id in ids {
            self.repo
                .save(&self.user, &user_record(id, created))
                .await
                .expect("seed save failed");
            created += 10.0;
        }
    }

    /// Add `member` to `team`'s `collection`.
    ///
    /// # Panics
    ///
    /// Panics if the participation is not declared or the write fails.
    pub async fn join(&self, collection: &str, team: &str, member: &str) {
        self.repo
            .participation(&self.user, TEAM, collection)
            .expect("participation declared")
            .add(team, member, None)
            .await
            .expect("join failed");
    }

    /// Delete a user's primary key directly, leaving every derived
    /// structure behind.
    ///
    /// # Panics
    ///
    /// Panics if the delete fails.
    pub async fn delete_object(&self, id: &str) {
        let key = self.repo.keys().object_key(&self.user.name, id);
        self.repo
            .connection()
            .del(&[key.as_str()])
            .await
            .expect("delete failed");
    }

    /// Remove a user from the timeline directly.
    ///
    /// # Panics
    ///
    /// Panics if the write fails.
    pub async fn drop_from_timeline(&self, id: &str) {
        self.repo
            .timeline(&self.user)
            .remove(id)
            .await
            .expect("timeline remove failed");
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_repo_is_healthy() {
        let harness = TestRepo::new();
        harness.seed_users(&["a", "b"]).await;
        harness.join("members", "t1", "a").await;
        let report = harness.repo.audit(&harness.user).await.unwrap();
        assert!(report.healthy(), "{report}");
        assert_eq!(report.instances.timeline_count, 2);
    }

    #[tokio::test]
    async fn test_delete_object_leaves_timeline() {
        let harness = TestRepo::new();
        harness.seed_users(&["a"]).await;
        harness.delete_object("a").await;
        assert_eq!(
            harness.repo.timeline(&harness.user).members().await.unwrap(),
            vec!["a"]
        );
    }

    #[test]
    fn test_config_file_has_toml_suffix() {
        let file = test_config_file("[audit]\nbatch_size = 7\n");
        assert!(file.path().to_string_lossy().ends_with(".toml"));
    }
}
