//! Identifier timeline: every live identifier of a model, scored by time.

use tracing::{debug, info};

use crate::error::KinshipResult;
use crate::model::ModelDescriptor;
use crate::repository::Repository;
use crate::score::timestamp_score;

/// The sorted set `<model>:instances`.
#[derive(Debug, Clone)]
pub struct Timeline {
    repo: Repository,
    model: String,
    key: String,
    updated_field: String,
    created_field: String,
}

impl Timeline {
    pub(crate) fn new(repo: Repository, desc: &ModelDescriptor) -> Self {
        let key = repo.keys().timeline_key(&desc.name);
        Self {
            repo,
            model: desc.name.clone(),
            key,
            updated_field: desc.updated_field.clone(),
            created_field: desc.created_field.clone(),
        }
    }

    /// Storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Add or rescore an identifier; `true` if it was new.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn add(&self, identifier: &str, score: f64) -> KinshipResult<bool> {
        Ok(self.repo.connection().zadd(&self.key, score, identifier).await?)
    }

    /// Remove an identifier; `true` if it was present.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn remove(&self, identifier: &str) -> KinshipResult<bool> {
        Ok(self.repo.connection().zrem(&self.key, identifier).await?)
    }

    /// Every identifier, oldest first.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn members(&self) -> KinshipResult<Vec<String>> {
        Ok(self.repo.connection().zrange(&self.key, 0, -1).await?)
    }

    /// Every `(identifier, score)` pair, oldest first.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn entries(&self) -> KinshipResult<Vec<(String, f64)>> {
        Ok(self
            .repo
            .connection()
            .zrange_with_scores(&self.key, 0, -1)
            .await?)
    }

    /// Score of one identifier.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn score(&self, identifier: &str) -> KinshipResult<Option<f64>> {
        Ok(self.repo.connection().zscore(&self.key, identifier).await?)
    }

    /// Number of identifiers.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn len(&self) -> KinshipResult<usize> {
        Ok(self.repo.connection().zcard(&self.key).await?)
    }

    /// Whether the timeline is empty.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn is_empty(&self) -> KinshipResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Rebuild from the keyspace and swap the result in, returning the new
    /// entry count.
    ///
    /// The replacement is built under a side key and renamed over the live
    /// timeline, so readers see either the old or the new timeline.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged. A failed rebuild leaves the live
    /// timeline untouched.
    pub async fn rebuild(&self, batch_size: usize) -> KinshipResult<usize> {
        let ids = self.repo.live_identifiers(&self.model, batch_size).await?;
        let temp = self.repo.keys().temp_key(&self.key);
        let mut pipe = self.repo.connection().pipeline();
        let mut count: usize = 0;
        for id in &ids {
            let Some(record) = self.repo.records().load(&self.model, id).await? else {
                continue;
            };
            let score = timestamp_score(&record.fields, &self.updated_field, &self.created_field);
            pipe.zadd(temp.clone(), score, id.clone());
            count = count.saturating_add(1);
        }
        if count == 0 {
            pipe.del(self.key.clone());
        } else {
            pipe.rename(temp, self.key.clone());
        }
        debug!(model = %self.model, commands = pipe.len(), "timeline rebuild pipeline");
        pipe.execute_in_batches(batch_size).await?;
        info!(model = %self.model, entries = count, "timeline rebuilt");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kinship_config::Config;
    use kinship_storage::MemoryKvStore;

    use super::*;
    use crate::record::Record;

    async fn seeded() -> (Repository, ModelDescriptor) {
        let repo = Repository::new(Arc::new(MemoryKvStore::new()), Config::default());
        let desc = ModelDescriptor::builder("user").build().unwrap();
        for (id, created) in [("u1", "30"), ("u2", "10"), ("x:y", "20")] {
            repo.save(&desc, &Record::new("user", id).with_field("created", created))
                .await
                .unwrap();
        }
        (repo, desc)
    }

    #[tokio::test]
    async fn test_members_ordered_by_score() {
        let (repo, desc) = seeded().await;
        let timeline = repo.timeline(&desc);
        assert_eq!(timeline.members().await.unwrap(), vec!["u2", "x:y", "u1"]);
        assert_eq!(timeline.score("u1").await.unwrap(), Some(30.0));
    }

    #[tokio::test]
    async fn test_rebuild_restores_dropped_entries() {
        let (repo, desc) = seeded().await;
        let timeline = repo.timeline(&desc);
        timeline.remove("x:y").await.unwrap();
        timeline.add("ghost", 1.0).await.unwrap();

        assert_eq!(timeline.rebuild(2).await.unwrap(), 3);
        assert_eq!(timeline.members().await.unwrap(), vec!["u2", "x:y", "u1"]);
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let (repo, desc) = seeded().await;
        let timeline = repo.timeline(&desc);
        let first = timeline.rebuild(100).await.unwrap();
        let entries = timeline.entries().await.unwrap();
        let second = timeline.rebuild(100).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(entries, timeline.entries().await.unwrap());
    }

    #[tokio::test]
    async fn test_rebuild_of_empty_model_clears_timeline() {
        let repo = Repository::new(Arc::new(MemoryKvStore::new()), Config::default());
        let desc = ModelDescriptor::builder("user").build().unwrap();
        let timeline = repo.timeline(&desc);
        timeline.add("ghost", 1.0).await.unwrap();
        assert_eq!(timeline.rebuild(10).await.unwrap(), 0);
        assert!(timeline.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_rebuild_leaves_no_side_keys() {
        let (repo, desc) = seeded().await;
        repo.timeline(&desc).rebuild(1).await.unwrap();
        let leftovers = repo
            .connection()
            .scan_all("user:instances:*", None, 10)
            .await
            .unwrap();
        assert!(leftovers.is_empty());
    }
}
