//! Multi index: field value → set of identifiers.
//!
//! Each value gets its own set at `<base>:<value>`, where the base is
//! `<model>:<field>_index` for global indexes and
//! `<parent_type>:<parent_id>:<model>_<field>_index` for scoped ones.

use std::collections::{BTreeMap, BTreeSet};

use kinship_storage::ValueKind;
use tracing::info;

use crate::error::{KinshipError, KinshipResult};
use crate::model::{IndexDecl, Scope};
use crate::record::Record;
use crate::repository::Repository;

/// Handle to one declared multi index.
#[derive(Debug, Clone)]
pub struct MultiIndex {
    repo: Repository,
    model: String,
    decl: IndexDecl,
    parent_id: Option<String>,
}

impl MultiIndex {
    pub(crate) fn new(repo: Repository, model: &str, decl: IndexDecl) -> Self {
        Self {
            repo,
            model: model.to_string(),
            decl,
            parent_id: None,
        }
    }

    /// The declaration this handle is bound to.
    #[must_use]
    pub fn decl(&self) -> &IndexDecl {
        &self.decl
    }

    /// Bind to one parent instance.
    #[must_use]
    pub fn within(&self, parent_id: &str) -> Self {
        Self {
            parent_id: Some(parent_id.to_string()),
            ..self.clone()
        }
    }

    /// Key prefix shared by every value set.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for a scoped index not yet
    /// bound with [`within`](Self::within).
    pub fn base_key(&self) -> KinshipResult<String> {
        let keys = self.repo.keys();
        match (&self.decl.scope, &self.parent_id) {
            (Scope::Global, _) => Ok(keys.multi_index_base(&self.model, &self.decl.name)),
            (Scope::Within(parent_type), Some(parent_id)) => {
                Ok(keys.scoped_key(parent_type, parent_id, &self.decl.name))
            },
            (Scope::Within(parent_type), None) => Err(KinshipError::InvalidArgument(format!(
                "{}.{} is indexed within {parent_type}; bind a parent with within()",
                self.model, self.decl.field
            ))),
        }
    }

    /// Key of the set holding identifiers for `value`.
    ///
    /// # Errors
    ///
    /// See [`base_key`](Self::base_key).
    pub fn value_key(&self, value: &str) -> KinshipResult<String> {
        Ok(self.repo.keys().with_value(&self.base_key()?, value))
    }

    /// Add `identifier` under `value`; `true` if it was new.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn add(&self, value: &str, identifier: &str) -> KinshipResult<bool> {
        Ok(self
            .repo
            .connection()
            .sadd(&self.value_key(value)?, identifier)
            .await?)
    }

    /// Remove `identifier` from `value`; `true` if it was present.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn remove(&self, value: &str, identifier: &str) -> KinshipResult<bool> {
        Ok(self
            .repo
            .connection()
            .srem(&self.value_key(value)?, identifier)
            .await?)
    }

    /// Every identifier under `value`.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn members(&self, value: &str) -> KinshipResult<Vec<String>> {
        Ok(self
            .repo
            .connection()
            .smembers(&self.value_key(value)?)
            .await?)
    }

    /// Whether `identifier` is indexed under `value`.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn contains(&self, value: &str, identifier: &str) -> KinshipResult<bool> {
        Ok(self
            .repo
            .connection()
            .sismember(&self.value_key(value)?, identifier)
            .await?)
    }

    /// Up to `count` distinct identifiers under `value`, chosen at random.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn sample(&self, value: &str, count: usize) -> KinshipResult<Vec<String>> {
        Ok(self
            .repo
            .connection()
            .srandmember(&self.value_key(value)?, count)
            .await?)
    }

    /// Load every record indexed under `value`, skipping dangling entries
    /// and records that no longer hold `value`.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn resolve(&self, value: &str) -> KinshipResult<Vec<Record>> {
        let records = self.repo.records();
        let mut out = Vec::new();
        for id in self.members(value).await? {
            if let Some(record) = records.load(&self.model, &id).await?
                && records.field_value(&record, &self.decl.field) == Some(value)
            {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Every value that currently has a set, scanning `batch_size` keys
    /// per call.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn values(&self, batch_size: usize) -> KinshipResult<Vec<String>> {
        let base = self.base_key()?;
        let keys = self.repo.keys();
        let found = self
            .repo
            .connection()
            .scan_all(
                &keys.values_pattern(&base),
                Some(ValueKind::Set),
                batch_size,
            )
            .await?;
        Ok(found
            .iter()
            .filter_map(|key| keys.value_from_key(&base, key))
            .collect())
    }

    /// Recompute a global index from live records and swap each value set
    /// in, returning the number of memberships written.
    ///
    /// Value sets with no live holder are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for a scoped index and
    /// storage errors unchanged.
    pub async fn rebuild(&self, batch_size: usize) -> KinshipResult<usize> {
        if !self.decl.is_global() {
            return Err(KinshipError::InvalidArgument(format!(
                "{}.{} is scoped ({}); only global indexes can be rebuilt",
                self.model, self.decl.field, self.decl.scope
            )));
        }
        let records = self.repo.records();
        let mut live: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for id in self.repo.live_identifiers(&self.model, batch_size).await? {
            let Some(record) = records.load(&self.model, &id).await? else {
                continue;
            };
            if let Some(value) = records.field_value(&record, &self.decl.field) {
                live.entry(value.to_string()).or_default().insert(id);
            }
        }

        let existing = self.values(batch_size).await?;
        let mut pipe = self.repo.connection().pipeline();
        let mut memberships: usize = 0;
        for (value, ids) in &live {
            let key = self.value_key(value)?;
            let temp = self.repo.keys().temp_key(&key);
            for id in ids {
                pipe.sadd(temp.clone(), id.clone());
            }
            pipe.rename(temp, key);
            memberships = memberships.saturating_add(ids.len());
        }
        for value in existing.iter().filter(|v| !live.contains_key(*v)) {
            pipe.del(self.value_key(value)?);
        }
        pipe.execute_in_batches(batch_size).await?;
        info!(
            model = %self.model,
            index = %self.decl.name,
            values = live.len(),
            memberships,
            "multi index rebuilt"
        );
        Ok(memberships)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kinship_config::Config;
    use kinship_storage::MemoryKvStore;

    use super::*;
    use crate::model::ModelDescriptor;

    async fn setup() -> (Repository, ModelDescriptor) {
        let repo = Repository::new(Arc::new(MemoryKvStore::new()), Config::default());
        let desc = ModelDescriptor::builder("user")
            .multi_index("role")
            .multi_index_within("skill", "team")
            .build()
            .unwrap();
        for (id, role) in [("u1", "admin"), ("u2", "admin"), ("u3", "guest")] {
            repo.save(&desc, &Record::new("user", id).with_field("role", role))
                .await
                .unwrap();
        }
        (repo, desc)
    }

    #[tokio::test]
    async fn test_members_and_values() {
        let (repo, desc) = setup().await;
        let index = repo.multi(&desc, "role").unwrap();
        let mut admins = index.members("admin").await.unwrap();
        admins.sort();
        assert_eq!(admins, vec!["u1", "u2"]);
        assert!(index.contains("guest", "u3").await.unwrap());
        assert_eq!(index.values(10).await.unwrap(), vec!["admin", "guest"]);
    }

    #[tokio::test]
    async fn test_sample_is_bounded() {
        let (repo, desc) = setup().await;
        let index = repo.multi(&desc, "role").unwrap();
        let sample = index.sample("admin", 1).await.unwrap();
        assert_eq!(sample.len(), 1);
        assert!(["u1", "u2"].contains(&sample[0].as_str()));
    }

    #[tokio::test]
    async fn test_resolve_skips_dangling() {
        let (repo, desc) = setup().await;
        repo.connection().del(&["user:u1:object"]).await.unwrap();
        let index = repo.multi(&desc, "role").unwrap();
        let resolved = index.resolve("admin").await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].identifier, "u2");
    }

    #[tokio::test]
    async fn test_scoped_values_isolated() {
        let (repo, desc) = setup().await;
        let index = repo.multi(&desc, "skill").unwrap();
        index.within("t1").add("rust", "u1").await.unwrap();
        index.within("t2").add("rust", "u2").await.unwrap();
        assert_eq!(index.within("t1").members("rust").await.unwrap(), vec!["u1"]);
        assert_eq!(
            index.within("t1").value_key("rust").unwrap(),
            "team:t1:user_skill_index:rust"
        );
        assert!(index.members("rust").await.is_err());
    }

    #[tokio::test]
    async fn test_rebuild_drops_orphan_values() {
        let (repo, desc) = setup().await;
        let index = repo.multi(&desc, "role").unwrap();
        index.add("ghost", "u9").await.unwrap();
        index.remove("admin", "u2").await.unwrap();
        index.add("guest", "u1").await.unwrap();

        assert_eq!(index.rebuild(2).await.unwrap(), 3);
        assert_eq!(index.values(10).await.unwrap(), vec!["admin", "guest"]);
        let mut admins = index.members("admin").await.unwrap();
        admins.sort();
        assert_eq!(admins, vec!["u1", "u2"]);
        assert_eq!(index.members("guest").await.unwrap(), vec!["u3"]);
    }
}
