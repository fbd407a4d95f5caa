//! The repository: write path and entry point to every relationship handle.
//!
//! Index and participation writes issued by [`Repository::save`] are not
//! atomic with the record write. A crash between the two, or two writers
//! racing past the same uniqueness guard, leaves drift that the audit and
//! repair engines detect and heal.

use std::collections::BTreeSet;
use std::sync::Arc;

use kinship_config::Config;
use kinship_storage::{Command, Connection, KvStore, Pipeline, Reply, ValueKind};
use tracing::{debug, warn};

use crate::audit::{AuditEngine, AuditOptions};
use crate::error::{KinshipError, KinshipResult};
use crate::keys::KeySchema;
use crate::model::ModelDescriptor;
use crate::multi_index::MultiIndex;
use crate::participation::Participation;
use crate::record::{HashRecords, Record, RecordLayer};
use crate::repair::{RepairEngine, RepairOptions, RepairSummary};
use crate::report::AuditReport;
use crate::score::timestamp_score;
use crate::timeline::Timeline;
use crate::unique_index::UniqueIndex;

struct Inner {
    conn: Connection,
    keys: KeySchema,
    records: Arc<dyn RecordLayer>,
    config: Config,
}

/// Shared access to the store, the key layout and the record layer.
///
/// Cloning is cheap; every handle keeps its own clone.
#[derive(Clone)]
pub struct Repository {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("keys", &self.inner.keys)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Create a repository storing records as hashes.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, config: Config) -> Self {
        let conn = Connection::new(store);
        let keys = KeySchema::from(&config.keys);
        let records = Arc::new(HashRecords::new(conn.clone(), keys.clone()));
        Self::with_records(conn, config, records)
    }

    /// Create a repository over a custom record layer.
    #[must_use]
    pub fn with_records(conn: Connection, config: Config, records: Arc<dyn RecordLayer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys: KeySchema::from(&config.keys),
                conn,
                records,
                config,
            }),
        }
    }

    /// The store connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.conn
    }

    /// The key layout.
    #[must_use]
    pub fn keys(&self) -> &KeySchema {
        &self.inner.keys
    }

    /// The record layer.
    #[must_use]
    pub fn records(&self) -> &Arc<dyn RecordLayer> {
        &self.inner.records
    }

    /// The configuration this repository was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // -- Handles --

    /// The identifier timeline of a model.
    #[must_use]
    pub fn timeline(&self, desc: &ModelDescriptor) -> Timeline {
        Timeline::new(self.clone(), desc)
    }

    /// The unique index declared on `field`.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::UnknownIndex`] if no unique index is declared.
    pub fn unique(&self, desc: &ModelDescriptor, field: &str) -> KinshipResult<UniqueIndex> {
        let decl = desc
            .unique_index(field)
            .ok_or_else(|| KinshipError::UnknownIndex {
                model: desc.name.clone(),
                name: field.to_string(),
            })?;
        Ok(UniqueIndex::new(self.clone(), &desc.name, decl.clone()))
    }

    /// The multi index declared on `field`.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::UnknownIndex`] if no multi index is declared.
    pub fn multi(&self, desc: &ModelDescriptor, field: &str) -> KinshipResult<MultiIndex> {
        let decl = desc
            .multi_index(field)
            .ok_or_else(|| KinshipError::UnknownIndex {
                model: desc.name.clone(),
                name: field.to_string(),
            })?;
        Ok(MultiIndex::new(self.clone(), &desc.name, decl.clone()))
    }

    /// The participation of `desc` in `owner_type`'s `collection`.
    ///
    /// For class participations `owner_type` is the model itself.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::UnknownParticipation`] if it is not declared.
    pub fn participation(
        &self,
        desc: &ModelDescriptor,
        owner_type: &str,
        collection: &str,
    ) -> KinshipResult<Participation> {
        let decl = desc.participation(owner_type, collection).ok_or_else(|| {
            KinshipError::UnknownParticipation {
                model: desc.name.clone(),
                collection: format!("{owner_type}.{collection}"),
            }
        })?;
        Ok(Participation::new(self.clone(), desc, decl.clone()))
    }

    // -- Write path --

    /// Save a record and maintain its global indexes, timeline entry and
    /// class participations.
    ///
    /// Every global unique guard runs before anything is written. Index
    /// entries for values the record no longer holds are removed.
    /// Instance-scoped indexes and instance participations are maintained
    /// through their handles.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::RecordExists`] when a unique value belongs to
    /// another identifier, [`KinshipError::InvalidArgument`] for a record of
    /// another model or an empty identifier, and storage errors unchanged.
    pub async fn save(&self, desc: &ModelDescriptor, record: &Record) -> KinshipResult<()> {
        self.check_record(desc, record)?;
        let records = self.records();
        let id = records.identifier_of(record);
        let previous = records.load(&desc.name, id).await?;

        let uniques = desc
            .unique_indexes
            .iter()
            .filter(|d| d.is_global())
            .map(|d| UniqueIndex::new(self.clone(), &desc.name, d.clone()))
            .collect::<Vec<_>>();
        let multis = desc
            .multi_indexes
            .iter()
            .filter(|d| d.is_global())
            .map(|d| MultiIndex::new(self.clone(), &desc.name, d.clone()))
            .collect::<Vec<_>>();

        for index in &uniques {
            if let Some(value) = records.field_value(record, &index.decl().field) {
                index.guard(value, id).await?;
            }
        }

        let object_key = self.keys().object_key(&desc.name, id);
        let mut pipe = self.connection().pipeline();

        if let Some(old) = &previous {
            for index in &uniques {
                let field = &index.decl().field;
                if let Some(old_value) = records.field_value(old, field)
                    && records.field_value(record, field) != Some(old_value)
                    && index.get(old_value).await?.as_deref() == Some(id)
                {
                    pipe.hdel(index.key()?, old_value);
                }
            }
            for index in &multis {
                let field = &index.decl().field;
                if let Some(old_value) = records.field_value(old, field)
                    && records.field_value(record, field) != Some(old_value)
                {
                    pipe.srem(index.value_key(old_value)?, id);
                }
            }
            for field in old.fields.keys() {
                if !record.fields.contains_key(field) {
                    pipe.hdel(object_key.clone(), field.clone());
                }
            }
        }

        for (field, value) in &record.fields {
            pipe.hset(object_key.clone(), field.clone(), value.clone());
        }
        if record.fields.is_empty() {
            warn!(model = %desc.name, id, "saving record without fields");
        }
        let score = timestamp_score(&record.fields, &desc.updated_field, &desc.created_field);
        pipe.zadd(self.keys().timeline_key(&desc.name), score, id);

        for index in &uniques {
            if let Some(value) = records.field_value(record, &index.decl().field) {
                pipe.hset(index.key()?, value, id);
            }
        }
        for index in &multis {
            if let Some(value) = records.field_value(record, &index.decl().field) {
                pipe.sadd(index.value_key(value)?, id);
            }
        }

        debug!(model = %desc.name, id, commands = pipe.len(), "save");
        pipe.execute().await?;

        for decl in desc.class_participations() {
            Participation::new(self.clone(), desc, decl.clone())
                .class_collection()?
                .add(id, Some(score))
                .await?;
        }
        Ok(())
    }

    /// Change one field of an existing record, moving its index entries.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] if the record does not
    /// exist, plus everything [`save`](Self::save) returns.
    pub async fn update_field(
        &self,
        desc: &ModelDescriptor,
        identifier: &str,
        field: &str,
        value: &str,
    ) -> KinshipResult<()> {
        let Some(mut record) = self.records().load(&desc.name, identifier).await? else {
            return Err(KinshipError::InvalidArgument(format!(
                "{} {identifier:?} does not exist",
                desc.name
            )));
        };
        record.fields.insert(field.to_string(), value.to_string());
        self.save(desc, &record).await
    }

    /// Delete a record's primary key and its timeline entry.
    ///
    /// Index entries and participation memberships are left in place.
    /// Returns whether the record existed.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn delete(&self, desc: &ModelDescriptor, identifier: &str) -> KinshipResult<bool> {
        let mut pipe = self.connection().pipeline();
        pipe.del(self.keys().object_key(&desc.name, identifier));
        pipe.zrem(self.keys().timeline_key(&desc.name), identifier);
        let replies = pipe.execute().await?;
        Ok(matches!(replies.first(), Some(Reply::Int(n)) if *n > 0))
    }

    /// Start a raw command batch.
    #[must_use]
    pub fn batch(&self) -> Batch {
        Batch {
            pipeline: self.connection().pipeline(),
        }
    }

    // -- Audit and repair --

    /// An audit engine using this repository's audit settings.
    #[must_use]
    pub fn auditor(&self) -> AuditEngine {
        AuditEngine::new(self.clone(), AuditOptions::from(&self.config().audit))
    }

    /// A repair engine using this repository's audit and repair settings.
    #[must_use]
    pub fn repairer(&self) -> RepairEngine {
        RepairEngine::new(
            self.clone(),
            AuditOptions::from(&self.config().audit),
            RepairOptions::from(&self.config().repair),
        )
    }

    /// Audit one model.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn audit(&self, desc: &ModelDescriptor) -> KinshipResult<AuditReport> {
        self.auditor().audit(desc).await
    }

    /// Audit one model and log its health.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn health_check(&self, desc: &ModelDescriptor) -> KinshipResult<AuditReport> {
        self.auditor().health_check(desc).await
    }

    /// Repair one model, reusing `audit` when given.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged; writes applied before the failure
    /// stay applied.
    pub async fn repair(
        &self,
        desc: &ModelDescriptor,
        audit: Option<AuditReport>,
    ) -> KinshipResult<RepairSummary> {
        self.repairer().repair_all(desc, audit).await
    }

    // -- Internal --

    /// Identifiers of every live record of `model`, in key order.
    pub(crate) async fn live_identifiers(
        &self,
        model: &str,
        batch_size: usize,
    ) -> KinshipResult<Vec<String>> {
        let keys = self
            .connection()
            .scan_all(
                &self.keys().object_pattern(model),
                Some(ValueKind::Hash),
                batch_size,
            )
            .await?;
        let ids: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| self.keys().identifier_from_key(model, key))
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn check_record(&self, desc: &ModelDescriptor, record: &Record) -> KinshipResult<()> {
        if record.model != desc.name {
            return Err(KinshipError::InvalidArgument(format!(
                "record of {} saved with the {} descriptor",
                record.model, desc.name
            )));
        }
        let id = self.records().identifier_of(record);
        if id.is_empty() {
            return Err(KinshipError::InvalidArgument(
                "identifier must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// A queue of raw commands executed as one pipeline.
///
/// Record-level operations need to read before they write and cannot run
/// inside a batch; they are rejected instead of being silently split out.
#[derive(Debug)]
pub struct Batch {
    pipeline: Pipeline,
}

impl Batch {
    /// Queue a raw command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.pipeline.push(command);
        self
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipeline.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipeline.is_empty()
    }

    /// Always fails: saving is not available inside a batch.
    ///
    /// # Errors
    ///
    /// Always returns [`KinshipError::OperationUnsupportedInContext`].
    pub fn save(&mut self, _desc: &ModelDescriptor, _record: &Record) -> KinshipResult<()> {
        Err(KinshipError::OperationUnsupportedInContext {
            operation: "save",
            context: "batch",
        })
    }

    /// Execute the queued commands.
    ///
    /// # Errors
    ///
    /// Returns the first storage error; earlier commands stay applied.
    pub async fn execute(self) -> KinshipResult<Vec<Reply>> {
        Ok(self.pipeline.execute().await?)
    }
}

#[cfg(test)]
mod tests {
    use kinship_storage::MemoryKvStore;

    use super::*;
    use crate::model::CollectionKind;

    fn repo() -> Repository {
        Repository::new(Arc::new(MemoryKvStore::new()), Config::default())
    }

    fn user() -> ModelDescriptor {
        ModelDescriptor::builder("user")
            .unique_index("email")
            .multi_index("role")
            .class_participates_in("everyone", CollectionKind::Set)
            .build()
            .unwrap()
    }

    fn record(id: &str, email: &str, role: &str) -> Record {
        Record::new("user", id)
            .with_field("email", email)
            .with_field("role", role)
            .with_field("created", "100")
    }

    #[tokio::test]
    async fn test_save_writes_every_structure() {
        let repo = repo();
        let desc = user();
        repo.save(&desc, &record("u1", "a@x", "admin")).await.unwrap();

        let conn = repo.connection();
        assert!(conn.exists("user:u1:object").await.unwrap());
        assert_eq!(conn.zscore("user:instances", "u1").await.unwrap(), Some(100.0));
        assert_eq!(
            conn.hget("user:email_index", "a@x").await.unwrap().as_deref(),
            Some("u1")
        );
        assert!(conn.sismember("user:role_index:admin", "u1").await.unwrap());
        assert!(conn.sismember("user:everyone", "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_second_owner_of_unique_value_rejected() {
        let repo = repo();
        let desc = user();
        repo.save(&desc, &record("u1", "a@x", "admin")).await.unwrap();
        let err = repo
            .save(&desc, &record("u2", "a@x", "admin"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KinshipError::RecordExists { ref existing, ref attempted, .. }
                if existing == "u1" && attempted == "u2"
        ));
        assert!(!repo.connection().exists("user:u2:object").await.unwrap());
    }

    #[tokio::test]
    async fn test_resave_same_owner_is_idempotent() {
        let repo = repo();
        let desc = user();
        repo.save(&desc, &record("u1", "a@x", "admin")).await.unwrap();
        repo.save(&desc, &record("u1", "a@x", "admin")).await.unwrap();
        assert_eq!(repo.connection().hlen("user:email_index").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_field_moves_index_entries() {
        let repo = repo();
        let desc = user();
        repo.save(&desc, &record("u1", "a@x", "admin")).await.unwrap();
        repo.update_field(&desc, "u1", "email", "b@x").await.unwrap();
        repo.update_field(&desc, "u1", "role", "guest").await.unwrap();

        let conn = repo.connection();
        assert_eq!(conn.hget("user:email_index", "a@x").await.unwrap(), None);
        assert_eq!(
            conn.hget("user:email_index", "b@x").await.unwrap().as_deref(),
            Some("u1")
        );
        assert!(!conn.exists("user:role_index:admin").await.unwrap());
        assert!(conn.sismember("user:role_index:guest", "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_record_rejected() {
        let repo = repo();
        let result = repo.update_field(&user(), "nobody", "email", "x").await;
        assert!(matches!(result, Err(KinshipError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_delete_leaves_indexes_behind() {
        let repo = repo();
        let desc = user();
        repo.save(&desc, &record("u1", "a@x", "admin")).await.unwrap();
        assert!(repo.delete(&desc, "u1").await.unwrap());
        assert!(!repo.delete(&desc, "u1").await.unwrap());

        let conn = repo.connection();
        assert!(!conn.exists("user:u1:object").await.unwrap());
        assert_eq!(conn.zscore("user:instances", "u1").await.unwrap(), None);
        assert!(conn.exists("user:email_index").await.unwrap());
        assert!(conn.sismember("user:everyone", "u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_inside_batch_rejected() {
        let repo = repo();
        let mut batch = repo.batch();
        batch.push(Command::SAdd {
            key: "s".into(),
            member: "m".into(),
        });
        let err = batch.save(&user(), &record("u1", "a@x", "admin")).unwrap_err();
        assert!(matches!(
            err,
            KinshipError::OperationUnsupportedInContext {
                operation: "save",
                context: "batch"
            }
        ));
        assert_eq!(batch.execute().await.unwrap(), vec![Reply::Int(1)]);
    }

    #[tokio::test]
    async fn test_wrong_model_rejected() {
        let repo = repo();
        let result = repo.save(&user(), &Record::new("team", "t1")).await;
        assert!(matches!(result, Err(KinshipError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_dropped_fields_removed_on_resave() {
        let repo = repo();
        let desc = user();
        repo.save(&desc, &record("u1", "a@x", "admin").with_field("nick", "al"))
            .await
            .unwrap();
        repo.save(&desc, &record("u1", "a@x", "admin")).await.unwrap();
        assert_eq!(
            repo.connection().hget("user:u1:object", "nick").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_live_identifiers_skip_index_hashes() {
        let repo = repo();
        let desc = user();
        repo.save(&desc, &record("a:b", "a@x", "object")).await.unwrap();
        let ids = repo.live_identifiers("user", 2).await.unwrap();
        assert_eq!(ids, vec!["a:b"]);
    }
}
