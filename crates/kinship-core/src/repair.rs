//! Corrective writes driven by an [`AuditReport`].
//!
//! Every removal is re-checked against the store before it is queued, so a
//! caller-supplied report that has gone stale cannot delete a reference to
//! a record written since. Writes go out in bounded pipelines; the net
//! result does not depend on the batch size.

use std::collections::BTreeSet;

use kinship_config::RepairConfig;
use kinship_telemetry::RunContext;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, warn};

use crate::audit::{AuditEngine, AuditOptions, AuditStatus, Finding};
use crate::error::KinshipResult;
use crate::model::{CollectionKind, IndexDecl, ModelDescriptor};
use crate::participation::queue_removal;
use crate::report::{AuditReport, IndexAudit, IndexKind};
use crate::repository::Repository;
use crate::score::timestamp_score;

/// Repair tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairOptions {
    /// Commands per pipeline.
    pub batch_size: usize,
    /// Stale entries above which a global index is rebuilt instead of
    /// patched.
    pub rebuild_threshold: usize,
    /// Rebuild every global index regardless of drift.
    pub force_rebuild: bool,
}

impl From<&RepairConfig> for RepairOptions {
    fn from(config: &RepairConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            rebuild_threshold: config.rebuild_threshold,
            force_rebuild: config.force_rebuild,
        }
    }
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self::from(&RepairConfig::default())
    }
}

/// Timeline corrections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancesRepair {
    /// Phantom entries removed.
    pub phantoms_removed: usize,
    /// Missing entries added.
    pub missing_added: usize,
}

/// One index's corrections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRepair {
    /// Index name.
    pub name: String,
    /// Unique or multi.
    pub kind: IndexKind,
    /// Whether the index was rebuilt from scratch.
    pub rebuilt: bool,
    /// Entries removed incrementally.
    pub entries_removed: usize,
    /// Entries added incrementally.
    pub entries_added: usize,
}

/// One participation's corrections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationRepair {
    /// Owner type.
    pub owner_type: String,
    /// Collection name.
    pub collection: String,
    /// Storage kind.
    pub kind: CollectionKind,
    /// Stale members removed.
    pub members_removed: usize,
}

/// Result of [`RepairEngine::repair_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairSummary {
    /// Model type.
    pub model: String,
    /// Timeline corrections.
    pub instances: InstancesRepair,
    /// Index corrections, one per audited index.
    pub indexes: Vec<IndexRepair>,
    /// Participation corrections, one per audited participation.
    pub participations: Vec<ParticipationRepair>,
    /// Audit taken after the repair.
    pub report: AuditReport,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl RepairSummary {
    /// Names of indexes rebuilt from scratch.
    #[must_use]
    pub fn rebuilt_indexes(&self) -> Vec<&str> {
        self.indexes
            .iter()
            .filter(|i| i.rebuilt)
            .map(|i| i.name.as_str())
            .collect()
    }

    /// Corrective actions taken; a rebuild counts as one.
    #[must_use]
    pub fn actions(&self) -> usize {
        let indexes: usize = self
            .indexes
            .iter()
            .map(|i| {
                usize::from(i.rebuilt)
                    .saturating_add(i.entries_removed)
                    .saturating_add(i.entries_added)
            })
            .sum();
        let participations: usize = self.participations.iter().map(|p| p.members_removed).sum();
        self.instances
            .phantoms_removed
            .saturating_add(self.instances.missing_added)
            .saturating_add(indexes)
            .saturating_add(participations)
    }
}

/// Applies corrective writes.
#[derive(Debug, Clone)]
pub struct RepairEngine {
    repo: Repository,
    auditor: AuditEngine,
    options: RepairOptions,
}

impl RepairEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(repo: Repository, audit: AuditOptions, options: RepairOptions) -> Self {
        Self {
            auditor: AuditEngine::new(repo.clone(), audit),
            repo,
            options,
        }
    }

    /// The options in effect.
    #[must_use]
    pub fn options(&self) -> RepairOptions {
        self.options
    }

    /// Repair every dimension, then audit again.
    ///
    /// Runs instances, then indexes, then participations. `audit` is used
    /// instead of a fresh audit when given.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged. Writes applied before the failure
    /// stay applied; a later run picks up the rest.
    pub async fn repair_all(
        &self,
        desc: &ModelDescriptor,
        audit: Option<AuditReport>,
    ) -> KinshipResult<RepairSummary> {
        let ctx = RunContext::new("repair").with_model(desc.name.clone());
        self.run(desc, audit, &ctx).instrument(ctx.span()).await
    }

    async fn run(
        &self,
        desc: &ModelDescriptor,
        audit: Option<AuditReport>,
        ctx: &RunContext,
    ) -> KinshipResult<RepairSummary> {
        let audit = match audit {
            Some(report) => report,
            None => self.auditor.audit(desc).await?,
        };
        info!(
            model = %desc.name,
            findings = audit.finding_count(),
            force_rebuild = self.options.force_rebuild,
            "repair started"
        );

        let instances = self.repair_instances(desc, &audit).await?;
        let indexes = self.repair_indexes(desc, &audit).await?;
        let participations = self.repair_participations(desc, &audit).await?;
        let report = self.auditor.audit(desc).await?;

        let summary = RepairSummary {
            model: desc.name.clone(),
            instances,
            indexes,
            participations,
            report,
            duration_ms: u64::try_from(ctx.elapsed_ms()).unwrap_or_default(),
        };
        info!(
            model = %desc.name,
            actions = summary.actions(),
            rebuilt = ?summary.rebuilt_indexes(),
            healthy = summary.report.healthy(),
            duration_ms = summary.duration_ms,
            "repair finished"
        );
        Ok(summary)
    }

    /// Drop phantom timeline entries and add missing ones.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn repair_instances(
        &self,
        desc: &ModelDescriptor,
        audit: &AuditReport,
    ) -> KinshipResult<InstancesRepair> {
        let records = self.repo.records();
        let key = self.repo.keys().timeline_key(&desc.name);
        let mut pipe = self.repo.connection().pipeline();
        let mut result = InstancesRepair::default();

        for id in &audit.instances.phantoms {
            if records.exists(&desc.name, id).await? {
                continue;
            }
            pipe.zrem(key.clone(), id.clone());
            result.phantoms_removed = result.phantoms_removed.saturating_add(1);
        }
        for id in &audit.instances.missing {
            let Some(record) = records.load(&desc.name, id).await? else {
                continue;
            };
            let score = timestamp_score(&record.fields, &desc.updated_field, &desc.created_field);
            pipe.zadd(key.clone(), score, id.clone());
            result.missing_added = result.missing_added.saturating_add(1);
        }

        if !pipe.is_empty() {
            pipe.execute_in_batches(self.options.batch_size).await?;
            info!(
                model = %desc.name,
                phantoms_removed = result.phantoms_removed,
                missing_added = result.missing_added,
                "timeline repaired"
            );
        }
        Ok(result)
    }

    /// Patch or rebuild every audited index.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn repair_indexes(
        &self,
        desc: &ModelDescriptor,
        audit: &AuditReport,
    ) -> KinshipResult<Vec<IndexRepair>> {
        let mut out = Vec::new();
        for index_audit in audit.unique_indexes.iter().chain(&audit.multi_indexes) {
            if let AuditStatus::NotImplemented { reason } = &index_audit.status {
                debug!(index = %index_audit.name, reason = %reason, "index not audited, skipped");
                continue;
            }
            let decl = match index_audit.kind {
                IndexKind::Unique => desc.unique_index(&index_audit.field),
                IndexKind::Multi => desc.multi_index(&index_audit.field),
            };
            let Some(decl) = decl else {
                warn!(index = %index_audit.name, "index no longer declared, skipped");
                continue;
            };
            out.push(self.repair_index(desc, decl, index_audit).await?);
        }
        Ok(out)
    }

    async fn repair_index(
        &self,
        desc: &ModelDescriptor,
        decl: &IndexDecl,
        audit: &IndexAudit,
    ) -> KinshipResult<IndexRepair> {
        let mut result = IndexRepair {
            name: decl.name.clone(),
            kind: audit.kind,
            rebuilt: false,
            entries_removed: 0,
            entries_added: 0,
        };

        let over_threshold = audit.stale.len() > self.options.rebuild_threshold;
        if decl.is_global() && (self.options.force_rebuild || over_threshold) {
            warn!(
                model = %desc.name,
                index = %decl.name,
                stale = audit.stale.len(),
                threshold = self.options.rebuild_threshold,
                forced = self.options.force_rebuild,
                "rebuilding index"
            );
            match audit.kind {
                IndexKind::Unique => {
                    self.repo
                        .unique(desc, &decl.field)?
                        .rebuild(self.options.batch_size)
                        .await?;
                },
                IndexKind::Multi => {
                    self.repo
                        .multi(desc, &decl.field)?
                        .rebuild(self.options.batch_size)
                        .await?;
                },
            }
            result.rebuilt = true;
            return Ok(result);
        }

        let (removed, added) = match audit.kind {
            IndexKind::Unique => self.patch_unique(desc, decl, audit).await?,
            IndexKind::Multi => self.patch_multi(desc, decl, audit).await?,
        };
        result.entries_removed = removed;
        result.entries_added = added;
        if removed > 0 || added > 0 {
            info!(model = %desc.name, index = %decl.name, removed, added, "index patched");
        }
        Ok(result)
    }

    /// Whether `finding` still describes the store.
    async fn still_stale(
        &self,
        desc: &ModelDescriptor,
        field: &str,
        finding: &Finding,
    ) -> KinshipResult<bool> {
        let records = self.repo.records();
        Ok(match records.load(&desc.name, &finding.identifier).await? {
            None => true,
            Some(record) => records.field_value(&record, field) != finding.field_value.as_deref(),
        })
    }

    async fn patch_unique(
        &self,
        desc: &ModelDescriptor,
        decl: &IndexDecl,
        audit: &IndexAudit,
    ) -> KinshipResult<(usize, usize)> {
        let conn = self.repo.connection();
        let mut pipe = conn.pipeline();
        let (mut removed, mut added) = (0_usize, 0_usize);
        // (key, value) pairs whose HDEL is queued but not yet executed.
        let mut freed: BTreeSet<(&str, &str)> = BTreeSet::new();

        for finding in &audit.stale {
            let Some(value) = &finding.field_value else {
                continue;
            };
            let owner = conn.hget(&finding.key, value).await?;
            if owner.as_deref() == Some(finding.identifier.as_str())
                && self.still_stale(desc, &decl.field, finding).await?
            {
                pipe.hdel(finding.key.clone(), value.clone());
                freed.insert((finding.key.as_str(), value.as_str()));
                removed = removed.saturating_add(1);
            }
        }
        for finding in &audit.missing {
            let Some(value) = &finding.field_value else {
                continue;
            };
            let claimed = (finding.key.as_str(), value.as_str());
            let vacant =
                freed.remove(&claimed) || conn.hget(&finding.key, value).await?.is_none();
            if vacant {
                pipe.hset(finding.key.clone(), value.clone(), finding.identifier.clone());
                added = added.saturating_add(1);
            }
        }

        pipe.execute_in_batches(self.options.batch_size).await?;
        Ok((removed, added))
    }

    async fn patch_multi(
        &self,
        desc: &ModelDescriptor,
        decl: &IndexDecl,
        audit: &IndexAudit,
    ) -> KinshipResult<(usize, usize)> {
        let mut pipe = self.repo.connection().pipeline();
        let (mut removed, mut added) = (0_usize, 0_usize);
        for finding in &audit.stale {
            if self.still_stale(desc, &decl.field, finding).await? {
                pipe.srem(finding.key.clone(), finding.identifier.clone());
                removed = removed.saturating_add(1);
            }
        }
        for finding in &audit.missing {
            pipe.sadd(finding.key.clone(), finding.identifier.clone());
            added = added.saturating_add(1);
        }
        pipe.execute_in_batches(self.options.batch_size).await?;
        Ok((removed, added))
    }

    /// Remove stale members from their collections.
    ///
    /// The timeline is never touched.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn repair_participations(
        &self,
        desc: &ModelDescriptor,
        audit: &AuditReport,
    ) -> KinshipResult<Vec<ParticipationRepair>> {
        let records = self.repo.records();
        let keys = self.repo.keys();
        let mut out = Vec::new();
        for part in &audit.participations {
            if !part.status.is_audited() {
                continue;
            }
            let mut pipe = self.repo.connection().pipeline();
            let mut removed: usize = 0;
            for finding in &part.stale {
                if records.exists(&desc.name, &finding.identifier).await? {
                    continue;
                }
                queue_removal(&mut pipe, part.kind, &finding.key, &finding.identifier);
                pipe.srem(
                    keys.participations_key(&desc.name, &finding.identifier),
                    finding.key.clone(),
                );
                removed = removed.saturating_add(1);
            }
            if removed > 0 {
                pipe.execute_in_batches(self.options.batch_size).await?;
                info!(
                    model = %desc.name,
                    participation = %part.label(),
                    kind = %part.kind,
                    removed,
                    "stale members removed"
                );
            }
            out.push(ParticipationRepair {
                owner_type: part.owner_type.clone(),
                collection: part.collection.clone(),
                kind: part.kind,
                members_removed: removed,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kinship_config::Config;
    use kinship_storage::MemoryKvStore;

    use super::*;
    use crate::record::Record;

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::builder("user")
            .unique_index("email")
            .multi_index("role")
            .participates_in("team", "members", CollectionKind::SortedSet)
            .participates_in("team", "queue", CollectionKind::List)
            .participates_in("project", "watchers", CollectionKind::Set)
            .build()
            .unwrap()
    }

    async fn seeded(config: Config) -> (Repository, ModelDescriptor) {
        let repo = Repository::new(Arc::new(MemoryKvStore::new()), config);
        let desc = descriptor();
        for (id, role, created) in [
            ("u1", "guest", "10"),
            ("u2", "admin", "20"),
            ("u3", "guest", "30"),
            ("u4", "admin", "40"),
        ] {
            repo.save(
                &desc,
                &Record::new("user", id)
                    .with_field("email", format!("{id}@x"))
                    .with_field("role", role)
                    .with_field("created", created),
            )
            .await
            .unwrap();
            for collection in ["members", "queue"] {
                repo.participation(&desc, "team", collection)
                    .unwrap()
                    .add("t1", id, None)
                    .await
                    .unwrap();
            }
            repo.participation(&desc, "project", "watchers")
                .unwrap()
                .add("p1", id, None)
                .await
                .unwrap();
        }
        (repo, desc)
    }

    #[tokio::test]
    async fn test_repair_all_heals_and_is_idempotent() {
        let (repo, desc) = seeded(Config::default()).await;
        let conn = repo.connection();
        conn.del(&["user:u1:object"]).await.unwrap();
        conn.zrem("user:instances", "u2").await.unwrap();
        conn.hdel("user:email_index", "u3@x").await.unwrap();

        let first = repo.repair(&desc, None).await.unwrap();
        assert!(first.report.healthy(), "{}", first.report);
        assert_eq!(first.instances.phantoms_removed, 1);
        assert_eq!(first.instances.missing_added, 1);
        assert!(first.actions() > 0);
        assert!(first.rebuilt_indexes().is_empty());

        let second = repo.repair(&desc, None).await.unwrap();
        assert_eq!(second.actions(), 0);
        assert!(second.report.healthy());
    }

    #[tokio::test]
    async fn test_missing_entry_rescored_from_record() {
        let (repo, desc) = seeded(Config::default()).await;
        repo.connection().zrem("user:instances", "u3").await.unwrap();
        repo.repair(&desc, None).await.unwrap();
        assert_eq!(
            repo.connection().zscore("user:instances", "u3").await.unwrap(),
            Some(30.0)
        );
    }

    #[tokio::test]
    async fn test_participation_repair_is_kind_aware() {
        let (repo, desc) = seeded(Config::default()).await;
        let conn = repo.connection();
        conn.del(&["user:u2:object"]).await.unwrap();
        let before = conn.zrange_with_scores("user:instances", 0, -1).await.unwrap();

        let audit = repo.audit(&desc).await.unwrap();
        let repaired = repo
            .repairer()
            .repair_participations(&desc, &audit)
            .await
            .unwrap();
        assert_eq!(repaired.len(), 3);
        assert!(repaired.iter().all(|p| p.members_removed == 1));

        assert_eq!(
            conn.zrange("team:t1:members", 0, -1).await.unwrap(),
            vec!["u1", "u3", "u4"]
        );
        assert_eq!(
            conn.lrange("team:t1:queue", 0, -1).await.unwrap(),
            vec!["u1", "u3", "u4"]
        );
        assert!(!conn.sismember("project:p1:watchers", "u2").await.unwrap());
        assert!(conn.smembers("user:u2:participations").await.unwrap().is_empty());
        assert_eq!(
            conn.zrange_with_scores("user:instances", 0, -1).await.unwrap(),
            before
        );
    }

    #[tokio::test]
    async fn test_threshold_triggers_rebuild() {
        let mut config = Config::default();
        config.repair.rebuild_threshold = 1;
        let (repo, desc) = seeded(config).await;
        let conn = repo.connection();
        conn.hset("user:email_index", "ghost1@x", "g1").await.unwrap();
        conn.hset("user:email_index", "ghost2@x", "g2").await.unwrap();

        let summary = repo.repair(&desc, None).await.unwrap();
        assert_eq!(summary.rebuilt_indexes(), vec!["email_index"]);
        assert_eq!(conn.hlen("user:email_index").await.unwrap(), 4);
        assert!(summary.report.healthy());
    }

    #[tokio::test]
    async fn test_force_rebuild_rebuilds_clean_indexes() {
        let mut config = Config::default();
        config.repair.force_rebuild = true;
        let (repo, desc) = seeded(config).await;
        let summary = repo.repair(&desc, None).await.unwrap();
        assert_eq!(summary.rebuilt_indexes(), vec!["email_index", "role_index"]);
        assert!(summary.report.healthy());
    }

    #[tokio::test]
    async fn test_stale_report_does_not_undo_new_writes() {
        let (repo, desc) = seeded(Config::default()).await;
        repo.connection().del(&["user:u4:object"]).await.unwrap();
        let audit = repo.audit(&desc).await.unwrap();

        repo.save(
            &desc,
            &Record::new("user", "u4")
                .with_field("email", "u4@x")
                .with_field("role", "admin"),
        )
        .await
        .unwrap();
        let summary = repo.repair(&desc, Some(audit)).await.unwrap();
        assert_eq!(summary.instances.phantoms_removed, 0);
        assert!(summary.report.instances.is_clean());
        assert_eq!(
            repo.unique(&desc, "email")
                .unwrap()
                .get("u4@x")
                .await
                .unwrap()
                .as_deref(),
            Some("u4")
        );
    }

    #[tokio::test]
    async fn test_batch_size_does_not_change_result() {
        let mut small = Config::default();
        small.repair.batch_size = 1;
        let (a, desc) = seeded(small).await;
        let (b, _) = seeded(Config::default()).await;
        for repo in [&a, &b] {
            let conn = repo.connection();
            conn.del(&["user:u1:object", "user:u3:object"]).await.unwrap();
            repo.repair(&desc, None).await.unwrap();
        }
        for key in ["user:instances", "team:t1:members"] {
            assert_eq!(
                a.connection().zrange(key, 0, -1).await.unwrap(),
                b.connection().zrange(key, 0, -1).await.unwrap()
            );
        }
        assert_eq!(
            a.connection().hgetall("user:email_index").await.unwrap(),
            b.connection().hgetall("user:email_index").await.unwrap()
        );
    }
}
