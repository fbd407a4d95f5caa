//! Read-only reconciliation of relationship structures against live records.
//!
//! One run walks `collecting_timeline → scanning_keyspace → comparing →
//! reporting`. Each dimension is compared independently; shapes without an
//! audit still produce an entry marked [`AuditStatus::NotImplemented`].
//!
//! Nothing here writes. Runs tolerate concurrent writers: a reference is
//! only reported as dangling after a fresh existence check, and a scan may
//! see a key added or removed mid-run.

mod finding;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use kinship_config::AuditConfig;
use kinship_telemetry::RunContext;
use tracing::{Instrument, debug, info, warn};

use crate::error::KinshipResult;
use crate::model::{IndexDecl, ModelDescriptor, ParticipationDecl, ParticipationScope, Scope};
use crate::participation::Participation;
use crate::record::Record;
use crate::report::{AuditReport, IndexAudit, IndexKind, InstancesAudit, ParticipationAudit};
use crate::repository::Repository;

pub use finding::{AuditStatus, Finding, FindingKind, StaleReason};

/// Audit tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditOptions {
    /// Keys examined per scan call.
    pub batch_size: usize,
    /// Members checked per multi-index value before sampling kicks in.
    pub sample_size: usize,
}

impl From<&AuditConfig> for AuditOptions {
    fn from(config: &AuditConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            sample_size: config.sample_size,
        }
    }
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self::from(&AuditConfig::default())
    }
}

/// Stage of an audit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditPhase {
    /// Reading the timeline.
    CollectingTimeline,
    /// Enumerating primary keys.
    ScanningKeyspace,
    /// Comparing each dimension.
    Comparing,
    /// Assembling the report.
    Reporting,
}

impl fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CollectingTimeline => "collecting_timeline",
            Self::ScanningKeyspace => "scanning_keyspace",
            Self::Comparing => "comparing",
            Self::Reporting => "reporting",
        })
    }
}

/// Live records seen by one scan, projected onto the fields under audit.
struct Snapshot {
    records: BTreeMap<String, Record>,
}

/// Read-only auditor.
#[derive(Debug, Clone)]
pub struct AuditEngine {
    repo: Repository,
    options: AuditOptions,
}

impl AuditEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(repo: Repository, options: AuditOptions) -> Self {
        Self { repo, options }
    }

    /// The options in effect.
    #[must_use]
    pub fn options(&self) -> AuditOptions {
        self.options
    }

    /// Audit every dimension of one model.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged; nothing is retried.
    pub async fn audit(&self, desc: &ModelDescriptor) -> KinshipResult<AuditReport> {
        let ctx = RunContext::new("audit").with_model(desc.name.clone());
        self.run(desc, &ctx).instrument(ctx.span()).await
    }

    /// Audit one model and log whether it is healthy and complete.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn health_check(&self, desc: &ModelDescriptor) -> KinshipResult<AuditReport> {
        let report = self.audit(desc).await?;
        if report.healthy() {
            info!(model = %desc.name, "health check passed");
        } else {
            warn!(
                model = %desc.name,
                findings = report.finding_count(),
                phantoms = report.instances.phantoms.len(),
                missing = report.instances.missing.len(),
                "health check failed"
            );
        }
        if !report.complete() {
            info!(
                model = %desc.name,
                not_implemented = ?report.not_implemented(),
                "health check incomplete"
            );
        }
        Ok(report)
    }

    /// Compare the timeline with the keyspace.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn audit_instances(&self, desc: &ModelDescriptor) -> KinshipResult<InstancesAudit> {
        let timeline = self.repo.timeline(desc).members().await?;
        let snapshot = self.snapshot(&desc.name, &[]).await?;
        Ok(self.compare_instances(desc, timeline, &snapshot))
    }

    /// Audit one unique index.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn audit_unique_index(
        &self,
        desc: &ModelDescriptor,
        decl: &IndexDecl,
    ) -> KinshipResult<IndexAudit> {
        let snapshot = self.snapshot(&desc.name, &[decl.field.as_str()]).await?;
        self.compare_unique(desc, decl, &snapshot).await
    }

    /// Audit one multi index.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn audit_multi_index(
        &self,
        desc: &ModelDescriptor,
        decl: &IndexDecl,
    ) -> KinshipResult<IndexAudit> {
        let snapshot = self.snapshot(&desc.name, &[decl.field.as_str()]).await?;
        self.compare_multi(desc, decl, &snapshot).await
    }

    /// Audit one participation.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn audit_participation(
        &self,
        desc: &ModelDescriptor,
        decl: &ParticipationDecl,
    ) -> KinshipResult<ParticipationAudit> {
        let snapshot = self.snapshot(&desc.name, &[]).await?;
        self.compare_participation(desc, decl, &snapshot).await
    }

    async fn run(&self, desc: &ModelDescriptor, ctx: &RunContext) -> KinshipResult<AuditReport> {
        info!(
            model = %desc.name,
            unique = desc.unique_indexes.len(),
            multi = desc.multi_indexes.len(),
            participations = desc.participations.len(),
            "audit started"
        );

        debug!(phase = %AuditPhase::CollectingTimeline, "audit phase");
        let timeline = self.repo.timeline(desc).members().await?;

        debug!(phase = %AuditPhase::ScanningKeyspace, "audit phase");
        let fields: Vec<&str> = desc
            .unique_indexes
            .iter()
            .chain(&desc.multi_indexes)
            .map(|decl| decl.field.as_str())
            .collect();
        let snapshot = self.snapshot(&desc.name, &fields).await?;

        debug!(phase = %AuditPhase::Comparing, "audit phase");
        let instances = self.compare_instances(desc, timeline, &snapshot);
        let mut unique_indexes = Vec::with_capacity(desc.unique_indexes.len());
        for decl in &desc.unique_indexes {
            unique_indexes.push(self.compare_unique(desc, decl, &snapshot).await?);
        }
        let mut multi_indexes = Vec::with_capacity(desc.multi_indexes.len());
        for decl in &desc.multi_indexes {
            multi_indexes.push(self.compare_multi(desc, decl, &snapshot).await?);
        }
        let mut participations = Vec::with_capacity(desc.participations.len());
        for decl in &desc.participations {
            participations.push(self.compare_participation(desc, decl, &snapshot).await?);
        }

        debug!(phase = %AuditPhase::Reporting, "audit phase");
        let report = AuditReport {
            model: desc.name.clone(),
            instances,
            unique_indexes,
            multi_indexes,
            participations,
            audited_at: ctx.started_at,
            duration_ms: u64::try_from(ctx.elapsed_ms()).unwrap_or_default(),
        };
        info!(
            model = %desc.name,
            healthy = report.healthy(),
            complete = report.complete(),
            findings = report.finding_count(),
            duration_ms = report.duration_ms,
            "audit finished"
        );
        Ok(report)
    }

    /// Load every live record, keeping only `fields`.
    async fn snapshot(&self, model: &str, fields: &[&str]) -> KinshipResult<Snapshot> {
        let records_layer = self.repo.records();
        let mut records = BTreeMap::new();
        for id in self
            .repo
            .live_identifiers(model, self.options.batch_size)
            .await?
        {
            let Some(full) = records_layer.load(model, &id).await? else {
                continue;
            };
            let mut kept = Record::new(model, id.as_str());
            for &field in fields {
                if let Some(value) = records_layer.field_value(&full, field) {
                    kept = kept.with_field(field, value);
                }
            }
            records.insert(id, kept);
        }
        Ok(Snapshot { records })
    }

    /// The record behind `id`, from the snapshot or, failing that, a fresh
    /// read.
    async fn current(
        &self,
        snapshot: &Snapshot,
        model: &str,
        id: &str,
    ) -> KinshipResult<Option<Record>> {
        if let Some(record) = snapshot.records.get(id) {
            return Ok(Some(record.clone()));
        }
        self.repo.records().load(model, id).await
    }

    async fn is_live(&self, snapshot: &Snapshot, model: &str, id: &str) -> KinshipResult<bool> {
        if snapshot.records.contains_key(id) {
            return Ok(true);
        }
        self.repo.records().exists(model, id).await
    }

    fn compare_instances(
        &self,
        desc: &ModelDescriptor,
        timeline: Vec<String>,
        snapshot: &Snapshot,
    ) -> InstancesAudit {
        let timeline: BTreeSet<String> = timeline.into_iter().collect();
        let phantoms: Vec<String> = timeline
            .iter()
            .filter(|id| !snapshot.records.contains_key(*id))
            .cloned()
            .collect();
        let missing: Vec<String> = snapshot
            .records
            .keys()
            .filter(|id| !timeline.contains(*id))
            .cloned()
            .collect();
        if !phantoms.is_empty() {
            warn!(model = %desc.name, count = phantoms.len(), "phantom timeline entries");
        }
        if !missing.is_empty() {
            warn!(model = %desc.name, count = missing.len(), "records missing from timeline");
        }
        InstancesAudit {
            key: self.repo.keys().timeline_key(&desc.name),
            timeline_count: timeline.len(),
            keyspace_count: snapshot.records.len(),
            phantoms,
            missing,
        }
    }

    /// Classify one `value → id` reference.
    async fn check_entry(
        &self,
        snapshot: &Snapshot,
        model: &str,
        field: &str,
        value: &str,
        id: &str,
    ) -> KinshipResult<Option<StaleReason>> {
        let records = self.repo.records();
        Ok(match self.current(snapshot, model, id).await? {
            None => Some(StaleReason::ObjectMissing),
            Some(record) if records.field_value(&record, field) != Some(value) => {
                Some(StaleReason::ValueMismatch)
            },
            Some(_) => None,
        })
    }

    async fn compare_unique(
        &self,
        desc: &ModelDescriptor,
        decl: &IndexDecl,
        snapshot: &Snapshot,
    ) -> KinshipResult<IndexAudit> {
        let mut audit = IndexAudit::new(&decl.name, &decl.field, IndexKind::Unique, &decl.scope);
        let index = self.repo.unique(desc, &decl.field)?;
        let conn = self.repo.connection();

        let hashes: Vec<String> = match &decl.scope {
            Scope::Global => vec![index.key()?],
            Scope::Within(parent_type) => {
                conn.scan_all(
                    &self.repo.keys().scoped_pattern(parent_type, &decl.name),
                    Some(kinship_storage::ValueKind::Hash),
                    self.options.batch_size,
                )
                .await?
            },
        };

        let mut owners: BTreeMap<String, String> = BTreeMap::new();
        for key in &hashes {
            for (value, id) in conn.hgetall(key).await? {
                audit.checked = audit.checked.saturating_add(1);
                match self
                    .check_entry(snapshot, &desc.name, &decl.field, &value, &id)
                    .await?
                {
                    Some(reason) => audit.stale.push(
                        Finding::new(FindingKind::Stale(reason), id, &decl.name, key)
                            .with_value(value),
                    ),
                    None => {
                        owners.insert(value, id);
                    },
                }
            }
        }

        // Records do not carry their parent, so scoped indexes have no
        // derivable missing set.
        if decl.is_global() {
            let key = index.key()?;
            let records = self.repo.records();
            for (id, record) in &snapshot.records {
                let Some(value) = records.field_value(record, &decl.field) else {
                    continue;
                };
                match owners.get(value) {
                    Some(owner) if owner == id => {},
                    Some(owner) => warn!(
                        model = %desc.name,
                        field = %decl.field,
                        value,
                        owner = %owner,
                        duplicate = %id,
                        "unique value held by two live records"
                    ),
                    None => audit.missing.push(
                        Finding::new(FindingKind::Missing, id, &decl.name, &key).with_value(value),
                    ),
                }
            }
        }

        if !audit.is_clean() {
            warn!(
                model = %desc.name,
                index = %decl.name,
                stale = audit.stale.len(),
                missing = audit.missing.len(),
                "unique index drift"
            );
        }
        Ok(audit)
    }

    async fn compare_multi(
        &self,
        desc: &ModelDescriptor,
        decl: &IndexDecl,
        snapshot: &Snapshot,
    ) -> KinshipResult<IndexAudit> {
        let audit = IndexAudit::new(&decl.name, &decl.field, IndexKind::Multi, &decl.scope);
        if let Scope::Within(parent_type) = &decl.scope {
            return Ok(audit.not_implemented(format!(
                "multi index scoped within {parent_type}"
            )));
        }
        let mut audit = audit;
        let index = self.repo.multi(desc, &decl.field)?;
        let conn = self.repo.connection();
        let sample_size = self.options.sample_size;

        // Fully read sets, so the missing pass can skip a round trip.
        let mut full: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for value in index.values(self.options.batch_size).await? {
            let key = index.value_key(&value)?;
            let size = conn.scard(&key).await?;
            let members = if size > sample_size {
                debug!(index = %decl.name, value = %value, size, sample_size, "sampling value set");
                conn.srandmember(&key, sample_size).await?
            } else {
                conn.smembers(&key).await?
            };
            for id in &members {
                audit.checked = audit.checked.saturating_add(1);
                if let Some(reason) = self
                    .check_entry(snapshot, &desc.name, &decl.field, &value, id)
                    .await?
                {
                    audit.stale.push(
                        Finding::new(FindingKind::Stale(reason), id, &decl.name, &key)
                            .with_value(value.clone()),
                    );
                }
            }
            if size <= sample_size {
                full.insert(value, members.into_iter().collect());
            }
        }

        let records = self.repo.records();
        for (id, record) in &snapshot.records {
            let Some(value) = records.field_value(record, &decl.field) else {
                continue;
            };
            let present = match full.get(value) {
                Some(members) => members.contains(id),
                None => index.contains(value, id).await?,
            };
            if !present {
                audit.missing.push(
                    Finding::new(FindingKind::Missing, id, &decl.name, index.value_key(value)?)
                        .with_value(value),
                );
            }
        }

        if !audit.is_clean() {
            warn!(
                model = %desc.name,
                index = %decl.name,
                stale = audit.stale.len(),
                missing = audit.missing.len(),
                "multi index drift"
            );
        }
        Ok(audit)
    }

    async fn compare_participation(
        &self,
        desc: &ModelDescriptor,
        decl: &ParticipationDecl,
        snapshot: &Snapshot,
    ) -> KinshipResult<ParticipationAudit> {
        let handle = Participation::new(self.repo.clone(), desc, decl.clone());
        let mut audit = ParticipationAudit {
            owner_type: decl.owner_type.clone(),
            collection: decl.collection.clone(),
            kind: decl.kind,
            scope: match &decl.scope {
                ParticipationScope::Class => "class".to_string(),
                ParticipationScope::Instance => "instance".to_string(),
                ParticipationScope::Through { through } => format!("through {through}"),
            },
            status: AuditStatus::Audited,
            collections_checked: 0,
            members_checked: 0,
            stale: Vec::new(),
        };

        let collections = match &decl.scope {
            ParticipationScope::Through { through } => {
                audit.status = AuditStatus::NotImplemented {
                    reason: format!("membership carried by join model {through}"),
                };
                return Ok(audit);
            },
            ParticipationScope::Class => vec![handle.class_collection()?],
            ParticipationScope::Instance => {
                let keys = self.repo.keys();
                let mut out = Vec::new();
                for key in self
                    .repo
                    .connection()
                    .scan_all(
                        &handle.collections_pattern(),
                        Some(decl.kind.value_kind()),
                        self.options.batch_size,
                    )
                    .await?
                {
                    if let Some(owner) =
                        keys.parent_from_scoped_key(&decl.owner_type, &decl.collection, &key)
                    {
                        out.push(handle.collection(&owner)?);
                    }
                }
                out
            },
        };

        let label = audit.label();
        for collection in collections {
            audit.collections_checked = audit.collections_checked.saturating_add(1);
            let members: BTreeSet<String> = collection.members().await?.into_iter().collect();
            for member in members {
                audit.members_checked = audit.members_checked.saturating_add(1);
                if !self.is_live(snapshot, &desc.name, &member).await? {
                    audit.stale.push(Finding::new(
                        FindingKind::Stale(StaleReason::ObjectMissing),
                        member,
                        &label,
                        collection.key(),
                    ));
                }
            }
        }

        if !audit.is_clean() {
            warn!(
                model = %desc.name,
                participation = %label,
                stale = audit.stale.len(),
                "stale participation members"
            );
        }
        Ok(audit)
    }
}
