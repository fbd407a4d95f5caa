//! Audit report: one model's findings across every dimension.
//!
//! `healthy` and `complete` are independent. A report is healthy when no
//! audited dimension found anything, and complete when every dimension was
//! actually audited. A healthy, incomplete report means "no known problems".

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditStatus, Finding, FindingKind};
use crate::model::{CollectionKind, Scope};

/// Timeline versus keyspace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancesAudit {
    /// Timeline key.
    pub key: String,
    /// Entries in the timeline.
    pub timeline_count: usize,
    /// Primary keys found by the scan.
    pub keyspace_count: usize,
    /// In the timeline, not in the keyspace.
    pub phantoms: Vec<String>,
    /// In the keyspace, not in the timeline.
    pub missing: Vec<String>,
}

impl InstancesAudit {
    /// Whether nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.phantoms.is_empty() && self.missing.is_empty()
    }
}

/// Unique or multi.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Value to one identifier.
    Unique,
    /// Value to a set of identifiers.
    Multi,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unique => "unique",
            Self::Multi => "multi",
        })
    }
}

/// One index's audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAudit {
    /// Index name.
    pub name: String,
    /// Indexed field.
    pub field: String,
    /// Unique or multi.
    pub kind: IndexKind,
    /// Namespace.
    pub scope: Scope,
    /// Whether the audit ran.
    pub status: AuditStatus,
    /// Entries examined.
    pub checked: usize,
    /// Entries pointing at a gone record or a changed value.
    pub stale: Vec<Finding>,
    /// Live records with no entry.
    pub missing: Vec<Finding>,
}

impl IndexAudit {
    pub(crate) fn new(name: &str, field: &str, kind: IndexKind, scope: &Scope) -> Self {
        Self {
            name: name.to_string(),
            field: field.to_string(),
            kind,
            scope: scope.clone(),
            status: AuditStatus::Audited,
            checked: 0,
            stale: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub(crate) fn not_implemented(mut self, reason: impl Into<String>) -> Self {
        self.status = AuditStatus::NotImplemented {
            reason: reason.into(),
        };
        self
    }

    /// Whether nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stale.is_empty() && self.missing.is_empty()
    }
}

/// One participation's audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationAudit {
    /// Owner type.
    pub owner_type: String,
    /// Collection name.
    pub collection: String,
    /// Storage kind.
    pub kind: CollectionKind,
    /// `class`, `instance` or `through <model>`.
    pub scope: String,
    /// Whether the audit ran.
    pub status: AuditStatus,
    /// Collections read.
    pub collections_checked: usize,
    /// Members examined.
    pub members_checked: usize,
    /// Members whose record is gone.
    pub stale: Vec<Finding>,
}

impl ParticipationAudit {
    /// `owner.collection`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}.{}", self.owner_type, self.collection)
    }

    /// Whether nothing was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.stale.is_empty()
    }
}

/// Findings for one model across every dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Model type.
    pub model: String,
    /// Timeline versus keyspace.
    pub instances: InstancesAudit,
    /// One entry per declared unique index.
    pub unique_indexes: Vec<IndexAudit>,
    /// One entry per declared multi index.
    pub multi_indexes: Vec<IndexAudit>,
    /// One entry per declared participation.
    pub participations: Vec<ParticipationAudit>,
    /// When the audit started.
    pub audited_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl AuditReport {
    fn indexes(&self) -> impl Iterator<Item = &IndexAudit> {
        self.unique_indexes.iter().chain(&self.multi_indexes)
    }

    /// No finding in any dimension.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.instances.is_clean()
            && self.indexes().all(IndexAudit::is_clean)
            && self.participations.iter().all(ParticipationAudit::is_clean)
    }

    /// Every dimension was audited.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.indexes().all(|i| i.status.is_audited())
            && self.participations.iter().all(|p| p.status.is_audited())
    }

    /// Labels of dimensions that were not audited.
    #[must_use]
    pub fn not_implemented(&self) -> Vec<String> {
        self.indexes()
            .filter(|i| !i.status.is_audited())
            .map(|i| i.name.clone())
            .chain(
                self.participations
                    .iter()
                    .filter(|p| !p.status.is_audited())
                    .map(ParticipationAudit::label),
            )
            .collect()
    }

    /// Every finding, instance findings first.
    #[must_use]
    pub fn findings(&self) -> Vec<Finding> {
        let instances = &self.instances;
        let phantoms = instances
            .phantoms
            .iter()
            .map(|id| Finding::new(FindingKind::Phantom, id, "instances", &instances.key));
        let missing = instances
            .missing
            .iter()
            .map(|id| Finding::new(FindingKind::Missing, id, "instances", &instances.key));
        phantoms
            .chain(missing)
            .chain(
                self.indexes()
                    .flat_map(|i| i.stale.iter().chain(&i.missing).cloned()),
            )
            .chain(self.participations.iter().flat_map(|p| p.stale.iter().cloned()))
            .collect()
    }

    /// Number of findings.
    #[must_use]
    pub fn finding_count(&self) -> usize {
        let indexes: usize = self
            .indexes()
            .map(|i| i.stale.len().saturating_add(i.missing.len()))
            .sum();
        let participations: usize = self.participations.iter().map(|p| p.stale.len()).sum();
        self.instances
            .phantoms
            .len()
            .saturating_add(self.instances.missing.len())
            .saturating_add(indexes)
            .saturating_add(participations)
    }

    /// Structured form for programmatic consumers.
    #[must_use]
    pub fn to_map(&self) -> serde_json::Value {
        json!({
            "model": self.model,
            "healthy": self.healthy(),
            "complete": self.complete(),
            "audited_at": self.audited_at.to_rfc3339(),
            "duration_ms": self.duration_ms,
            "instances": self.instances,
            "unique_indexes": self.unique_indexes,
            "multi_indexes": self.multi_indexes,
            "participations": self.participations,
        })
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn write_index(f: &mut fmt::Formatter<'_>, index: &IndexAudit) -> fmt::Result {
    write!(
        f,
        "  {} index {} ({}, {}): ",
        index.kind, index.name, index.field, index.scope
    )?;
    if let AuditStatus::NotImplemented { reason } = &index.status {
        return writeln!(f, "NOT IMPLEMENTED ({reason})");
    }
    writeln!(
        f,
        "checked {}, stale {}, missing {}",
        index.checked,
        index.stale.len(),
        index.missing.len()
    )
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Audit of {} at {} ({} ms)",
            self.model,
            self.audited_at.to_rfc3339(),
            self.duration_ms
        )?;
        writeln!(
            f,
            "  healthy: {}  complete: {}",
            yes_no(self.healthy()),
            yes_no(self.complete())
        )?;
        let inst = &self.instances;
        writeln!(
            f,
            "  instances: timeline {}, keyspace {}, phantoms {}, missing {}",
            inst.timeline_count,
            inst.keyspace_count,
            inst.phantoms.len(),
            inst.missing.len()
        )?;
        if !inst.phantoms.is_empty() {
            writeln!(f, "    phantoms: {}", inst.phantoms.join(", "))?;
        }
        if !inst.missing.is_empty() {
            writeln!(f, "    missing: {}", inst.missing.join(", "))?;
        }
        for index in self.indexes() {
            write_index(f, index)?;
        }
        for part in &self.participations {
            write!(f, "  participation {} ({}, {}): ", part.label(), part.kind, part.scope)?;
            if let AuditStatus::NotImplemented { reason } = &part.status {
                writeln!(f, "NOT IMPLEMENTED ({reason})")?;
                continue;
            }
            writeln!(
                f,
                "collections {}, members {}, stale {}",
                part.collections_checked,
                part.members_checked,
                part.stale.len()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::StaleReason;

    fn report() -> AuditReport {
        AuditReport {
            model: "user".into(),
            instances: InstancesAudit {
                key: "user:instances".into(),
                timeline_count: 3,
                keyspace_count: 2,
                phantoms: vec!["a".into()],
                missing: Vec::new(),
            },
            unique_indexes: vec![IndexAudit::new(
                "email_index",
                "email",
                IndexKind::Unique,
                &Scope::Global,
            )],
            multi_indexes: vec![
                IndexAudit::new(
                    "user_skill_index",
                    "skill",
                    IndexKind::Multi,
                    &Scope::Within("team".into()),
                )
                .not_implemented("scoped multi index"),
            ],
            participations: Vec::new(),
            audited_at: Utc::now(),
            duration_ms: 4,
        }
    }

    #[test]
    fn test_health_and_completeness_are_independent() {
        let mut report = report();
        assert!(!report.healthy());
        assert!(!report.complete());
        assert_eq!(report.not_implemented(), vec!["user_skill_index"]);

        report.instances.phantoms.clear();
        assert!(report.healthy());
        assert!(!report.complete());
    }

    #[test]
    fn test_findings_flatten_every_dimension() {
        let mut report = report();
        report.unique_indexes[0].stale.push(
            Finding::new(
                FindingKind::Stale(StaleReason::ObjectMissing),
                "a",
                "email_index",
                "user:email_index",
            )
            .with_value("a@x"),
        );
        let findings = report.findings();
        assert_eq!(findings.len(), 2);
        assert_eq!(report.finding_count(), 2);
        assert_eq!(findings[0].kind, FindingKind::Phantom);
        assert_eq!(findings[0].key, "user:instances");
        assert_eq!(findings[1].field_value.as_deref(), Some("a@x"));
    }

    #[test]
    fn test_to_map_carries_predicates() {
        let map = report().to_map();
        assert_eq!(map["model"], "user");
        assert_eq!(map["healthy"], false);
        assert_eq!(map["complete"], false);
        assert_eq!(map["instances"]["phantoms"][0], "a");
        assert_eq!(map["multi_indexes"][0]["status"]["status"], "not_implemented");
    }

    #[test]
    fn test_display_surfaces_marker() {
        let text = report().to_string();
        assert!(text.contains("healthy: no  complete: no"));
        assert!(text.contains("phantoms: a"));
        assert!(text.contains("NOT IMPLEMENTED (scoped multi index)"));
    }
}
