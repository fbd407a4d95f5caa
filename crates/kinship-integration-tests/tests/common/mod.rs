//! Shared helpers for integration tests.

use kinship_core::{AuditReport, FindingKind, StaleReason};

/// Identifiers of every stale finding with `reason`, across indexes and
/// participations, sorted and deduplicated.
#[allow(dead_code)]
pub fn stale_ids(report: &AuditReport, reason: StaleReason) -> Vec<String> {
    let mut ids: Vec<String> = report
        .findings()
        .into_iter()
        .filter(|f| f.kind == FindingKind::Stale(reason))
        .map(|f| f.identifier)
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Identifiers of every missing finding outside the timeline.
#[allow(dead_code)]
pub fn missing_ids(report: &AuditReport) -> Vec<String> {
    let mut ids: Vec<String> = report
        .findings()
        .into_iter()
        .filter(|f| f.kind == FindingKind::Missing && f.structure != "instances")
        .map(|f| f.identifier)
        .collect();
    ids.sort();
    ids.dedup();
    ids
}
