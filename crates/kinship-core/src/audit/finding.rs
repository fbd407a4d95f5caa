//! Discrepancy findings and per-dimension audit status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why an index entry or collection member is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// The record exists but no longer holds the indexed value.
    ValueMismatch,
    /// The referenced record is gone.
    ObjectMissing,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ValueMismatch => "value_mismatch",
            Self::ObjectMissing => "object_missing",
        })
    }
}

/// Discrepancy class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum FindingKind {
    /// A timeline entry whose record is gone.
    Phantom,
    /// A live record absent from a structure that should reference it.
    Missing,
    /// An index entry or collection member that no longer holds.
    Stale(StaleReason),
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Phantom => f.write_str("phantom"),
            Self::Missing => f.write_str("missing"),
            Self::Stale(reason) => write!(f, "stale ({reason})"),
        }
    }
}

/// One discrepancy, with enough context to repair it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Discrepancy class.
    pub kind: FindingKind,
    /// The identifier involved.
    pub identifier: String,
    /// The indexed value, for index findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_value: Option<String>,
    /// Index name, `owner.collection`, or `instances`.
    pub structure: String,
    /// Storage key holding (or that should hold) the reference.
    pub key: String,
}

impl Finding {
    pub(crate) fn new(
        kind: FindingKind,
        identifier: impl Into<String>,
        structure: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            field_value: None,
            structure: structure.into(),
            key: key.into(),
        }
    }

    pub(crate) fn with_value(mut self, value: impl Into<String>) -> Self {
        self.field_value = Some(value.into());
        self
    }

    /// The stale reason, if this is a stale finding.
    #[must_use]
    pub fn stale_reason(&self) -> Option<StaleReason> {
        match self.kind {
            FindingKind::Stale(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.structure, self.kind, self.identifier)?;
        if let Some(value) = &self.field_value {
            write!(f, " value={value:?}")?;
        }
        write!(f, " key={}", self.key)
    }
}

/// Whether a dimension was audited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum AuditStatus {
    /// Audited; its findings are authoritative.
    Audited,
    /// No audit exists for this shape; an empty finding list means nothing.
    NotImplemented {
        /// What is unsupported.
        reason: String,
    },
}

impl AuditStatus {
    /// Whether the dimension was audited.
    #[must_use]
    pub fn is_audited(&self) -> bool {
        matches!(self, Self::Audited)
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audited => f.write_str("audited"),
            Self::NotImplemented { reason } => write!(f, "not_implemented ({reason})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_display() {
        let finding = Finding::new(
            FindingKind::Stale(StaleReason::ValueMismatch),
            "u1",
            "email_index",
            "user:email_index",
        )
        .with_value("a@x");
        assert_eq!(
            finding.to_string(),
            "email_index stale (value_mismatch) \"u1\" value=\"a@x\" key=user:email_index"
        );
        assert_eq!(finding.stale_reason(), Some(StaleReason::ValueMismatch));
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let status = AuditStatus::NotImplemented {
            reason: "scoped".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "not_implemented");
        assert_eq!(json["reason"], "scoped");
        assert!(!status.is_audited());
        assert!(AuditStatus::Audited.is_audited());
    }
}
