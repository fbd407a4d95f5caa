//! Prelude module - commonly used types for convenient import.
//!
//! Use `use kinship_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{KinshipError, KinshipResult};

// Declarations and records
pub use crate::{CollectionKind, ModelDescriptor, Record, RecordLayer, Scope};

// Write path and handles
pub use crate::{MultiIndex, Participation, Repository, Timeline, UniqueIndex};

// Audit and repair
pub use crate::{AuditEngine, AuditReport, AuditStatus, Finding, FindingKind, RepairEngine, RepairSummary};
