//! Kinship Core: relationship indexes over a key-value store.
//!
//! A model type declares its relationships once, in a [`ModelDescriptor`].
//! A [`Repository`] saves records and keeps four derived structures in step:
//!
//! | Structure | Key | Handle |
//! |-----------|-----|--------|
//! | Identifier timeline | `<model>:instances` | [`Timeline`] |
//! | Unique index | `<model>:<field>_index` | [`UniqueIndex`] |
//! | Multi index | `<model>:<field>_index:<value>` | [`MultiIndex`] |
//! | Participation | `<owner>:<owner_id>:<collection>` | [`Participation`] |
//!
//! Writes to those structures are not atomic with the record write, and
//! deleting a record leaves them alone. The [`AuditEngine`] compares every
//! structure with the live keyspace and the [`RepairEngine`] heals what it
//! finds.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use kinship_config::Config;
//! use kinship_core::prelude::*;
//! use kinship_storage::MemoryKvStore;
//!
//! # async fn run() -> KinshipResult<()> {
//! let repo = Repository::new(Arc::new(MemoryKvStore::new()), Config::default());
//! let user = ModelDescriptor::builder("user")
//!     .unique_index("email")
//!     .multi_index("role")
//!     .build()?;
//!
//! repo.save(&user, &Record::new("user", "u1").with_field("email", "a@x"))
//!     .await?;
//!
//! let report = repo.health_check(&user).await?;
//! if !report.healthy() {
//!     let summary = repo.repair(&user, Some(report)).await?;
//!     println!("{}", summary.report);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod audit;
pub mod error;
pub mod keys;
pub mod model;
pub mod multi_index;
pub mod participation;
pub mod record;
pub mod repair;
pub mod report;
pub mod repository;
pub mod score;
pub mod timeline;
pub mod unique_index;

pub use audit::{AuditEngine, AuditOptions, AuditPhase, AuditStatus, Finding, FindingKind, StaleReason};
pub use error::{KinshipError, KinshipResult};
pub use keys::KeySchema;
pub use model::{
    CollectionKind, IndexDecl, ModelDescriptor, ModelDescriptorBuilder, ParticipationDecl,
    ParticipationScope, Scope,
};
pub use multi_index::MultiIndex;
pub use participation::{Collection, Participation};
pub use record::{HashRecords, Record, RecordLayer};
pub use repair::{
    IndexRepair, InstancesRepair, ParticipationRepair, RepairEngine, RepairOptions, RepairSummary,
};
pub use report::{AuditReport, IndexAudit, IndexKind, InstancesAudit, ParticipationAudit};
pub use repository::{Batch, Repository};
pub use timeline::Timeline;
pub use unique_index::UniqueIndex;
