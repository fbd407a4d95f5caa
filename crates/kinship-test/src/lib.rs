//! Kinship Test - Shared test utilities for Kinship.
//!
//! This crate provides descriptor and record fixtures, a seeded repository
//! harness, and mock stores that fail or record on demand. Use it as a
//! dev-dependency.
//!
//! ```rust,ignore
//! use kinship_test::prelude::*;
//!
//! #[tokio::test]
//! async fn test_phantom_detected() {
//!     let harness = TestRepo::new();
//!     harness.seed_users(&["a", "b"]).await;
//!     harness.delete_object("a").await;
//!
//!     let report = harness.repo.audit(&harness.user).await.unwrap();
//!     assert_eq!(report.instances.phantoms, vec!["a"]);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
