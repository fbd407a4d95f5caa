//! Kinship Storage: the key-value store boundary.
//!
//! Kinship layers relationships over a plain key-value store. This crate is
//! the only place that knows how the store is reached.
//!
//! # Command Model
//!
//! Every interaction is a [`Command`] answered by a [`Reply`]. A
//! [`KvStore`] executes single commands and ordered pipelines; nothing
//! stronger than ordered best-effort batching is assumed.
//!
//! # Backends
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`MemoryKvStore`] | Tests, embedding, ephemeral data |
//! | `SurrealKvStore` | Persistent embedded storage (`kv` feature) |
//!
//! # Ergonomic Access
//!
//! Use [`Connection`] for typed helpers (`hgetall`, `smembers`,
//! `zrange_with_scores`, cursor scans) and [`Pipeline`] for batched writes.
//!
//! # Feature Flags
//!
//! - **`kv`**: `SurrealKV` persistent backend

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod command;
pub mod connection;
pub mod error;
pub mod kv;
pub mod pattern;

mod cursor;
mod keyspace;

#[cfg(feature = "kv")]
mod surreal;

pub use command::{Command, Reply, ValueKind};
pub use connection::{Connection, Pipeline};
pub use error::{StorageError, StorageResult};
pub use kv::{KvStore, MemoryKvStore};

#[cfg(feature = "kv")]
pub use surreal::SurrealKvStore;
