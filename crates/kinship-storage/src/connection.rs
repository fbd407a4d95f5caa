//! Typed access to a [`KvStore`].
//!
//! [`Connection`] is the API the relationship layer uses: every helper
//! issues exactly one [`Command`] and converts the [`Reply`] into a plain
//! Rust value. [`Pipeline`] collects write commands and ships them through
//! [`KvStore::execute_pipeline`], optionally in bounded batches.
//!
//! # Example
//!
//! ```rust,ignore
//! use kinship_storage::{Connection, MemoryKvStore};
//! use std::sync::Arc;
//!
//! let conn = Connection::new(Arc::new(MemoryKvStore::new()));
//! conn.zadd("user:instances", 1.0, "u1").await?;
//! let ids = conn.zrange("user:instances", 0, -1).await?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::command::{Command, Reply, ValueKind};
use crate::error::StorageResult;
use crate::kv::KvStore;

/// A shareable handle to a key-value store with typed helpers.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<dyn KvStore>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { inner: store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.inner
    }

    /// Execute a raw command.
    ///
    /// # Errors
    ///
    /// Returns whatever the store reports.
    pub async fn execute(&self, command: Command) -> StorageResult<Reply> {
        self.inner.execute(command).await
    }

    /// Start collecting a pipeline.
    #[must_use]
    pub fn pipeline(&self) -> Pipeline {
        Pipeline {
            conn: self.clone(),
            commands: Vec::new(),
        }
    }

    // -- Keyspace --

    /// Read a string value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.execute(Command::Get { key: key.into() })
            .await?
            .into_opt_string("GET")
    }

    /// Write a string value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.execute(Command::Set {
            key: key.into(),
            value: value.into(),
        })
        .await
        .map(drop)
    }

    /// Delete keys, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn del(&self, keys: &[&str]) -> StorageResult<usize> {
        self.execute(Command::Del {
            keys: keys.iter().map(|k| (*k).to_string()).collect(),
        })
        .await?
        .into_count("DEL")
    }

    /// Check whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.execute(Command::Exists { key: key.into() })
            .await?
            .into_bool("EXISTS")
    }

    /// The kind of value at a key, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn kind(&self, key: &str) -> StorageResult<Option<ValueKind>> {
        let name = self
            .execute(Command::Type { key: key.into() })
            .await?
            .into_opt_string("TYPE")?;
        Ok(name.as_deref().and_then(ValueKind::parse))
    }

    /// Atomically replace `to` with the value at `from`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoSuchKey`](crate::StorageError::NoSuchKey)
    /// if `from` does not exist.
    pub async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.execute(Command::Rename {
            from: from.into(),
            to: to.into(),
        })
        .await
        .map(drop)
    }

    /// Fetch one page of a keyspace scan.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the pattern is malformed.
    pub async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
        kind: Option<ValueKind>,
    ) -> StorageResult<(u64, Vec<String>)> {
        self.execute(Command::Scan {
            cursor,
            pattern: Some(pattern.into()),
            count,
            kind,
        })
        .await?
        .into_scan("SCAN")
    }

    /// Drain a scan to completion, `batch_size` keys examined per call.
    ///
    /// Keys repeated across pages (possible under concurrent writes) are
    /// reported once.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the store.
    pub async fn scan_all(
        &self,
        pattern: &str,
        kind: Option<ValueKind>,
        batch_size: usize,
    ) -> StorageResult<Vec<String>> {
        let mut seen = BTreeSet::new();
        let mut cursor = 0;
        loop {
            let (next, keys) = self.scan(cursor, pattern, batch_size, kind).await?;
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(seen.into_iter().collect())
    }

    // -- Hash --

    /// Read one hash field.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        self.execute(Command::HGet {
            key: key.into(),
            field: field.into(),
        })
        .await?
        .into_opt_string("HGET")
    }

    /// Write one hash field; `true` if the field is new.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> StorageResult<bool> {
        self.execute(Command::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
        .await?
        .into_bool("HSET")
    }

    /// Delete one hash field; `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn hdel(&self, key: &str, field: &str) -> StorageResult<bool> {
        self.execute(Command::HDel {
            key: key.into(),
            field: field.into(),
        })
        .await?
        .into_bool("HDEL")
    }

    /// Read a whole hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn hgetall(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        self.execute(Command::HGetAll { key: key.into() })
            .await?
            .into_map("HGETALL")
    }

    /// Count hash fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn hlen(&self, key: &str) -> StorageResult<usize> {
        self.execute(Command::HLen { key: key.into() })
            .await?
            .into_count("HLEN")
    }

    // -- Set --

    /// Add a set member; `true` if it was new.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn sadd(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.execute(Command::SAdd {
            key: key.into(),
            member: member.into(),
        })
        .await?
        .into_bool("SADD")
    }

    /// Remove a set member; `true` if it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn srem(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.execute(Command::SRem {
            key: key.into(),
            member: member.into(),
        })
        .await?
        .into_bool("SREM")
    }

    /// Read every set member.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn smembers(&self, key: &str) -> StorageResult<Vec<String>> {
        self.execute(Command::SMembers { key: key.into() })
            .await?
            .into_strings("SMEMBERS")
    }

    /// Check set membership.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn sismember(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.execute(Command::SIsMember {
            key: key.into(),
            member: member.into(),
        })
        .await?
        .into_bool("SISMEMBER")
    }

    /// Count set members.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn scard(&self, key: &str) -> StorageResult<usize> {
        self.execute(Command::SCard { key: key.into() })
            .await?
            .into_count("SCARD")
    }

    /// Sample up to `count` distinct members.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn srandmember(&self, key: &str, count: usize) -> StorageResult<Vec<String>> {
        self.execute(Command::SRandMember {
            key: key.into(),
            count,
        })
        .await?
        .into_strings("SRANDMEMBER")
    }

    // -- List --

    /// Append to a list, returning its new length.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn rpush(&self, key: &str, value: &str) -> StorageResult<usize> {
        self.execute(Command::RPush {
            key: key.into(),
            value: value.into(),
        })
        .await?
        .into_count("RPUSH")
    }

    /// Remove list occurrences of `value`, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn lrem(&self, key: &str, count: i64, value: &str) -> StorageResult<usize> {
        self.execute(Command::LRem {
            key: key.into(),
            count,
            value: value.into(),
        })
        .await?
        .into_count("LREM")
    }

    /// Read an inclusive index range.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>> {
        self.execute(Command::LRange {
            key: key.into(),
            start,
            stop,
        })
        .await?
        .into_strings("LRANGE")
    }

    /// Count list elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn llen(&self, key: &str) -> StorageResult<usize> {
        self.execute(Command::LLen { key: key.into() })
            .await?
            .into_count("LLEN")
    }

    // -- Sorted set --

    /// Add a member or update its score; `true` if it was new.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn zadd(&self, key: &str, score: f64, member: &str) -> StorageResult<bool> {
        self.execute(Command::ZAdd {
            key: key.into(),
            score,
            member: member.into(),
        })
        .await?
        .into_bool("ZADD")
    }

    /// Remove a member; `true` if it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn zrem(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.execute(Command::ZRem {
            key: key.into(),
            member: member.into(),
        })
        .await?
        .into_bool("ZREM")
    }

    /// Read a member's score.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn zscore(&self, key: &str, member: &str) -> StorageResult<Option<f64>> {
        self.execute(Command::ZScore {
            key: key.into(),
            member: member.into(),
        })
        .await?
        .into_opt_float("ZSCORE")
    }

    /// Read members in an inclusive rank range, lowest score first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn zrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>> {
        self.execute(Command::ZRange {
            key: key.into(),
            start,
            stop,
            with_scores: false,
        })
        .await?
        .into_strings("ZRANGE")
    }

    /// Read `(member, score)` pairs in an inclusive rank range.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> StorageResult<Vec<(String, f64)>> {
        self.execute(Command::ZRange {
            key: key.into(),
            start,
            stop,
            with_scores: true,
        })
        .await?
        .into_scored("ZRANGE")
    }

    /// Count sorted-set members.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the key holds another kind.
    pub async fn zcard(&self, key: &str) -> StorageResult<usize> {
        self.execute(Command::ZCard { key: key.into() })
            .await?
            .into_count("ZCARD")
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An ordered batch of commands awaiting execution.
#[derive(Debug)]
pub struct Pipeline {
    conn: Connection,
    commands: Vec<Command>,
}

impl Pipeline {
    /// Queue a raw command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Queue `DEL`.
    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Del {
            keys: vec![key.into()],
        })
    }

    /// Queue `RENAME`.
    pub fn rename(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.push(Command::Rename {
            from: from.into(),
            to: to.into(),
        })
    }

    /// Queue `HSET`.
    pub fn hset(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(Command::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    /// Queue `HDEL`.
    pub fn hdel(&mut self, key: impl Into<String>, field: impl Into<String>) -> &mut Self {
        self.push(Command::HDel {
            key: key.into(),
            field: field.into(),
        })
    }

    /// Queue `SADD`.
    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    /// Queue `SREM`.
    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SRem {
            key: key.into(),
            member: member.into(),
        })
    }

    /// Queue `RPUSH`.
    pub fn rpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.push(Command::RPush {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Queue `LREM`.
    pub fn lrem(
        &mut self,
        key: impl Into<String>,
        count: i64,
        value: impl Into<String>,
    ) -> &mut Self {
        self.push(Command::LRem {
            key: key.into(),
            count,
            value: value.into(),
        })
    }

    /// Queue `ZADD`.
    pub fn zadd(
        &mut self,
        key: impl Into<String>,
        score: f64,
        member: impl Into<String>,
    ) -> &mut Self {
        self.push(Command::ZAdd {
            key: key.into(),
            score,
            member: member.into(),
        })
    }

    /// Queue `ZREM`.
    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::ZRem {
            key: key.into(),
            member: member.into(),
        })
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Execute every queued command in one pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the store.
    pub async fn execute(self) -> StorageResult<Vec<Reply>> {
        if self.commands.is_empty() {
            return Ok(Vec::new());
        }
        self.conn.inner.execute_pipeline(self.commands).await
    }

    /// Execute queued commands in pipelines of at most `batch_size`,
    /// returning the number of pipelines sent.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by the store. Batches sent before
    /// the failure stay applied.
    pub async fn execute_in_batches(self, batch_size: usize) -> StorageResult<usize> {
        let batch_size = batch_size.max(1);
        let mut remaining = self.commands;
        let mut batches: usize = 0;
        while !remaining.is_empty() {
            let rest = remaining.split_off(batch_size.min(remaining.len()));
            self.conn.inner.execute_pipeline(remaining).await?;
            batches = batches.saturating_add(1);
            remaining = rest;
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn conn() -> Connection {
        Connection::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn test_hash_helpers() {
        let c = conn();
        assert!(c.hset("h", "f", "v").await.unwrap());
        assert!(!c.hset("h", "f", "w").await.unwrap());
        assert_eq!(c.hget("h", "f").await.unwrap().as_deref(), Some("w"));
        assert_eq!(c.hlen("h").await.unwrap(), 1);
        assert!(c.hdel("h", "f").await.unwrap());
        assert!(!c.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_kind_reports_none_for_missing() {
        let c = conn();
        assert_eq!(c.kind("nope").await.unwrap(), None);
        c.sadd("s", "m").await.unwrap();
        assert_eq!(c.kind("s").await.unwrap(), Some(ValueKind::Set));
    }

    #[tokio::test]
    async fn test_scan_all_drains_small_batches() {
        let c = conn();
        for i in 0..25 {
            c.hset(&format!("user:{i}:object"), "id", &i.to_string())
                .await
                .unwrap();
        }
        c.zadd("user:instances", 1.0, "0").await.unwrap();
        let keys = c.scan_all("user:*:object", None, 4).await.unwrap();
        assert_eq!(keys.len(), 25);
    }

    #[tokio::test]
    async fn test_zrange_with_scores() {
        let c = conn();
        c.zadd("z", 2.0, "b").await.unwrap();
        c.zadd("z", 1.0, "a").await.unwrap();
        let pairs = c.zrange_with_scores("z", 0, -1).await.unwrap();
        assert_eq!(pairs, vec![("a".to_string(), 1.0), ("b".to_string(), 2.0)]);
        assert_eq!(c.zscore("z", "b").await.unwrap(), Some(2.0));
    }

    #[tokio::test]
    async fn test_batching_does_not_change_result() {
        let one = conn();
        let many = conn();
        for c in [&one, &many] {
            let mut p = c.pipeline();
            for i in 0..10 {
                p.zadd("z", f64::from(i), i.to_string());
            }
            let batch = if std::ptr::eq(c, &one) { 100 } else { 3 };
            p.execute_in_batches(batch).await.unwrap();
        }
        assert_eq!(
            one.zrange_with_scores("z", 0, -1).await.unwrap(),
            many.zrange_with_scores("z", 0, -1).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_execute_in_batches_counts_pipelines() {
        let c = conn();
        let mut p = c.pipeline();
        for i in 0..7 {
            p.sadd("s", i.to_string());
        }
        assert_eq!(p.execute_in_batches(3).await.unwrap(), 3);
        assert_eq!(c.scard("s").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_noop() {
        let c = conn();
        assert!(c.pipeline().execute().await.unwrap().is_empty());
    }
}
