//! Command and reply model for the key-value boundary.
//!
//! A [`Command`] is one primitive operation against a single key (or, for
//! `DEL` and `SCAN`, against the keyspace). Backends answer every command
//! with a [`Reply`]. The typed helpers on [`Connection`](crate::Connection)
//! convert replies into plain Rust values so callers rarely touch this
//! module directly.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// The kind of value stored at a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Plain string value.
    String,
    /// Field/value map.
    Hash,
    /// Unordered set of unique members.
    Set,
    /// Ordered list allowing duplicates.
    List,
    /// Set of unique members ordered by score.
    #[serde(rename = "zset")]
    SortedSet,
}

impl ValueKind {
    /// Wire name of the kind, as returned by `TYPE`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Hash => "hash",
            Self::Set => "set",
            Self::List => "list",
            Self::SortedSet => "zset",
        }
    }

    /// Parse a wire name returned by `TYPE`. `"none"` maps to `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Self::String),
            "hash" => Some(Self::Hash),
            "set" => Some(Self::Set),
            "list" => Some(Self::List),
            "zset" => Some(Self::SortedSet),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single key-value store command.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    // -- Keyspace --
    /// Read a string value.
    Get { key: String },
    /// Write a string value.
    Set { key: String, value: String },
    /// Delete keys of any kind.
    Del { keys: Vec<String> },
    /// Check whether a key exists.
    Exists { key: String },
    /// Report the kind stored at a key.
    Type { key: String },
    /// Atomically replace `to` with the value at `from`.
    Rename { from: String, to: String },
    /// Incrementally iterate the keyspace.
    Scan {
        cursor: u64,
        pattern: Option<String>,
        count: usize,
        kind: Option<ValueKind>,
    },

    // -- Hash --
    /// Read one hash field.
    HGet { key: String, field: String },
    /// Write one hash field.
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// Delete one hash field.
    HDel { key: String, field: String },
    /// Read every field of a hash.
    HGetAll { key: String },
    /// Count the fields of a hash.
    HLen { key: String },

    // -- Set --
    /// Add a set member.
    SAdd { key: String, member: String },
    /// Remove a set member.
    SRem { key: String, member: String },
    /// Read every set member.
    SMembers { key: String },
    /// Check set membership.
    SIsMember { key: String, member: String },
    /// Count set members.
    SCard { key: String },
    /// Sample up to `count` distinct members.
    SRandMember { key: String, count: usize },

    // -- List --
    /// Append to the tail of a list.
    RPush { key: String, value: String },
    /// Remove occurrences of `value` (0 = all, >0 from head, <0 from tail).
    LRem {
        key: String,
        count: i64,
        value: String,
    },
    /// Read an inclusive index range (negative indexes count from the tail).
    LRange { key: String, start: i64, stop: i64 },
    /// Count list elements.
    LLen { key: String },

    // -- Sorted set --
    /// Add a member or update its score.
    ZAdd {
        key: String,
        score: f64,
        member: String,
    },
    /// Remove a member.
    ZRem { key: String, member: String },
    /// Read a member's score.
    ZScore { key: String, member: String },
    /// Read an inclusive rank range, lowest score first.
    ZRange {
        key: String,
        start: i64,
        stop: i64,
        with_scores: bool,
    },
    /// Count members.
    ZCard { key: String },
}

impl Command {
    /// Upper-case command name, for logs and error messages.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::Set { .. } => "SET",
            Self::Del { .. } => "DEL",
            Self::Exists { .. } => "EXISTS",
            Self::Type { .. } => "TYPE",
            Self::Rename { .. } => "RENAME",
            Self::Scan { .. } => "SCAN",
            Self::HGet { .. } => "HGET",
            Self::HSet { .. } => "HSET",
            Self::HDel { .. } => "HDEL",
            Self::HGetAll { .. } => "HGETALL",
            Self::HLen { .. } => "HLEN",
            Self::SAdd { .. } => "SADD",
            Self::SRem { .. } => "SREM",
            Self::SMembers { .. } => "SMEMBERS",
            Self::SIsMember { .. } => "SISMEMBER",
            Self::SCard { .. } => "SCARD",
            Self::SRandMember { .. } => "SRANDMEMBER",
            Self::RPush { .. } => "RPUSH",
            Self::LRem { .. } => "LREM",
            Self::LRange { .. } => "LRANGE",
            Self::LLen { .. } => "LLEN",
            Self::ZAdd { .. } => "ZADD",
            Self::ZRem { .. } => "ZREM",
            Self::ZScore { .. } => "ZSCORE",
            Self::ZRange { .. } => "ZRANGE",
            Self::ZCard { .. } => "ZCARD",
        }
    }

    /// Whether the command leaves the keyspace untouched.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Get { .. }
                | Self::Exists { .. }
                | Self::Type { .. }
                | Self::Scan { .. }
                | Self::HGet { .. }
                | Self::HGetAll { .. }
                | Self::HLen { .. }
                | Self::SMembers { .. }
                | Self::SIsMember { .. }
                | Self::SCard { .. }
                | Self::SRandMember { .. }
                | Self::LRange { .. }
                | Self::LLen { .. }
                | Self::ZScore { .. }
                | Self::ZRange { .. }
                | Self::ZCard { .. }
        )
    }

    /// Keys named by the command. `SCAN` names none.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Del { keys } => keys.iter().map(String::as_str).collect(),
            Self::Rename { from, to } => vec![from.as_str(), to.as_str()],
            Self::Scan { .. } => Vec::new(),
            Self::Get { key }
            | Self::Set { key, .. }
            | Self::Exists { key }
            | Self::Type { key }
            | Self::HGet { key, .. }
            | Self::HSet { key, .. }
            | Self::HDel { key, .. }
            | Self::HGetAll { key }
            | Self::HLen { key }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::SMembers { key }
            | Self::SIsMember { key, .. }
            | Self::SCard { key }
            | Self::SRandMember { key, .. }
            | Self::RPush { key, .. }
            | Self::LRem { key, .. }
            | Self::LRange { key, .. }
            | Self::LLen { key }
            | Self::ZAdd { key, .. }
            | Self::ZRem { key, .. }
            | Self::ZScore { key, .. }
            | Self::ZRange { key, .. }
            | Self::ZCard { key } => vec![key.as_str()],
        }
    }
}

/// A reply from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// Absent value.
    Nil,
    /// Acknowledgement without a payload.
    Ok,
    /// Integer payload (counts, booleans).
    Int(i64),
    /// Floating-point payload (scores).
    Float(f64),
    /// String payload.
    Bulk(String),
    /// Nested replies.
    Array(Vec<Reply>),
    /// One page of a keyspace scan.
    Scan {
        /// Cursor for the next call; `0` when the iteration is complete.
        cursor: u64,
        /// Keys matched in this page.
        keys: Vec<String>,
    },
}

impl Reply {
    fn unexpected(self, command: &'static str) -> StorageError {
        StorageError::UnexpectedReply {
            command,
            reply: format!("{self:?}"),
        }
    }

    /// Interpret as an optional string.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_opt_string(self, command: &'static str) -> StorageResult<Option<String>> {
        match self {
            Self::Nil => Ok(None),
            Self::Bulk(s) => Ok(Some(s)),
            other => Err(other.unexpected(command)),
        }
    }

    /// Interpret as an integer.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_int(self, command: &'static str) -> StorageResult<i64> {
        match self {
            Self::Int(n) => Ok(n),
            other => Err(other.unexpected(command)),
        }
    }

    /// Interpret as a non-negative count.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_count(self, command: &'static str) -> StorageResult<usize> {
        match self {
            Self::Int(n) => usize::try_from(n).map_err(|_| Self::Int(n).unexpected(command)),
            other => Err(other.unexpected(command)),
        }
    }

    /// Interpret an integer reply as a boolean (non-zero is `true`).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_bool(self, command: &'static str) -> StorageResult<bool> {
        self.into_int(command).map(|n| n != 0)
    }

    /// Interpret as an optional score.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_opt_float(self, command: &'static str) -> StorageResult<Option<f64>> {
        match self {
            Self::Nil => Ok(None),
            Self::Float(f) => Ok(Some(f)),
            other => Err(other.unexpected(command)),
        }
    }

    /// Interpret as a flat list of strings.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_strings(self, command: &'static str) -> StorageResult<Vec<String>> {
        match self {
            Self::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Self::Bulk(s) => Ok(s),
                    other => Err(other.unexpected(command)),
                })
                .collect(),
            other => Err(other.unexpected(command)),
        }
    }

    /// Interpret a flattened `[field, value, ...]` array as a map.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_map(
        self,
        command: &'static str,
    ) -> StorageResult<std::collections::BTreeMap<String, String>> {
        let flat = self.into_strings(command)?;
        let mut map = std::collections::BTreeMap::new();
        let mut iter = flat.into_iter();
        while let Some(field) = iter.next() {
            let value = iter.next().ok_or_else(|| StorageError::UnexpectedReply {
                command,
                reply: "odd number of hash elements".to_string(),
            })?;
            map.insert(field, value);
        }
        Ok(map)
    }

    /// Interpret as `[[member, score], ...]` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_scored(self, command: &'static str) -> StorageResult<Vec<(String, f64)>> {
        match self {
            Self::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Self::Array(pair) => match <[Reply; 2]>::try_from(pair) {
                        Ok([Self::Bulk(member), Self::Float(score)]) => Ok((member, score)),
                        Ok(other) => Err(Self::Array(other.to_vec()).unexpected(command)),
                        Err(pair) => Err(Self::Array(pair).unexpected(command)),
                    },
                    other => Err(other.unexpected(command)),
                })
                .collect(),
            other => Err(other.unexpected(command)),
        }
    }

    /// Interpret as one scan page.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedReply`] for any other shape.
    pub fn into_scan(self, command: &'static str) -> StorageResult<(u64, Vec<String>)> {
        match self {
            Self::Scan { cursor, keys } => Ok((cursor, keys)),
            other => Err(other.unexpected(command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_wire_names() {
        for kind in [
            ValueKind::String,
            ValueKind::Hash,
            ValueKind::Set,
            ValueKind::List,
            ValueKind::SortedSet,
        ] {
            assert_eq!(ValueKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ValueKind::parse("none"), None);
    }

    #[test]
    fn test_read_only_classification() {
        assert!(Command::SMembers { key: "k".into() }.is_read_only());
        assert!(
            !Command::SAdd {
                key: "k".into(),
                member: "m".into()
            }
            .is_read_only()
        );
    }

    #[test]
    fn test_rename_names_both_keys() {
        let cmd = Command::Rename {
            from: "a".into(),
            to: "b".into(),
        };
        assert_eq!(cmd.keys(), vec!["a", "b"]);
        assert_eq!(cmd.name(), "RENAME");
    }

    #[test]
    fn test_into_map_pairs_fields() {
        let reply = Reply::Array(vec![
            Reply::Bulk("email".into()),
            Reply::Bulk("a@example.com".into()),
        ]);
        let map = reply.into_map("HGETALL").unwrap();
        assert_eq!(map.get("email").map(String::as_str), Some("a@example.com"));
    }

    #[test]
    fn test_into_map_rejects_odd_length() {
        let reply = Reply::Array(vec![Reply::Bulk("email".into())]);
        assert!(reply.into_map("HGETALL").is_err());
    }

    #[test]
    fn test_into_scored_rejects_malformed_pair() {
        let reply = Reply::Array(vec![Reply::Array(vec![Reply::Bulk("m".into())])]);
        assert!(reply.into_scored("ZRANGE").is_err());
    }

    #[test]
    fn test_into_opt_string_rejects_int() {
        assert!(Reply::Int(1).into_opt_string("GET").is_err());
    }
}
