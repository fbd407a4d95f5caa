//! In-process keyspace shared by the in-memory and `SurrealKV` backends.
//!
//! Holds typed values under string keys and applies [`Command`]s with the
//! usual store semantics: collections that become empty are removed, type
//! mismatches are errors, and `SCAN` walks keys in lexical order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;

use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};

use crate::command::{Command, Reply, ValueKind};
use crate::cursor::ScanCursors;
use crate::error::{StorageError, StorageResult};
use crate::pattern;

/// A typed value stored under one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Value {
    String(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    List(VecDeque<String>),
    SortedSet(BTreeMap<String, f64>),
}

impl Value {
    pub(crate) fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Hash(_) => ValueKind::Hash,
            Self::Set(_) => ValueKind::Set,
            Self::List(_) => ValueKind::List,
            Self::SortedSet(_) => ValueKind::SortedSet,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::String(_) => false,
            Self::Hash(h) => h.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::SortedSet(z) => z.is_empty(),
        }
    }
}

fn wrong_type(key: &str, expected: ValueKind, actual: &Value) -> StorageError {
    StorageError::WrongType {
        key: key.to_string(),
        expected: expected.as_str(),
        actual: actual.kind().as_str(),
    }
}

fn bool_reply(b: bool) -> Reply {
    Reply::Int(i64::from(b))
}

fn count_reply(n: usize) -> Reply {
    Reply::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// Resolve an inclusive `[start, stop]` range with negative indexes.
fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 {
        len.saturating_add(start).max(0)
    } else {
        start
    };
    let stop = if stop < 0 {
        len.saturating_add(stop)
    } else {
        stop.min(len.saturating_sub(1))
    };
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

/// Sorted-set members ordered by `(score, member)`.
fn ranked(zset: &BTreeMap<String, f64>) -> Vec<(&String, f64)> {
    let mut items: Vec<(&String, f64)> = zset.iter().map(|(m, s)| (m, *s)).collect();
    items.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    items
}

/// Typed key/value map with command semantics.
#[derive(Debug, Default)]
pub(crate) struct Keyspace {
    entries: BTreeMap<String, Value>,
    cursors: ScanCursors,
}

impl Keyspace {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Seed a key with a value loaded from a persistent backend.
    #[cfg(feature = "kv")]
    pub(crate) fn load(&mut self, key: String, value: Value) {
        self.entries.insert(key, value);
    }

    /// Current value of a key, if any.
    #[cfg(feature = "kv")]
    pub(crate) fn value(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    fn typed(&self, key: &str, expected: ValueKind) -> StorageResult<Option<&Value>> {
        match self.entries.get(key) {
            Some(v) if v.kind() != expected => Err(wrong_type(key, expected, v)),
            other => Ok(other),
        }
    }

    fn hash(&self, key: &str) -> StorageResult<Option<&BTreeMap<String, String>>> {
        Ok(match self.typed(key, ValueKind::Hash)? {
            Some(Value::Hash(h)) => Some(h),
            _ => None,
        })
    }

    fn set(&self, key: &str) -> StorageResult<Option<&BTreeSet<String>>> {
        Ok(match self.typed(key, ValueKind::Set)? {
            Some(Value::Set(s)) => Some(s),
            _ => None,
        })
    }

    fn list(&self, key: &str) -> StorageResult<Option<&VecDeque<String>>> {
        Ok(match self.typed(key, ValueKind::List)? {
            Some(Value::List(l)) => Some(l),
            _ => None,
        })
    }

    fn zset(&self, key: &str) -> StorageResult<Option<&BTreeMap<String, f64>>> {
        Ok(match self.typed(key, ValueKind::SortedSet)? {
            Some(Value::SortedSet(z)) => Some(z),
            _ => None,
        })
    }

    fn hash_mut(&mut self, key: &str) -> StorageResult<&mut BTreeMap<String, String>> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(BTreeMap::new()))
        {
            Value::Hash(h) => Ok(h),
            other => Err(wrong_type(key, ValueKind::Hash, other)),
        }
    }

    fn set_mut(&mut self, key: &str) -> StorageResult<&mut BTreeSet<String>> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(BTreeSet::new()))
        {
            Value::Set(s) => Ok(s),
            other => Err(wrong_type(key, ValueKind::Set, other)),
        }
    }

    fn list_mut(&mut self, key: &str) -> StorageResult<&mut VecDeque<String>> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()))
        {
            Value::List(l) => Ok(l),
            other => Err(wrong_type(key, ValueKind::List, other)),
        }
    }

    fn zset_mut(&mut self, key: &str) -> StorageResult<&mut BTreeMap<String, f64>> {
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Value::SortedSet(BTreeMap::new()))
        {
            Value::SortedSet(z) => Ok(z),
            other => Err(wrong_type(key, ValueKind::SortedSet, other)),
        }
    }

    /// Drop a collection that became empty.
    fn prune(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(Value::is_empty) {
            self.entries.remove(key);
        }
    }

    /// Answer a read-only command.
    pub(crate) fn query(&self, command: &Command) -> StorageResult<Reply> {
        match command {
            Command::Get { key } => Ok(match self.typed(key, ValueKind::String)? {
                Some(Value::String(s)) => Reply::Bulk(s.clone()),
                _ => Reply::Nil,
            }),
            Command::Exists { key } => Ok(bool_reply(self.entries.contains_key(key))),
            Command::Type { key } => Ok(Reply::Bulk(
                self.entries
                    .get(key)
                    .map_or("none", |v| v.kind().as_str())
                    .to_string(),
            )),
            Command::Scan {
                cursor,
                pattern,
                count,
                kind,
            } => self.scan(*cursor, pattern.as_deref(), *count, *kind),
            Command::HGet { key, field } => Ok(self
                .hash(key)?
                .and_then(|h| h.get(field))
                .map_or(Reply::Nil, |v| Reply::Bulk(v.clone()))),
            Command::HGetAll { key } => Ok(Reply::Array(
                self.hash(key)?
                    .into_iter()
                    .flatten()
                    .flat_map(|(f, v)| [Reply::Bulk(f.clone()), Reply::Bulk(v.clone())])
                    .collect(),
            )),
            Command::HLen { key } => Ok(count_reply(self.hash(key)?.map_or(0, BTreeMap::len))),
            Command::SMembers { key } => Ok(Reply::Array(
                self.set(key)?
                    .into_iter()
                    .flatten()
                    .map(|m| Reply::Bulk(m.clone()))
                    .collect(),
            )),
            Command::SIsMember { key, member } => Ok(bool_reply(
                self.set(key)?.is_some_and(|s| s.contains(member)),
            )),
            Command::SCard { key } => Ok(count_reply(self.set(key)?.map_or(0, BTreeSet::len))),
            Command::SRandMember { key, count } => {
                let mut rng = rand::thread_rng();
                let sample = self
                    .set(key)?
                    .map(|s| s.iter().choose_multiple(&mut rng, *count))
                    .unwrap_or_default();
                Ok(Reply::Array(
                    sample.into_iter().map(|m| Reply::Bulk(m.clone())).collect(),
                ))
            },
            Command::LRange { key, start, stop } => {
                let Some(list) = self.list(key)? else {
                    return Ok(Reply::Array(Vec::new()));
                };
                let items = normalize_range(*start, *stop, list.len())
                    .map(|(lo, hi)| {
                        list.range(lo..=hi)
                            .map(|v| Reply::Bulk(v.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Reply::Array(items))
            },
            Command::LLen { key } => Ok(count_reply(self.list(key)?.map_or(0, VecDeque::len))),
            Command::ZScore { key, member } => Ok(self
                .zset(key)?
                .and_then(|z| z.get(member))
                .map_or(Reply::Nil, |s| Reply::Float(*s))),
            Command::ZRange {
                key,
                start,
                stop,
                with_scores,
            } => {
                let Some(zset) = self.zset(key)? else {
                    return Ok(Reply::Array(Vec::new()));
                };
                let ranked = ranked(zset);
                let items = normalize_range(*start, *stop, ranked.len())
                    .map(|(lo, hi)| {
                        ranked[lo..=hi]
                            .iter()
                            .map(|(m, s)| {
                                if *with_scores {
                                    Reply::Array(vec![Reply::Bulk((*m).clone()), Reply::Float(*s)])
                                } else {
                                    Reply::Bulk((*m).clone())
                                }
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Reply::Array(items))
            },
            Command::ZCard { key } => Ok(count_reply(self.zset(key)?.map_or(0, BTreeMap::len))),
            other => Err(StorageError::Internal(format!(
                "{} is not a read-only command",
                other.name()
            ))),
        }
    }

    /// Apply any command, mutating the keyspace for writes.
    #[allow(clippy::too_many_lines)]
    pub(crate) fn apply(&mut self, command: Command) -> StorageResult<Reply> {
        if command.is_read_only() {
            return self.query(&command);
        }
        match command {
            Command::Set { key, value } => {
                self.entries.insert(key, Value::String(value));
                Ok(Reply::Ok)
            },
            Command::Del { keys } => {
                let removed = keys
                    .iter()
                    .filter(|k| self.entries.remove(k.as_str()).is_some())
                    .count();
                Ok(count_reply(removed))
            },
            Command::Rename { from, to } => {
                let value = self
                    .entries
                    .remove(&from)
                    .ok_or_else(|| StorageError::NoSuchKey(from.clone()))?;
                self.entries.insert(to, value);
                Ok(Reply::Ok)
            },
            Command::HSet { key, field, value } => {
                let inserted = self.hash_mut(&key)?.insert(field, value).is_none();
                Ok(bool_reply(inserted))
            },
            Command::HDel { key, field } => {
                let removed = match self.entries.get_mut(&key) {
                    Some(Value::Hash(h)) => h.remove(&field).is_some(),
                    Some(other) => return Err(wrong_type(&key, ValueKind::Hash, other)),
                    None => false,
                };
                self.prune(&key);
                Ok(bool_reply(removed))
            },
            Command::SAdd { key, member } => {
                let inserted = self.set_mut(&key)?.insert(member);
                Ok(bool_reply(inserted))
            },
            Command::SRem { key, member } => {
                let removed = match self.entries.get_mut(&key) {
                    Some(Value::Set(s)) => s.remove(&member),
                    Some(other) => return Err(wrong_type(&key, ValueKind::Set, other)),
                    None => false,
                };
                self.prune(&key);
                Ok(bool_reply(removed))
            },
            Command::RPush { key, value } => {
                let list = self.list_mut(&key)?;
                list.push_back(value);
                Ok(count_reply(list.len()))
            },
            Command::LRem { key, count, value } => {
                let removed = match self.entries.get_mut(&key) {
                    Some(Value::List(l)) => remove_from_list(l, count, &value),
                    Some(other) => return Err(wrong_type(&key, ValueKind::List, other)),
                    None => 0,
                };
                self.prune(&key);
                Ok(count_reply(removed))
            },
            Command::ZAdd { key, score, member } => {
                if score.is_nan() {
                    return Err(StorageError::Internal("score is not a number".to_string()));
                }
                let inserted = self.zset_mut(&key)?.insert(member, score).is_none();
                Ok(bool_reply(inserted))
            },
            Command::ZRem { key, member } => {
                let removed = match self.entries.get_mut(&key) {
                    Some(Value::SortedSet(z)) => z.remove(&member).is_some(),
                    Some(other) => return Err(wrong_type(&key, ValueKind::SortedSet, other)),
                    None => false,
                };
                self.prune(&key);
                Ok(bool_reply(removed))
            },
            other => self.query(&other),
        }
    }

    fn scan(
        &self,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
        kind: Option<ValueKind>,
    ) -> StorageResult<Reply> {
        let matcher = pattern.map(pattern::compile).transpose()?;
        let after = self.cursors.resume(cursor)?;
        let lower = after.as_deref().map_or(Bound::Unbounded, Bound::Excluded);
        let count = count.max(1);

        let mut last: Option<&str> = None;
        let mut keys = Vec::new();
        for (key, value) in self
            .entries
            .range::<str, _>((lower, Bound::Unbounded))
            .take(count)
        {
            last = Some(key);
            if kind.is_some_and(|k| value.kind() != k) {
                continue;
            }
            if matcher.as_ref().is_some_and(|m| !m.is_match(key)) {
                continue;
            }
            keys.push(key.clone());
        }

        let cursor = match last {
            Some(last)
                if self
                    .entries
                    .range::<str, _>((Bound::Excluded(last), Bound::Unbounded))
                    .next()
                    .is_some() =>
            {
                self.cursors.park(last.to_string())?
            },
            _ => 0,
        };
        Ok(Reply::Scan { cursor, keys })
    }
}

/// `LREM` semantics: 0 removes all, positive from the head, negative from the tail.
fn remove_from_list(list: &mut VecDeque<String>, count: i64, value: &str) -> usize {
    let limit = if count == 0 {
        usize::MAX
    } else {
        usize::try_from(count.unsigned_abs()).unwrap_or(usize::MAX)
    };
    let mut removed: usize = 0;
    let mut kept = VecDeque::with_capacity(list.len());
    if count < 0 {
        for item in list.drain(..).rev() {
            if removed < limit && item == value {
                removed = removed.saturating_add(1);
            } else {
                kept.push_front(item);
            }
        }
    } else {
        for item in list.drain(..) {
            if removed < limit && item == value {
                removed = removed.saturating_add(1);
            } else {
                kept.push_back(item);
            }
        }
    }
    *list = kept;
    removed
}
