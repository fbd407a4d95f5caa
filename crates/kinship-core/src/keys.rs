//! Storage key layout.
//!
//! Every key Kinship reads or writes is assembled here. Identifiers may
//! themselves contain the delimiter (`"part1:part2"`), so identifiers are
//! recovered from keys by stripping a known prefix and suffix, never by
//! splitting on the delimiter.

use kinship_config::KeyConfig;
use kinship_storage::pattern;

/// Builds and parses storage keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    delimiter: String,
    suffix: String,
    instances: String,
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::from(&KeyConfig::default())
    }
}

impl From<&KeyConfig> for KeySchema {
    fn from(cfg: &KeyConfig) -> Self {
        Self {
            delimiter: cfg.delimiter.clone(),
            suffix: cfg.suffix.clone(),
            instances: cfg.instances.clone(),
        }
    }
}

impl KeySchema {
    /// The segment delimiter.
    #[must_use]
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Join segments with the delimiter.
    #[must_use]
    pub fn join(&self, segments: &[&str]) -> String {
        segments.join(&self.delimiter)
    }

    /// Canonical key of a primary record: `<model>:<id>:<suffix>`.
    #[must_use]
    pub fn object_key(&self, model: &str, identifier: &str) -> String {
        self.join(&[model, identifier, &self.suffix])
    }

    /// Glob matching every primary record key of `model`.
    #[must_use]
    pub fn object_pattern(&self, model: &str) -> String {
        self.pattern_between(&[model], &[&self.suffix])
    }

    /// Recover the identifier from a primary record key.
    #[must_use]
    pub fn identifier_from_key(&self, model: &str, key: &str) -> Option<String> {
        self.between(&[model], key, &[&self.suffix])
    }

    /// Timeline key: `<model>:<instances>`.
    #[must_use]
    pub fn timeline_key(&self, model: &str) -> String {
        self.join(&[model, &self.instances])
    }

    /// Key of a globally scoped unique index: `<model>:<name>`.
    #[must_use]
    pub fn unique_index_key(&self, model: &str, name: &str) -> String {
        self.join(&[model, name])
    }

    /// Key of a structure owned by one parent instance:
    /// `<parent_type>:<parent_id>:<name>`.
    #[must_use]
    pub fn scoped_key(&self, parent_type: &str, parent_id: &str, name: &str) -> String {
        self.join(&[parent_type, parent_id, name])
    }

    /// Glob matching [`scoped_key`](Self::scoped_key) for every parent id.
    #[must_use]
    pub fn scoped_pattern(&self, parent_type: &str, name: &str) -> String {
        self.pattern_between(&[parent_type], &[name])
    }

    /// Recover the parent id from a [`scoped_key`](Self::scoped_key).
    #[must_use]
    pub fn parent_from_scoped_key(
        &self,
        parent_type: &str,
        name: &str,
        key: &str,
    ) -> Option<String> {
        self.between(&[parent_type], key, &[name])
    }

    /// Prefix shared by every value set of a multi index; the value is
    /// appended after one more delimiter.
    #[must_use]
    pub fn multi_index_base(&self, model: &str, name: &str) -> String {
        self.join(&[model, name])
    }

    /// Append a value segment to a base key.
    #[must_use]
    pub fn with_value(&self, base: &str, value: &str) -> String {
        self.join(&[base, value])
    }

    /// Glob matching every value key under `base`.
    #[must_use]
    pub fn values_pattern(&self, base: &str) -> String {
        format!("{}{}*", pattern::escape(base), pattern::escape(&self.delimiter))
    }

    /// Recover the value from a key produced by [`with_value`](Self::with_value).
    #[must_use]
    pub fn value_from_key(&self, base: &str, key: &str) -> Option<String> {
        key.strip_prefix(base)?
            .strip_prefix(self.delimiter.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Reverse-navigation set of a dependent record:
    /// `<model>:<id>:participations`.
    #[must_use]
    pub fn participations_key(&self, model: &str, identifier: &str) -> String {
        self.join(&[model, identifier, "participations"])
    }

    /// A fresh side key used while building a replacement for `key`.
    #[must_use]
    pub fn temp_key(&self, key: &str) -> String {
        let nonce: u64 = rand::random();
        self.join(&[key, "rebuild", &format!("{nonce:016x}")])
    }

    fn between(&self, head: &[&str], key: &str, tail: &[&str]) -> Option<String> {
        let prefix = format!("{}{}", self.join(head), self.delimiter);
        let suffix = format!("{}{}", self.delimiter, self.join(tail));
        key.strip_prefix(prefix.as_str())?
            .strip_suffix(suffix.as_str())
            .filter(|middle| !middle.is_empty())
            .map(str::to_string)
    }

    fn pattern_between(&self, head: &[&str], tail: &[&str]) -> String {
        let d = pattern::escape(&self.delimiter);
        format!(
            "{}{d}*{d}{}",
            pattern::escape(&self.join(head)),
            pattern::escape(&self.join(tail))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_roundtrip() {
        let keys = KeySchema::default();
        let key = keys.object_key("user", "u1");
        assert_eq!(key, "user:u1:object");
        assert_eq!(keys.identifier_from_key("user", &key).as_deref(), Some("u1"));
    }

    #[test]
    fn test_compound_identifier_kept_whole() {
        let keys = KeySchema::default();
        let key = keys.object_key("user", "part1:part2");
        assert_eq!(
            keys.identifier_from_key("user", &key).as_deref(),
            Some("part1:part2")
        );
    }

    #[test]
    fn test_foreign_keys_rejected() {
        let keys = KeySchema::default();
        assert_eq!(keys.identifier_from_key("user", "team:1:object"), None);
        assert_eq!(keys.identifier_from_key("user", "user:instances"), None);
        assert_eq!(keys.identifier_from_key("user", "user::object"), None);
    }

    #[test]
    fn test_object_pattern_escapes_metacharacters() {
        let keys = KeySchema::default();
        assert_eq!(keys.object_pattern("user"), "user:*:object");
        assert_eq!(keys.object_pattern("a*b"), "a\\*b:*:object");
    }

    #[test]
    fn test_scoped_key_parent_extraction() {
        let keys = KeySchema::default();
        let key = keys.scoped_key("team", "t:1", "user_email_index");
        assert_eq!(key, "team:t:1:user_email_index");
        assert_eq!(
            keys.parent_from_scoped_key("team", "user_email_index", &key)
                .as_deref(),
            Some("t:1")
        );
    }

    #[test]
    fn test_value_from_key() {
        let keys = KeySchema::default();
        let base = keys.multi_index_base("user", "role_index");
        let key = keys.with_value(&base, "a:b");
        assert_eq!(keys.value_from_key(&base, &key).as_deref(), Some("a:b"));
        assert_eq!(keys.values_pattern(&base), "user:role_index:*");
    }

    #[test]
    fn test_custom_delimiter() {
        let keys = KeySchema::from(&KeyConfig {
            delimiter: "/".to_owned(),
            suffix: "rec".to_owned(),
            instances: "all".to_owned(),
        });
        assert_eq!(keys.object_key("user", "u1"), "user/u1/rec");
        assert_eq!(keys.timeline_key("user"), "user/all");
    }

    #[test]
    fn test_temp_keys_differ() {
        let keys = KeySchema::default();
        assert_ne!(keys.temp_key("user:instances"), keys.temp_key("user:instances"));
    }
}
