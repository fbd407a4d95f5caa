//! The record layer boundary.
//!
//! The relationship layer only needs four things from the records it
//! indexes: an identifier, field values, an existence check and a loader.
//! [`HashRecords`] stores each record as a hash at its canonical key.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kinship_storage::Connection;
use serde::{Deserialize, Serialize};

use crate::error::KinshipResult;
use crate::keys::KeySchema;

/// A primary record: a model type, an identifier and string fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Model type.
    pub model: String,
    /// Identifier, possibly containing the key delimiter.
    pub identifier: String,
    /// Field values.
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Create a record with no fields.
    #[must_use]
    pub fn new(model: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            identifier: identifier.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Set a field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Read a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Access to primary records.
#[async_trait]
pub trait RecordLayer: Send + Sync {
    /// The identifier of a record.
    fn identifier_of<'a>(&self, record: &'a Record) -> &'a str {
        &record.identifier
    }

    /// A field value, `None` when absent or empty.
    fn field_value<'a>(&self, record: &'a Record, field: &str) -> Option<&'a str> {
        record.get(field).filter(|v| !v.is_empty())
    }

    /// Whether the record exists.
    async fn exists(&self, model: &str, identifier: &str) -> KinshipResult<bool>;

    /// Load a whole record.
    async fn load(&self, model: &str, identifier: &str) -> KinshipResult<Option<Record>>;
}

/// Records stored as hashes at `<model>:<id>:<suffix>`.
#[derive(Debug, Clone)]
pub struct HashRecords {
    conn: Connection,
    keys: KeySchema,
}

impl HashRecords {
    /// Create a record layer over `conn`.
    #[must_use]
    pub fn new(conn: Connection, keys: KeySchema) -> Self {
        Self { conn, keys }
    }
}

#[async_trait]
impl RecordLayer for HashRecords {
    async fn exists(&self, model: &str, identifier: &str) -> KinshipResult<bool> {
        Ok(self
            .conn
            .exists(&self.keys.object_key(model, identifier))
            .await?)
    }

    async fn load(&self, model: &str, identifier: &str) -> KinshipResult<Option<Record>> {
        let fields = self
            .conn
            .hgetall(&self.keys.object_key(model, identifier))
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Record {
            model: model.to_string(),
            identifier: identifier.to_string(),
            fields,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kinship_storage::MemoryKvStore;

    use super::*;

    #[tokio::test]
    async fn test_load_and_exists() {
        let conn = Connection::new(Arc::new(MemoryKvStore::new()));
        let records = HashRecords::new(conn.clone(), KeySchema::default());
        conn.hset("user:a:b:object", "email", "x@example.com")
            .await
            .unwrap();

        assert!(records.exists("user", "a:b").await.unwrap());
        let record = records.load("user", "a:b").await.unwrap().unwrap();
        assert_eq!(records.identifier_of(&record), "a:b");
        assert_eq!(records.field_value(&record, "email"), Some("x@example.com"));
        assert!(records.load("user", "zzz").await.unwrap().is_none());
    }

    #[test]
    fn test_empty_field_is_absent() {
        struct Nothing;
        #[async_trait]
        impl RecordLayer for Nothing {
            async fn exists(&self, _: &str, _: &str) -> KinshipResult<bool> {
                Ok(false)
            }
            async fn load(&self, _: &str, _: &str) -> KinshipResult<Option<Record>> {
                Ok(None)
            }
        }
        let record = Record::new("user", "u1").with_field("email", "");
        assert_eq!(Nothing.field_value(&record, "email"), None);
    }
}
