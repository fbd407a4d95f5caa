//! Unique index: field value → one identifier.
//!
//! Stored as one hash per namespace. Global indexes live at
//! `<model>:<field>_index`; indexes scoped within a parent type live at
//! `<parent_type>:<parent_id>:<model>_<field>_index` and are addressed
//! through [`UniqueIndex::within`].

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{KinshipError, KinshipResult};
use crate::model::{IndexDecl, Scope};
use crate::record::Record;
use crate::repository::Repository;

/// Handle to one declared unique index.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    repo: Repository,
    model: String,
    decl: IndexDecl,
    parent_id: Option<String>,
}

impl UniqueIndex {
    pub(crate) fn new(repo: Repository, model: &str, decl: IndexDecl) -> Self {
        Self {
            repo,
            model: model.to_string(),
            decl,
            parent_id: None,
        }
    }

    /// The declaration this handle is bound to.
    #[must_use]
    pub fn decl(&self) -> &IndexDecl {
        &self.decl
    }

    /// Bind to one parent instance.
    #[must_use]
    pub fn within(&self, parent_id: &str) -> Self {
        Self {
            parent_id: Some(parent_id.to_string()),
            ..self.clone()
        }
    }

    /// Storage key of this namespace.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for a scoped index not yet
    /// bound with [`within`](Self::within).
    pub fn key(&self) -> KinshipResult<String> {
        let keys = self.repo.keys();
        match (&self.decl.scope, &self.parent_id) {
            (Scope::Global, _) => Ok(keys.unique_index_key(&self.model, &self.decl.name)),
            (Scope::Within(parent_type), Some(parent_id)) => {
                Ok(keys.scoped_key(parent_type, parent_id, &self.decl.name))
            },
            (Scope::Within(parent_type), None) => Err(KinshipError::InvalidArgument(format!(
                "{}.{} is unique within {parent_type}; bind a parent with within()",
                self.model, self.decl.field
            ))),
        }
    }

    /// Map `value` to `identifier`, replacing any previous owner.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn set(&self, value: &str, identifier: &str) -> KinshipResult<()> {
        self.repo
            .connection()
            .hset(&self.key()?, value, identifier)
            .await?;
        Ok(())
    }

    /// The identifier owning `value`.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn get(&self, value: &str) -> KinshipResult<Option<String>> {
        Ok(self.repo.connection().hget(&self.key()?, value).await?)
    }

    /// Drop the entry for `value`; `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn remove(&self, value: &str) -> KinshipResult<bool> {
        Ok(self.repo.connection().hdel(&self.key()?, value).await?)
    }

    /// Fail if `value` already belongs to an identifier other than
    /// `identifier`.
    ///
    /// The check and the later write are separate commands; two writers
    /// racing for the same value can both pass.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::RecordExists`] on conflict.
    pub async fn guard(&self, value: &str, identifier: &str) -> KinshipResult<()> {
        match self.get(value).await? {
            Some(existing) if existing != identifier => Err(KinshipError::RecordExists {
                model: self.model.clone(),
                field: self.decl.field.clone(),
                value: value.to_string(),
                existing,
                attempted: identifier.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Every `value → identifier` entry.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn entries(&self) -> KinshipResult<BTreeMap<String, String>> {
        Ok(self.repo.connection().hgetall(&self.key()?).await?)
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn len(&self) -> KinshipResult<usize> {
        Ok(self.repo.connection().hlen(&self.key()?).await?)
    }

    /// Whether the index is empty.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn is_empty(&self) -> KinshipResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Load the record owning `value`.
    ///
    /// An entry whose record is gone, or no longer holds `value`, resolves
    /// to `None`.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn find(&self, value: &str) -> KinshipResult<Option<Record>> {
        let Some(identifier) = self.get(value).await? else {
            return Ok(None);
        };
        let records = self.repo.records();
        let record = records.load(&self.model, &identifier).await?;
        Ok(record.filter(|r| records.field_value(r, &self.decl.field) == Some(value)))
    }

    /// Recompute a global index from live records and swap it in, returning
    /// the entry count.
    ///
    /// When two live records hold the same value the one later in key
    /// order wins and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for a scoped index (its
    /// parent membership is not recorded on the records) and storage errors
    /// unchanged.
    pub async fn rebuild(&self, batch_size: usize) -> KinshipResult<usize> {
        if !self.decl.is_global() {
            return Err(KinshipError::InvalidArgument(format!(
                "{}.{} is scoped ({}); only global indexes can be rebuilt",
                self.model, self.decl.field, self.decl.scope
            )));
        }
        let key = self.key()?;
        let records = self.repo.records();
        let mut entries: BTreeMap<String, String> = BTreeMap::new();
        for id in self.repo.live_identifiers(&self.model, batch_size).await? {
            let Some(record) = records.load(&self.model, &id).await? else {
                continue;
            };
            let Some(value) = records.field_value(&record, &self.decl.field) else {
                continue;
            };
            if let Some(previous) = entries.insert(value.to_string(), id.clone()) {
                warn!(
                    model = %self.model,
                    field = %self.decl.field,
                    value,
                    previous = %previous,
                    winner = %id,
                    "duplicate unique value during rebuild"
                );
            }
        }

        let temp = self.repo.keys().temp_key(&key);
        let mut pipe = self.repo.connection().pipeline();
        for (value, id) in &entries {
            pipe.hset(temp.clone(), value.clone(), id.clone());
        }
        if entries.is_empty() {
            pipe.del(key);
        } else {
            pipe.rename(temp, key);
        }
        pipe.execute_in_batches(batch_size).await?;
        info!(model = %self.model, index = %self.decl.name, entries = entries.len(), "unique index rebuilt");
        Ok(entries.len())
    }
}
