//! Participation collections: owner-side collections of dependent
//! identifiers, with reverse navigation from the dependent side.
//!
//! The collection kind fixes the storage primitive:
//!
//! | Kind | Read | Remove |
//! |------|------|--------|
//! | [`CollectionKind::Set`] | `SMEMBERS` | `SREM` |
//! | [`CollectionKind::List`] | `LRANGE 0 -1` | `LREM 0` |
//! | [`CollectionKind::SortedSet`] | `ZRANGE 0 -1` | `ZREM` |
//!
//! Every membership is mirrored in the dependent's reverse set
//! `<model>:<id>:participations`, which holds collection keys.

use kinship_storage::Pipeline;

use crate::error::{KinshipError, KinshipResult};
use crate::model::{CollectionKind, ModelDescriptor, ParticipationDecl};
use crate::record::Record;
use crate::repository::Repository;
use crate::score::{now, timestamp_score};

/// Queue the kind-appropriate removal of `member` from the collection at
/// `key`.
pub(crate) fn queue_removal(pipe: &mut Pipeline, kind: CollectionKind, key: &str, member: &str) {
    match kind {
        CollectionKind::Set => pipe.srem(key, member),
        CollectionKind::List => pipe.lrem(key, 0, member),
        CollectionKind::SortedSet => pipe.zrem(key, member),
    };
}

/// Handle to one declared participation.
#[derive(Debug, Clone)]
pub struct Participation {
    repo: Repository,
    member_model: String,
    updated_field: String,
    created_field: String,
    decl: ParticipationDecl,
}

impl Participation {
    pub(crate) fn new(repo: Repository, desc: &ModelDescriptor, decl: ParticipationDecl) -> Self {
        Self {
            repo,
            member_model: desc.name.clone(),
            updated_field: desc.updated_field.clone(),
            created_field: desc.created_field.clone(),
            decl,
        }
    }

    /// The declaration this handle is bound to.
    #[must_use]
    pub fn decl(&self) -> &ParticipationDecl {
        &self.decl
    }

    /// The collection owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for a class participation;
    /// use [`class_collection`](Self::class_collection).
    pub fn collection(&self, owner_id: &str) -> KinshipResult<Collection> {
        if self.decl.is_class() {
            return Err(KinshipError::InvalidArgument(format!(
                "{}.{} is a class collection and has no owner instances",
                self.decl.owner_type, self.decl.collection
            )));
        }
        let key = self
            .repo
            .keys()
            .scoped_key(&self.decl.owner_type, owner_id, &self.decl.collection);
        Ok(self.bind(key))
    }

    /// The class-level collection.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for an instance
    /// participation; use [`collection`](Self::collection).
    pub fn class_collection(&self) -> KinshipResult<Collection> {
        if !self.decl.is_class() {
            return Err(KinshipError::InvalidArgument(format!(
                "{}.{} is owned by instances; pass an owner id",
                self.decl.owner_type, self.decl.collection
            )));
        }
        let key = self
            .repo
            .keys()
            .join(&[&self.decl.owner_type, &self.decl.collection]);
        Ok(self.bind(key))
    }

    fn bind(&self, key: String) -> Collection {
        Collection {
            handle: self.clone(),
            key,
        }
    }

    /// Glob matching every owner's collection key.
    #[must_use]
    pub fn collections_pattern(&self) -> String {
        self.repo
            .keys()
            .scoped_pattern(&self.decl.owner_type, &self.decl.collection)
    }

    /// Add `member` to `owner`'s collection.
    ///
    /// # Errors
    ///
    /// See [`collection`](Self::collection) and [`Collection::add`].
    pub async fn add(&self, owner: &str, member: &str, score: Option<f64>) -> KinshipResult<bool> {
        self.collection(owner)?.add(member, score).await
    }

    /// Remove `member` from `owner`'s collection.
    ///
    /// # Errors
    ///
    /// See [`collection`](Self::collection).
    pub async fn remove(&self, owner: &str, member: &str) -> KinshipResult<bool> {
        self.collection(owner)?.remove(member).await
    }

    /// Members of `owner`'s collection in native order.
    ///
    /// # Errors
    ///
    /// See [`collection`](Self::collection).
    pub async fn members(&self, owner: &str) -> KinshipResult<Vec<String>> {
        self.collection(owner)?.members().await
    }

    /// Size of `owner`'s collection.
    ///
    /// # Errors
    ///
    /// See [`collection`](Self::collection).
    pub async fn size(&self, owner: &str) -> KinshipResult<usize> {
        self.collection(owner)?.size().await
    }

    /// Whether `member` belongs to `owner`'s collection.
    ///
    /// # Errors
    ///
    /// See [`collection`](Self::collection).
    pub async fn contains(&self, owner: &str, member: &str) -> KinshipResult<bool> {
        self.collection(owner)?.contains(member).await
    }

    // -- Reverse navigation --

    async fn reverse_keys(&self, member: &str) -> KinshipResult<Vec<String>> {
        let key = self
            .repo
            .keys()
            .participations_key(&self.member_model, member);
        Ok(self.repo.connection().smembers(&key).await?)
    }

    /// Owner ids whose collection lists `member`, per the reverse set.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for a class participation.
    pub async fn owner_ids(&self, member: &str) -> KinshipResult<Vec<String>> {
        if self.decl.is_class() {
            return Err(KinshipError::InvalidArgument(format!(
                "{}.{} is a class collection and has no owner instances",
                self.decl.owner_type, self.decl.collection
            )));
        }
        let keys = self.repo.keys();
        let mut ids: Vec<String> = self
            .reverse_keys(member)
            .await?
            .iter()
            .filter_map(|key| {
                keys.parent_from_scoped_key(&self.decl.owner_type, &self.decl.collection, key)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Number of collections of this participation that list `member`.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn owner_count(&self, member: &str) -> KinshipResult<usize> {
        if self.decl.is_class() {
            let key = self.class_collection()?.key;
            let reverse = self.reverse_keys(member).await?;
            return Ok(usize::from(reverse.contains(&key)));
        }
        Ok(self.owner_ids(member).await?.len())
    }

    /// Whether `member` is listed by `owner`, per the reverse set.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for a class participation.
    pub async fn is_member_of(&self, member: &str, owner: &str) -> KinshipResult<bool> {
        let collection = self.collection(owner)?;
        let reverse = self
            .repo
            .keys()
            .participations_key(&self.member_model, member);
        Ok(self
            .repo
            .connection()
            .sismember(&reverse, &collection.key)
            .await?)
    }

    /// Load every owner record of `member`, skipping owners that no longer
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for a class participation.
    pub async fn owners(&self, member: &str) -> KinshipResult<Vec<Record>> {
        let records = self.repo.records();
        let mut out = Vec::new();
        for id in self.owner_ids(member).await? {
            if let Some(record) = records.load(&self.decl.owner_type, &id).await? {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn default_score(&self, member: &str) -> KinshipResult<f64> {
        Ok(self
            .repo
            .records()
            .load(&self.member_model, member)
            .await?
            .map_or_else(now, |record| {
                timestamp_score(&record.fields, &self.updated_field, &self.created_field)
            }))
    }
}

/// One owner's collection.
#[derive(Debug, Clone)]
pub struct Collection {
    handle: Participation,
    key: String,
}

impl Collection {
    /// Storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Storage kind.
    #[must_use]
    pub fn kind(&self) -> CollectionKind {
        self.handle.decl.kind
    }

    /// Add `member`; `true` if it was new.
    ///
    /// Sorted sets score by `score`, else by the member's timestamp. Lists
    /// keep one occurrence per member.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn add(&self, member: &str, score: Option<f64>) -> KinshipResult<bool> {
        let conn = self.handle.repo.connection();
        let added = match self.kind() {
            CollectionKind::Set => conn.sadd(&self.key, member).await?,
            CollectionKind::List => {
                if self.contains(member).await? {
                    false
                } else {
                    conn.rpush(&self.key, member).await?;
                    true
                }
            },
            CollectionKind::SortedSet => {
                let score = match score {
                    Some(s) => s,
                    None => self.handle.default_score(member).await?,
                };
                conn.zadd(&self.key, score, member).await?
            },
        };
        let reverse = self
            .handle
            .repo
            .keys()
            .participations_key(&self.handle.member_model, member);
        conn.sadd(&reverse, &self.key).await?;
        Ok(added)
    }

    /// Remove `member`; `true` if it was present.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn remove(&self, member: &str) -> KinshipResult<bool> {
        let reverse = self
            .handle
            .repo
            .keys()
            .participations_key(&self.handle.member_model, member);
        let mut pipe = self.handle.repo.connection().pipeline();
        queue_removal(&mut pipe, self.kind(), &self.key, member);
        pipe.srem(reverse, self.key.clone());
        let replies = pipe.execute().await?;
        match replies.into_iter().next() {
            Some(reply) => Ok(reply.into_bool("remove")?),
            None => Ok(false),
        }
    }

    /// Members in native order.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn members(&self) -> KinshipResult<Vec<String>> {
        let conn = self.handle.repo.connection();
        Ok(match self.kind() {
            CollectionKind::Set => conn.smembers(&self.key).await?,
            CollectionKind::List => conn.lrange(&self.key, 0, -1).await?,
            CollectionKind::SortedSet => conn.zrange(&self.key, 0, -1).await?,
        })
    }

    /// Number of members.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn size(&self) -> KinshipResult<usize> {
        let conn = self.handle.repo.connection();
        Ok(match self.kind() {
            CollectionKind::Set => conn.scard(&self.key).await?,
            CollectionKind::List => conn.llen(&self.key).await?,
            CollectionKind::SortedSet => conn.zcard(&self.key).await?,
        })
    }

    /// Whether `member` is present.
    ///
    /// # Errors
    ///
    /// Returns storage errors unchanged.
    pub async fn contains(&self, member: &str) -> KinshipResult<bool> {
        let conn = self.handle.repo.connection();
        Ok(match self.kind() {
            CollectionKind::Set => conn.sismember(&self.key, member).await?,
            CollectionKind::List => conn
                .lrange(&self.key, 0, -1)
                .await?
                .iter()
                .any(|m| m == member),
            CollectionKind::SortedSet => conn.zscore(&self.key, member).await?.is_some(),
        })
    }
}
