//! Model descriptors: the explicit declaration of a model's relationships.
//!
//! A [`ModelDescriptor`] lists every index and participation a model
//! declares. Descriptors are plain values handed to the repository and the
//! audit/repair engines; there is no global registry.
//!
//! ```rust,ignore
//! let user = ModelDescriptor::builder("user")
//!     .unique_index("email")
//!     .multi_index("role")
//!     .participates_in("team", "members", CollectionKind::SortedSet)
//!     .build()?;
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KinshipError, KinshipResult};

/// Where an index's namespace lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "parent_type")]
pub enum Scope {
    /// One namespace for the whole model type.
    Global,
    /// One namespace per instance of the named parent type.
    Within(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Within(parent) => write!(f, "within {parent}"),
        }
    }
}

/// Storage kind of a participation collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Unordered set.
    Set,
    /// Insertion-ordered list.
    List,
    /// Score-ordered set.
    SortedSet,
}

impl CollectionKind {
    /// Storage value kind backing this collection.
    #[must_use]
    pub fn value_kind(self) -> kinship_storage::ValueKind {
        match self {
            Self::Set => kinship_storage::ValueKind::Set,
            Self::List => kinship_storage::ValueKind::List,
            Self::SortedSet => kinship_storage::ValueKind::SortedSet,
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Set => "set",
            Self::List => "list",
            Self::SortedSet => "sorted_set",
        })
    }
}

/// A declared index (unique or multi).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDecl {
    /// Indexed field.
    pub field: String,
    /// Index name, used as the final key segment.
    pub name: String,
    /// Namespace.
    pub scope: Scope,
}

impl IndexDecl {
    fn new(model: &str, field: &str, scope: Scope) -> Self {
        let name = match &scope {
            Scope::Global => format!("{field}_index"),
            Scope::Within(_) => format!("{model}_{field}_index"),
        };
        Self {
            field: field.to_string(),
            name,
            scope,
        }
    }

    /// Whether the index has one namespace for the whole type.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.scope == Scope::Global
    }
}

/// How a participation's owner is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope")]
pub enum ParticipationScope {
    /// One collection on the model's own class.
    Class,
    /// One collection per owner instance.
    Instance,
    /// One collection per owner instance, with membership carried by a
    /// join model.
    Through {
        /// Join model type.
        through: String,
    },
}

/// A declared participation of the model in an owner's collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipationDecl {
    /// Owner type. For class participations this is the model itself.
    pub owner_type: String,
    /// Collection name.
    pub collection: String,
    /// Storage kind.
    pub kind: CollectionKind,
    /// Owner addressing.
    pub scope: ParticipationScope,
}

impl ParticipationDecl {
    /// Whether this is a class-level collection.
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.scope == ParticipationScope::Class
    }
}

/// Every relationship declared by one model type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model type name.
    pub name: String,
    /// Field consulted first by the timestamp cascade.
    pub updated_field: String,
    /// Field consulted second by the timestamp cascade.
    pub created_field: String,
    /// Unique indexes.
    pub unique_indexes: Vec<IndexDecl>,
    /// Multi indexes.
    pub multi_indexes: Vec<IndexDecl>,
    /// Participations.
    pub participations: Vec<ParticipationDecl>,
}

impl ModelDescriptor {
    /// Start declaring a model.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ModelDescriptorBuilder {
        ModelDescriptorBuilder {
            name: name.into(),
            updated_field: "updated".to_string(),
            created_field: "created".to_string(),
            unique_indexes: Vec::new(),
            multi_indexes: Vec::new(),
            participations: Vec::new(),
        }
    }

    /// Find a unique index by field.
    #[must_use]
    pub fn unique_index(&self, field: &str) -> Option<&IndexDecl> {
        self.unique_indexes.iter().find(|d| d.field == field)
    }

    /// Find a multi index by field.
    #[must_use]
    pub fn multi_index(&self, field: &str) -> Option<&IndexDecl> {
        self.multi_indexes.iter().find(|d| d.field == field)
    }

    /// Find a participation by owner type and collection.
    #[must_use]
    pub fn participation(&self, owner_type: &str, collection: &str) -> Option<&ParticipationDecl> {
        self.participations
            .iter()
            .find(|d| d.owner_type == owner_type && d.collection == collection)
    }

    /// Class-level participations, maintained automatically on save.
    pub fn class_participations(&self) -> impl Iterator<Item = &ParticipationDecl> {
        self.participations.iter().filter(|d| d.is_class())
    }
}

/// Builder for [`ModelDescriptor`].
#[derive(Debug, Clone)]
pub struct ModelDescriptorBuilder {
    name: String,
    updated_field: String,
    created_field: String,
    unique_indexes: Vec<IndexDecl>,
    multi_indexes: Vec<IndexDecl>,
    participations: Vec<ParticipationDecl>,
}

impl ModelDescriptorBuilder {
    /// Override the fields read by the timestamp cascade.
    #[must_use]
    pub fn timestamps(mut self, updated: impl Into<String>, created: impl Into<String>) -> Self {
        self.updated_field = updated.into();
        self.created_field = created.into();
        self
    }

    /// Declare a globally unique field.
    #[must_use]
    pub fn unique_index(mut self, field: &str) -> Self {
        let decl = IndexDecl::new(&self.name, field, Scope::Global);
        self.unique_indexes.push(decl);
        self
    }

    /// Declare a field unique within each instance of `parent_type`.
    #[must_use]
    pub fn unique_index_within(mut self, field: &str, parent_type: &str) -> Self {
        let decl = IndexDecl::new(&self.name, field, Scope::Within(parent_type.to_string()));
        self.unique_indexes.push(decl);
        self
    }

    /// Declare a one-to-many index over a field.
    #[must_use]
    pub fn multi_index(mut self, field: &str) -> Self {
        let decl = IndexDecl::new(&self.name, field, Scope::Global);
        self.multi_indexes.push(decl);
        self
    }

    /// Declare a one-to-many index scoped to each instance of `parent_type`.
    #[must_use]
    pub fn multi_index_within(mut self, field: &str, parent_type: &str) -> Self {
        let decl = IndexDecl::new(&self.name, field, Scope::Within(parent_type.to_string()));
        self.multi_indexes.push(decl);
        self
    }

    /// Declare membership in a collection owned by each `owner_type` instance.
    #[must_use]
    pub fn participates_in(mut self, owner_type: &str, collection: &str, kind: CollectionKind) -> Self {
        self.participations.push(ParticipationDecl {
            owner_type: owner_type.to_string(),
            collection: collection.to_string(),
            kind,
            scope: ParticipationScope::Instance,
        });
        self
    }

    /// Declare membership in a collection on the model's own class.
    #[must_use]
    pub fn class_participates_in(mut self, collection: &str, kind: CollectionKind) -> Self {
        self.participations.push(ParticipationDecl {
            owner_type: self.name.clone(),
            collection: collection.to_string(),
            kind,
            scope: ParticipationScope::Class,
        });
        self
    }

    /// Declare membership in an owner's collection via a join model.
    #[must_use]
    pub fn participates_through(
        mut self,
        owner_type: &str,
        collection: &str,
        kind: CollectionKind,
        through: &str,
    ) -> Self {
        self.participations.push(ParticipationDecl {
            owner_type: owner_type.to_string(),
            collection: collection.to_string(),
            kind,
            scope: ParticipationScope::Through {
                through: through.to_string(),
            },
        });
        self
    }

    /// Validate and finish.
    ///
    /// # Errors
    ///
    /// Returns [`KinshipError::InvalidArgument`] for empty names or a field
    /// or collection declared twice.
    pub fn build(self) -> KinshipResult<ModelDescriptor> {
        if self.name.trim().is_empty() {
            return Err(KinshipError::InvalidArgument(
                "model name must not be empty".into(),
            ));
        }
        let mut fields = BTreeSet::new();
        for decl in self.unique_indexes.iter().chain(&self.multi_indexes) {
            if decl.field.trim().is_empty() {
                return Err(KinshipError::InvalidArgument(format!(
                    "{}: index field must not be empty",
                    self.name
                )));
            }
            if !fields.insert(decl.field.as_str()) {
                return Err(KinshipError::InvalidArgument(format!(
                    "{}: field {} is indexed twice",
                    self.name, decl.field
                )));
            }
            if let Scope::Within(parent) = &decl.scope
                && parent.trim().is_empty()
            {
                return Err(KinshipError::InvalidArgument(format!(
                    "{}: parent type of {} must not be empty",
                    self.name, decl.field
                )));
            }
        }
        let mut collections = BTreeSet::new();
        for decl in &self.participations {
            if decl.collection.trim().is_empty() || decl.owner_type.trim().is_empty() {
                return Err(KinshipError::InvalidArgument(format!(
                    "{}: participation owner and collection must not be empty",
                    self.name
                )));
            }
            if !collections.insert((decl.owner_type.as_str(), decl.collection.as_str())) {
                return Err(KinshipError::InvalidArgument(format!(
                    "{}: participation in {}.{} declared twice",
                    self.name, decl.owner_type, decl.collection
                )));
            }
        }
        Ok(ModelDescriptor {
            name: self.name,
            updated_field: self.updated_field,
            created_field: self.created_field,
            unique_indexes: self.unique_indexes,
            multi_indexes: self.multi_indexes,
            participations: self.participations,
        })
    }
}
