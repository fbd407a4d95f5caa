//! Test fixtures for common types.

use kinship_config::Config;
use kinship_core::{CollectionKind, ModelDescriptor, Record};

/// Model name used by the user fixtures.
pub const USER: &str = "user";

/// Model name used by the team fixtures.
pub const TEAM: &str = "team";

/// A user model with a unique `email`, a multi `role`, membership in
/// `team.members` (sorted set), `team.queue` (list) and `project.watchers`
/// (set), and a class collection `user.everyone`.
///
/// # Panics
///
/// Panics if the declaration is rejected, which would be a fixture bug.
#[must_use]
pub fn user_descriptor() -> ModelDescriptor {
    ModelDescriptor::builder(USER)
        .unique_index("email")
        .multi_index("role")
        .participates_in(TEAM, "members", CollectionKind::SortedSet)
        .participates_in(TEAM, "queue", CollectionKind::List)
        .participates_in("project", "watchers", CollectionKind::Set)
        .class_participates_in("everyone", CollectionKind::Set)
        .build()
        .expect("user fixture descriptor is valid")
}

/// A user model whose only index is an email unique per team.
///
/// # Panics
///
/// Panics if the declaration is rejected.
#[must_use]
pub fn scoped_user_descriptor() -> ModelDescriptor {
    ModelDescriptor::builder(USER)
        .unique_index_within("email", TEAM)
        .build()
        .expect("scoped user fixture descriptor is valid")
}

/// A team model without relationships.
///
/// # Panics
///
/// Panics if the declaration is rejected.
#[must_use]
pub fn team_descriptor() -> ModelDescriptor {
    ModelDescriptor::builder(TEAM)
        .build()
        .expect("team fixture descriptor is valid")
}

/// A user record with `email = <id>@example.com`, `role = member`, and a
/// `created` timestamp.
#[must_use]
pub fn user_record(id: &str, created: f64) -> Record {
    Record::new(USER, id)
        .with_field("email", format!("{id}@example.com"))
        .with_field("role", "member")
        .with_field("created", created.to_string())
}

/// A user record with explicit email and role.
#[must_use]
pub fn user_record_with(id: &str, email: &str, role: &str) -> Record {
    Record::new(USER, id)
        .with_field("email", email)
        .with_field("role", role)
}

/// Default configuration.
#[must_use]
pub fn test_config() -> Config {
    Config::default()
}

/// Configuration with small batches, to push every code path through
/// more than one scan page and pipeline.
#[must_use]
pub fn small_batch_config() -> Config {
    let mut config = Config::default();
    config.audit.batch_size = 2;
    config.audit.sample_size = 2;
    config.repair.batch_size = 2;
    config
}
