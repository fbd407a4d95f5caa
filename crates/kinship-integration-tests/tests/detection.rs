//! Phantom, missing and stale detection across every structure.

mod common;

use kinship_core::{FindingKind, StaleReason};
use kinship_test::{TestRepo, small_batch_config, user_record_with};

#[tokio::test]
async fn test_exactly_one_phantom_among_many() {
    let harness = TestRepo::with_config(small_batch_config());
    let ids = ["r1", "r2", "r3", "r4", "r5", "r6", "r7"];
    harness.seed_users(&ids).await;
    for id in ids {
        harness.join("members", "t1", id).await;
    }
    harness.delete_object("r4").await;

    let report = harness.repo.audit(&harness.user).await.unwrap();
    assert_eq!(report.instances.phantoms, vec!["r4"]);
    assert!(report.instances.missing.is_empty());
    assert_eq!(
        common::stale_ids(&report, StaleReason::ObjectMissing),
        vec!["r4"]
    );
    let members = report
        .participations
        .iter()
        .find(|p| p.collection == "members")
        .unwrap();
    assert_eq!(members.stale.len(), 1);
    assert_eq!(members.members_checked, 7);
    assert_eq!(members.stale[0].key, "team:t1:members");
}

#[tokio::test]
async fn test_missing_from_timeline() {
    let harness = TestRepo::new();
    harness.seed_users(&["a", "b", "c"]).await;
    harness.drop_from_timeline("b").await;

    let report = harness.repo.audit(&harness.user).await.unwrap();
    assert_eq!(report.instances.missing, vec!["b"]);
    assert!(report.instances.phantoms.is_empty());
    assert!(common::missing_ids(&report).is_empty());
}

#[tokio::test]
async fn test_missing_from_indexes() {
    let harness = TestRepo::new();
    harness.seed_users(&["a", "b", "c"]).await;
    let conn = harness.repo.connection();
    conn.hdel("user:email_index", "c@example.com").await.unwrap();
    conn.srem("user:role_index:member", "a").await.unwrap();

    let report = harness.repo.audit(&harness.user).await.unwrap();
    let unique = &report.unique_indexes[0];
    assert_eq!(unique.missing.len(), 1);
    assert_eq!(unique.missing[0].identifier, "c");
    assert_eq!(unique.missing[0].field_value.as_deref(), Some("c@example.com"));
    let multi = &report.multi_indexes[0];
    assert_eq!(multi.missing.len(), 1);
    assert_eq!(multi.missing[0].identifier, "a");
    assert_eq!(multi.missing[0].key, "user:role_index:member");
    assert_eq!(common::missing_ids(&report), vec!["a", "c"]);
}

#[tokio::test]
async fn test_field_changed_behind_the_index() {
    let harness = TestRepo::new();
    harness
        .repo
        .save(&harness.user, &user_record_with("u1", "old@x", "admin"))
        .await
        .unwrap();
    harness
        .repo
        .connection()
        .hset("user:u1:object", "role", "guest")
        .await
        .unwrap();

    let report = harness.repo.audit(&harness.user).await.unwrap();
    let multi = &report.multi_indexes[0];
    assert_eq!(multi.stale.len(), 1);
    assert_eq!(
        multi.stale[0].kind,
        FindingKind::Stale(StaleReason::ValueMismatch)
    );
    assert_eq!(multi.stale[0].field_value.as_deref(), Some("admin"));
    assert_eq!(multi.missing[0].field_value.as_deref(), Some("guest"));
    assert!(report.unique_indexes[0].is_clean());
}

#[tokio::test]
async fn test_compound_identifiers_round_trip() {
    let harness = TestRepo::with_config(small_batch_config());
    let ids = ["part1:part2", "a:b:c", "plain"];
    harness.seed_users(&ids).await;
    for id in ids {
        harness.join("members", "org:7", id).await;
    }

    let report = harness.repo.audit(&harness.user).await.unwrap();
    assert!(report.healthy(), "{report}");
    assert_eq!(report.instances.keyspace_count, 3);

    let members = harness
        .repo
        .participation(&harness.user, "team", "members")
        .unwrap();
    assert_eq!(
        members.owner_ids("part1:part2").await.unwrap(),
        vec!["org:7"]
    );
    let found = harness
        .repo
        .unique(&harness.user, "email")
        .unwrap()
        .find("a:b:c@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.identifier, "a:b:c");

    harness.delete_object("part1:part2").await;
    let report = harness.repo.audit(&harness.user).await.unwrap();
    assert_eq!(report.instances.phantoms, vec!["part1:part2"]);
}

#[tokio::test]
async fn test_audit_issues_no_writes() {
    use std::sync::Arc;

    use kinship_test::{RecordingKvStore, test_config};

    let store = RecordingKvStore::new();
    let harness = TestRepo::with_store(Arc::new(store.clone()), test_config());
    harness.seed_users(&["a", "b"]).await;
    harness.join("queue", "t1", "a").await;
    harness.delete_object("b").await;
    store.clear();

    let report = harness.repo.audit(&harness.user).await.unwrap();
    assert!(!report.healthy());
    assert!(!store.commands().is_empty());
    assert!(store.writes().is_empty(), "{:?}", store.writes());
}

#[tokio::test]
async fn test_audit_scans_use_engine_batch_size() {
    use std::sync::Arc;

    use kinship_core::{AuditEngine, AuditOptions};
    use kinship_storage::Command;
    use kinship_test::{RecordingKvStore, test_config};

    fn scan_counts(store: &RecordingKvStore) -> Vec<usize> {
        store
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::Scan { count, .. } => Some(count),
                _ => None,
            })
            .collect()
    }

    let store = RecordingKvStore::new();
    let harness = TestRepo::with_store(Arc::new(store.clone()), test_config());
    harness.seed_users(&["a", "b", "c", "d"]).await;
    store.clear();

    let engine = AuditEngine::new(
        harness.repo.clone(),
        AuditOptions {
            batch_size: 3,
            sample_size: 50,
        },
    );
    engine
        .audit_multi_index(&harness.user, &harness.user.multi_indexes[0])
        .await
        .unwrap();
    let counts = scan_counts(&store);
    assert!(!counts.is_empty());
    assert!(counts.iter().all(|&c| c == 3), "{counts:?}");

    store.clear();
    harness
        .repo
        .multi(&harness.user, "role")
        .unwrap()
        .rebuild(4)
        .await
        .unwrap();
    let counts = scan_counts(&store);
    assert!(!counts.is_empty());
    assert!(counts.iter().all(|&c| c == 4), "{counts:?}");
}
