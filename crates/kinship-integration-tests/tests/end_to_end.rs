//! End-to-end health check and repair of one model.
//!
//! Saves records, breaks them the way a crash or a raw delete would, and
//! checks that a health check sees it and one repair heals it.

mod common;

use kinship_core::{Record, StaleReason};
use kinship_test::{TestRepo, small_batch_config};

#[tokio::test]
async fn test_deleted_key_detected_then_healed() {
    let harness = TestRepo::new();
    let (repo, user) = (&harness.repo, &harness.user);
    for id in ["A", "B", "C"] {
        repo.save(
            user,
            &Record::new("user", id).with_field("email", format!("{id}@example.com")),
        )
        .await
        .unwrap();
    }
    harness.delete_object("A").await;

    let before = repo.health_check(user).await.unwrap();
    assert!(!before.healthy());
    assert_eq!(before.instances.phantoms, vec!["A"]);
    assert!(before.instances.missing.is_empty());
    assert_eq!(
        common::stale_ids(&before, StaleReason::ObjectMissing),
        vec!["A"]
    );

    let summary = repo.repair(user, Some(before)).await.unwrap();
    assert!(summary.report.healthy(), "{}", summary.report);

    let after = repo.health_check(user).await.unwrap();
    assert!(after.healthy());
    assert!(after.complete());
    assert_eq!(after.instances.timeline_count, 2);
    assert_eq!(
        repo.unique(user, "email")
            .unwrap()
            .get("A@example.com")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_repair_all_twice_is_noop_second_time() {
    let mut config = small_batch_config();
    config.audit.sample_size = 100;
    let harness = TestRepo::with_config(config);
    harness.seed_users(&["a", "b", "c", "d", "e"]).await;
    for id in ["a", "b", "c"] {
        harness.join("members", "t1", id).await;
        harness.join("queue", "t1", id).await;
    }
    harness.delete_object("b").await;
    harness.drop_from_timeline("d").await;
    harness
        .repo
        .connection()
        .srem("user:role_index:member", "e")
        .await
        .unwrap();

    let first = harness.repo.repair(&harness.user, None).await.unwrap();
    assert!(first.actions() > 0);
    assert!(first.report.healthy(), "{}", first.report);

    let second = harness.repo.repair(&harness.user, None).await.unwrap();
    assert_eq!(second.actions(), 0, "{second:?}");
    assert_eq!(first.report.findings(), second.report.findings());
}

#[tokio::test]
async fn test_timeline_rebuild_is_idempotent() {
    let harness = TestRepo::new();
    harness.seed_users(&["a", "b", "c"]).await;
    harness.drop_from_timeline("b").await;
    let timeline = harness.repo.timeline(&harness.user);

    let first = timeline.rebuild(2).await.unwrap();
    let second = timeline.rebuild(2).await.unwrap();
    assert_eq!(first, 3);
    assert_eq!(first, second);
    assert_eq!(timeline.members().await.unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_report_renderers_agree() {
    let harness = TestRepo::new();
    harness.seed_users(&["a", "b"]).await;
    harness.delete_object("a").await;
    let report = harness.repo.audit(&harness.user).await.unwrap();

    let map = report.to_map();
    assert_eq!(map["healthy"], serde_json::Value::Bool(false));
    assert_eq!(map["complete"], serde_json::Value::Bool(true));
    assert_eq!(map["instances"]["phantoms"][0], "a");

    let text = report.to_string();
    assert!(text.contains("Audit of user"));
    assert!(text.contains("healthy: no  complete: yes"));
    assert!(text.contains("phantoms: a"));
}
