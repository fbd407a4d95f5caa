//! Scoped namespaces and dimensions without an audit.

use kinship_core::{AuditStatus, CollectionKind, KinshipError, ModelDescriptor, Record};
use kinship_test::{TestRepo, scoped_user_descriptor};

#[tokio::test]
async fn test_same_value_under_two_scopes() {
    let harness = TestRepo::new().with_descriptor(scoped_user_descriptor());
    let email = harness.repo.unique(&harness.user, "email").unwrap();
    let (t1, t2) = (email.within("t1"), email.within("t2"));

    t1.guard("a@x", "u1").await.unwrap();
    t1.set("a@x", "u1").await.unwrap();
    t2.guard("a@x", "u2").await.unwrap();
    t2.set("a@x", "u2").await.unwrap();

    let conflict = t1.guard("a@x", "u2").await.unwrap_err();
    assert!(matches!(
        conflict,
        KinshipError::RecordExists { ref existing, ref attempted, .. }
            if existing == "u1" && attempted == "u2"
    ));
    assert_eq!(t1.get("a@x").await.unwrap().as_deref(), Some("u1"));
    assert_eq!(t2.get("a@x").await.unwrap().as_deref(), Some("u2"));
}

#[tokio::test]
async fn test_serial_writers_second_gets_record_exists() {
    let harness = TestRepo::new();
    let (repo, user) = (&harness.repo, &harness.user);
    repo.save(user, &Record::new("user", "u1").with_field("email", "a@x"))
        .await
        .unwrap();
    let err = repo
        .save(user, &Record::new("user", "u2").with_field("email", "a@x"))
        .await
        .unwrap_err();
    assert!(matches!(err, KinshipError::RecordExists { .. }));

    repo.save(user, &Record::new("user", "u1").with_field("email", "a@x"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_scoped_unique_audit_sees_each_parent() {
    let harness = TestRepo::new().with_descriptor(scoped_user_descriptor());
    let (repo, user) = (&harness.repo, &harness.user);
    repo.save(user, &Record::new("user", "u1").with_field("email", "a@x"))
        .await
        .unwrap();
    let email = repo.unique(user, "email").unwrap();
    email.within("t1").set("a@x", "u1").await.unwrap();
    email.within("t2").set("a@x", "u1").await.unwrap();
    email.within("t3").set("gone@x", "u9").await.unwrap();

    let report = repo.audit(user).await.unwrap();
    let audit = &report.unique_indexes[0];
    assert_eq!(audit.status, AuditStatus::Audited);
    assert_eq!(audit.checked, 3);
    assert_eq!(audit.stale.len(), 1);
    assert_eq!(audit.stale[0].key, "team:t3:user_email_index");

    let summary = repo.repair(user, Some(report)).await.unwrap();
    assert!(summary.report.healthy());
    assert!(summary.rebuilt_indexes().is_empty());
    assert!(email.within("t3").is_empty().await.unwrap());
    assert_eq!(email.within("t2").len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_not_implemented_is_healthy_but_incomplete() {
    let desc = ModelDescriptor::builder("user")
        .multi_index("role")
        .multi_index_within("skill", "team")
        .build()
        .unwrap();
    let harness = TestRepo::new().with_descriptor(desc);
    let (repo, user) = (&harness.repo, &harness.user);
    repo.save(user, &Record::new("user", "u1").with_field("role", "admin"))
        .await
        .unwrap();
    repo.multi(user, "skill")
        .unwrap()
        .within("t1")
        .add("rust", "u1")
        .await
        .unwrap();

    let report = repo.health_check(user).await.unwrap();
    assert!(report.healthy());
    assert!(!report.complete());
    assert_eq!(report.multi_indexes.len(), 2);
    assert!(report.multi_indexes[0].status.is_audited());
    assert!(matches!(
        report.multi_indexes[1].status,
        AuditStatus::NotImplemented { .. }
    ));
    assert_eq!(report.not_implemented(), vec!["user_skill_index"]);
    assert!(report.to_string().contains("NOT IMPLEMENTED"));
}

#[tokio::test]
async fn test_through_participation_reported_not_dropped() {
    let desc = ModelDescriptor::builder("user")
        .participates_in("team", "members", CollectionKind::Set)
        .participates_through("project", "staff", CollectionKind::Set, "assignment")
        .build()
        .unwrap();
    let harness = TestRepo::new().with_descriptor(desc);
    let report = harness.repo.audit(&harness.user).await.unwrap();
    assert_eq!(report.participations.len(), 2);
    assert!(report.participations[0].status.is_audited());
    assert!(!report.participations[1].status.is_audited());
    assert!(report.healthy());
    assert!(!report.complete());
}
