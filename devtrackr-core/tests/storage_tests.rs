mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{browse_url, FakeSource};
use devtrackr_core::{
    Issue, IssueStore, MemoryStore, PrStatus, PullRequest, RemoteIssue, SqliteStore, StoreError,
    Subscription, TrackingService,
};

fn temp_dir(tag: &str) -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "devtrackr_{tag}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    dir
}

fn issue(key: &str) -> Issue {
    let remote = RemoteIssue {
        key: key.into(),
        title: "T".into(),
        status: "Open".into(),
    };
    Issue::from_remote(&remote, &browse_url(key), Utc::now())
}

fn pull_request(issue_id: i64, number: i64, status: PrStatus) -> PullRequest {
    let now = Utc::now();
    PullRequest {
        id: 0,
        issue_id,
        number,
        repository: "org/repo".into(),
        title: "Fix".into(),
        url: format!("https://git.example/org/repo/pull/{number}"),
        status,
        target_branch: "main".into(),
        is_backport: false,
        original_pr_id: None,
        created_at: now,
        updated_at: now,
    }
}

fn subscription(issue_id: i64, user_id: i64) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: 0,
        issue_id,
        user_id,
        active: true,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn two_handles_on_one_database_see_each_others_writes() {
    let dir = temp_dir("shared");
    let path = dir.join("devtrackr.db");

    // e.g. a `serve` loop and a one-shot CLI command
    let serve = SqliteStore::open(&path).unwrap();
    let cli = SqliteStore::open(&path).unwrap();

    let first = serve.create_issue(issue("ABC-1")).await.unwrap();
    cli.create_issue(issue("ABC-2")).await.unwrap();

    let mut seen = serve.list_issues().await.unwrap();
    assert_eq!(seen.len(), 2);

    // a write from the first handle must not drop the second handle's row
    seen[0].status = "Closed".into();
    seen[0].last_polled_at = Some(Utc::now());
    serve.update_issue(&seen[0]).await.unwrap();
    assert_eq!(seen[0].id, first.id);

    let reopened = SqliteStore::open(&path).unwrap();
    let keys: Vec<String> = reopened
        .list_issues()
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.key)
        .collect();
    assert_eq!(keys, vec!["ABC-1", "ABC-2"]);
    assert_eq!(
        cli.get_issue("ABC-1").await.unwrap().unwrap().status,
        "Closed"
    );

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn database_survives_reopen() {
    let dir = temp_dir("reopen");
    let path = dir.join("nested").join("devtrackr.db");

    let store = SqliteStore::open(&path).unwrap();
    let created = store.create_issue(issue("ABC-1")).await.unwrap();
    assert_eq!(created.id, 1);
    let pr = store
        .create_pull_request(pull_request(created.id, 4, PrStatus::Review))
        .await
        .unwrap();
    drop(store);

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.list_issues().await.unwrap(), vec![created.clone()]);
    assert_eq!(
        reopened.get_unmerged_pull_requests(created.id).await.unwrap(),
        vec![pr]
    );

    // ids keep counting after a reopen
    let second = reopened.create_issue(issue("ABC-2")).await.unwrap();
    assert_eq!(second.id, 2);

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn sqlite_enforces_uniqueness() {
    let store = SqliteStore::open_in_memory().unwrap();
    let created = store.create_issue(issue("ABC-1")).await.unwrap();

    let err = store.create_issue(issue("ABC-1")).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { entity: "issue", .. }));

    let mut same_url = issue("ABC-2");
    same_url.source_url = created.source_url.clone();
    assert!(matches!(
        store.create_issue(same_url).await.unwrap_err(),
        StoreError::Duplicate { .. }
    ));

    store
        .create_subscription(subscription(created.id, 7))
        .await
        .unwrap();
    assert!(matches!(
        store
            .create_subscription(subscription(created.id, 7))
            .await
            .unwrap_err(),
        StoreError::Duplicate { entity: "subscription", .. }
    ));

    store
        .create_pull_request(pull_request(created.id, 1, PrStatus::Open))
        .await
        .unwrap();
    assert!(matches!(
        store
            .create_pull_request(pull_request(created.id, 1, PrStatus::Draft))
            .await
            .unwrap_err(),
        StoreError::Duplicate { entity: "pull request", .. }
    ));
}

#[tokio::test]
async fn sqlite_reports_missing_rows() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut ghost = issue("GHOST-1");
    ghost.id = 99;

    assert!(matches!(
        store.update_issue(&ghost).await.unwrap_err(),
        StoreError::Missing { .. }
    ));
    assert!(matches!(
        store.delete_issue("GHOST-1").await.unwrap_err(),
        StoreError::Missing { .. }
    ));
    assert!(matches!(
        store.delete_subscription(1).await.unwrap_err(),
        StoreError::Missing { .. }
    ));
    let mut pr = pull_request(1, 1, PrStatus::Open);
    pr.id = 5;
    assert!(matches!(
        store.update_pull_request(&pr).await.unwrap_err(),
        StoreError::Missing { .. }
    ));
    assert!(store.get_issue("GHOST-1").await.unwrap().is_none());
    assert!(store.get_subscription_by_id(1).await.unwrap().is_none());
}

#[tokio::test]
async fn sqlite_pull_request_update_keeps_created_at() {
    let store = SqliteStore::open_in_memory().unwrap();
    let created = store
        .create_pull_request(pull_request(3, 10, PrStatus::Open))
        .await
        .unwrap();

    let mut changed = created.clone();
    changed.status = PrStatus::Merged;
    changed.created_at = Utc::now() + chrono::Duration::days(1);
    store.update_pull_request(&changed).await.unwrap();

    let stored = store.get_pull_request(3, 10).await.unwrap().unwrap();
    assert_eq!(stored.status, PrStatus::Merged);
    assert_eq!(stored.created_at, created.created_at);
    assert!(stored.updated_at >= created.updated_at);
    assert!(store.get_unmerged_pull_requests(3).await.unwrap().is_empty());
}

#[tokio::test]
async fn tracking_runs_on_sqlite() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let source = Arc::new(FakeSource::default());
    let tracking = TrackingService::new(store.clone(), source.clone());
    source.set("ABC-1", "X", "Open");

    let tracked = tracking.track_issue(&browse_url("ABC-1")).await.unwrap();
    tracking.subscribe_to_issue("ABC-1", 1).await.unwrap();
    store
        .create_pull_request(pull_request(tracked.id, 1, PrStatus::Open))
        .await
        .unwrap();

    let err = tracking.unsubscribe_from_issue("ABC-1", 1).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(tracking.list_subscriptions(1).await.unwrap().len(), 1);

    // deleting the issue leaves its subscriptions behind
    tracking.delete_issue("ABC-1").await.unwrap();
    assert_eq!(tracking.list_subscriptions(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn memory_store_checks_keys_and_updates() {
    let store = MemoryStore::in_memory();
    let created = store.create_issue(issue("ABC-1")).await.unwrap();

    let err = store.create_issue(issue("ABC-1")).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));

    let mut ghost = created.clone();
    ghost.id = 99;
    ghost.key = "GHOST-1".into();
    ghost.source_url = browse_url("GHOST-1");
    let err = store.update_issue(&ghost).await.unwrap_err();
    assert!(matches!(err, StoreError::Missing { .. }));

    assert!(store.get_issue("GHOST-1").await.unwrap().is_none());
    assert!(matches!(
        store.delete_subscription(1).await.unwrap_err(),
        StoreError::Missing { .. }
    ));
}
