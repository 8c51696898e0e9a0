mod common;

use std::time::Duration;

use chrono::Utc;
use common::{ago, browse_url, harness, set_cadence};
use devtrackr_core::{IssueStore, PollConfig, Scheduler};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

fn fast_config() -> PollConfig {
    PollConfig {
        default_interval: Duration::from_secs(60),
        tick: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn spawned_scheduler_applies_remote_changes() {
    let h = harness();
    h.source.set("ABC-1", "X", "Open");
    h.tracking.track_issue(&browse_url("ABC-1")).await.unwrap();
    set_cadence(&h.store, "ABC-1", 1, ago(Utc::now(), 5)).await;
    h.source.set("ABC-1", "X", "Closed");

    let cancel = CancellationToken::new();
    let handle = Scheduler::new(h.tracking.clone(), fast_config(), cancel).spawn();

    let store = h.store.clone();
    tokio::time::timeout(Duration::from_secs(2), async move {
        loop {
            let issue = store.get_issue("ABC-1").await.unwrap().unwrap();
            if issue.status == "Closed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scheduler never applied the remote status");

    handle.stop().await.expect("stop scheduler");
}

#[tokio::test]
async fn cancellation_token_ends_the_run_loop() {
    let h = harness();
    let cancel = CancellationToken::new();
    let (_stop_tx, stop_rx) = oneshot::channel();

    let scheduler = Scheduler::new(h.tracking.clone(), fast_config(), cancel.clone());
    let task = tokio::spawn(scheduler.run(stop_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("scheduler did not observe cancellation")
        .expect("scheduler task panicked");
}

#[tokio::test]
async fn stop_returns_promptly_with_long_tick() {
    let h = harness();
    let config = PollConfig {
        default_interval: Duration::from_secs(60),
        tick: Duration::from_secs(3600),
    };
    let handle = Scheduler::new(h.tracking.clone(), config, CancellationToken::new()).spawn();

    tokio::time::timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("stop timed out")
        .expect("stop scheduler");
}
