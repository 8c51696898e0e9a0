#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use devtrackr_core::{
    issue_key_from_reference, Issue, IssueSource, IssueStore, MemoryStore, RemoteIssue,
    SourceError, TrackingService,
};

/// Scriptable stand-in for the remote tracker, keyed by issue key.
#[derive(Default)]
pub struct FakeSource {
    issues: Mutex<HashMap<String, RemoteIssue>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn set(&self, key: &str, title: &str, status: &str) {
        self.issues.lock().unwrap().insert(
            key.to_owned(),
            RemoteIssue {
                key: key.to_owned(),
                title: title.to_owned(),
                status: status.to_owned(),
            },
        );
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl IssueSource for FakeSource {
    async fn get_issue(&self, reference: &str) -> Result<RemoteIssue, SourceError> {
        let key = issue_key_from_reference(reference)?;
        self.calls.lock().unwrap().push(key.clone());
        if self.failing.lock().unwrap().contains(&key) {
            return Err(SourceError::Status { status: 503, key });
        }
        self.issues
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(SourceError::Status { status: 404, key })
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<FakeSource>,
    pub tracking: TrackingService,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::in_memory());
    let source = Arc::new(FakeSource::default());
    let tracking = TrackingService::new(store.clone(), source.clone());
    Harness {
        store,
        source,
        tracking,
    }
}

pub fn browse_url(key: &str) -> String {
    format!("https://tracker.example/browse/{key}")
}

/// Rewrites an issue's cadence fields directly in the store.
pub async fn set_cadence(
    store: &MemoryStore,
    key: &str,
    interval_secs: i64,
    last_polled_at: Option<DateTime<Utc>>,
) -> Issue {
    let mut issue = store.get_issue(key).await.unwrap().unwrap();
    issue.polling_interval_secs = interval_secs;
    issue.last_polled_at = last_polled_at;
    store.update_issue(&issue).await.unwrap();
    issue
}

pub fn ago(now: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    Some(now - Duration::seconds(secs))
}
