use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Issue, PullRequest, Subscription};
use crate::store::IssueStore;

#[derive(Debug, Default)]
struct StoreData {
    next_issue_id: i64,
    next_subscription_id: i64,
    next_pull_request_id: i64,
    issues: BTreeMap<i64, Issue>,
    subscriptions: BTreeMap<i64, Subscription>,
    pull_requests: BTreeMap<i64, PullRequest>,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

impl StoreData {
    fn issue_id_by_key(&self, key: &str) -> Option<i64> {
        self.issues
            .values()
            .find(|issue| issue.key == key)
            .map(|issue| issue.id)
    }
}

/// Issue store held in process memory.
///
/// Clones share the same data. Nothing is written to disk; use
/// [`SqliteStore`](crate::sqlite::SqliteStore) when several processes need
/// to see the same issues.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<StoreData>>,
}

impl MemoryStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}

#[async_trait]
impl IssueStore for MemoryStore {
    async fn create_issue(&self, mut issue: Issue) -> Result<Issue, StoreError> {
        self.mutate(|data| {
            if data.issue_id_by_key(&issue.key).is_some() {
                return Err(StoreError::duplicate("issue", &issue.key));
            }
            if data.issues.values().any(|i| i.source_url == issue.source_url) {
                return Err(StoreError::duplicate("issue", &issue.source_url));
            }
            issue.id = next_id(&mut data.next_issue_id);
            data.issues.insert(issue.id, issue.clone());
            Ok(issue)
        })
        .await
    }

    async fn get_issue(&self, key: &str) -> Result<Option<Issue>, StoreError> {
        let data = self.inner.read().await;
        Ok(data.issues.values().find(|issue| issue.key == key).cloned())
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        let data = self.inner.read().await;
        Ok(data.issues.values().cloned().collect())
    }

    async fn update_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        self.mutate(|data| {
            let clash = data
                .issues
                .values()
                .any(|i| {
                    i.id != issue.id && (i.key == issue.key || i.source_url == issue.source_url)
                });
            if clash {
                return Err(StoreError::duplicate("issue", &issue.key));
            }
            let slot = data
                .issues
                .get_mut(&issue.id)
                .ok_or_else(|| StoreError::missing("issue", issue.id))?;
            *slot = issue.clone();
            Ok(())
        })
        .await
    }

    async fn delete_issue(&self, key: &str) -> Result<(), StoreError> {
        self.mutate(|data| {
            let id = data
                .issue_id_by_key(key)
                .ok_or_else(|| StoreError::missing("issue", key))?;
            data.issues.remove(&id);
            Ok(())
        })
        .await
    }

    async fn create_subscription(&self, mut sub: Subscription) -> Result<Subscription, StoreError> {
        self.mutate(|data| {
            let exists = data
                .subscriptions
                .values()
                .any(|s| s.issue_id == sub.issue_id && s.user_id == sub.user_id);
            if exists {
                return Err(StoreError::duplicate(
                    "subscription",
                    format!("{}/{}", sub.issue_id, sub.user_id),
                ));
            }
            let now = Utc::now();
            sub.id = next_id(&mut data.next_subscription_id);
            sub.created_at = now;
            sub.updated_at = now;
            data.subscriptions.insert(sub.id, sub.clone());
            Ok(sub)
        })
        .await
    }

    async fn get_subscription(
        &self,
        issue_id: i64,
        user_id: i64,
    ) -> Result<Option<Subscription>, StoreError> {
        let data = self.inner.read().await;
        Ok(data
            .subscriptions
            .values()
            .find(|s| s.issue_id == issue_id && s.user_id == user_id)
            .cloned())
    }

    async fn get_subscription_by_id(&self, id: i64) -> Result<Option<Subscription>, StoreError> {
        let data = self.inner.read().await;
        Ok(data.subscriptions.get(&id).cloned())
    }

    async fn list_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>, StoreError> {
        let data = self.inner.read().await;
        Ok(data
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_subscription(&self, sub: &Subscription) -> Result<(), StoreError> {
        self.mutate(|data| {
            let slot = data
                .subscriptions
                .get_mut(&sub.id)
                .ok_or_else(|| StoreError::missing("subscription", sub.id))?;
            *slot = Subscription {
                updated_at: Utc::now(),
                ..sub.clone()
            };
            Ok(())
        })
        .await
    }

    async fn delete_subscription(&self, id: i64) -> Result<(), StoreError> {
        self.mutate(|data| {
            data.subscriptions
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| StoreError::missing("subscription", id))
        })
        .await
    }

    async fn create_pull_request(&self, mut pr: PullRequest) -> Result<PullRequest, StoreError> {
        self.mutate(|data| {
            let exists = data
                .pull_requests
                .values()
                .any(|p| p.issue_id == pr.issue_id && p.number == pr.number);
            if exists {
                return Err(StoreError::duplicate(
                    "pull request",
                    format!("{}#{}", pr.issue_id, pr.number),
                ));
            }
            let now = Utc::now();
            pr.id = next_id(&mut data.next_pull_request_id);
            pr.created_at = now;
            pr.updated_at = now;
            data.pull_requests.insert(pr.id, pr.clone());
            Ok(pr)
        })
        .await
    }

    async fn get_pull_request(
        &self,
        issue_id: i64,
        number: i64,
    ) -> Result<Option<PullRequest>, StoreError> {
        let data = self.inner.read().await;
        Ok(data
            .pull_requests
            .values()
            .find(|p| p.issue_id == issue_id && p.number == number)
            .cloned())
    }

    async fn list_pull_requests(&self, issue_id: i64) -> Result<Vec<PullRequest>, StoreError> {
        let data = self.inner.read().await;
        Ok(data
            .pull_requests
            .values()
            .filter(|p| p.issue_id == issue_id)
            .cloned()
            .collect())
    }

    async fn update_pull_request(&self, pr: &PullRequest) -> Result<(), StoreError> {
        self.mutate(|data| {
            let clash = data
                .pull_requests
                .values()
                .any(|p| p.id != pr.id && p.issue_id == pr.issue_id && p.number == pr.number);
            if clash {
                return Err(StoreError::duplicate(
                    "pull request",
                    format!("{}#{}", pr.issue_id, pr.number),
                ));
            }
            let slot = data
                .pull_requests
                .get_mut(&pr.id)
                .ok_or_else(|| StoreError::missing("pull request", pr.id))?;
            *slot = PullRequest {
                created_at: slot.created_at,
                updated_at: Utc::now(),
                ..pr.clone()
            };
            Ok(())
        })
        .await
    }

    async fn get_unmerged_pull_requests(
        &self,
        issue_id: i64,
    ) -> Result<Vec<PullRequest>, StoreError> {
        let data = self.inner.read().await;
        Ok(data
            .pull_requests
            .values()
            .filter(|p| p.issue_id == issue_id && p.status.is_unmerged())
            .cloned()
            .collect())
    }
}
