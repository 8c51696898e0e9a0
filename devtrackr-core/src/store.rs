use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Issue, PullRequest, Subscription};

/// Durable storage for issues, pull requests and subscriptions.
///
/// Implementations provide per-row atomicity for every operation; nothing
/// in the core relies on multi-row transactions. `create_*` return the
/// stored row with its assigned id, `get_*` return `None` for absent rows,
/// and updates or deletes of absent rows fail with [`StoreError::Missing`].
#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn create_issue(&self, issue: Issue) -> Result<Issue, StoreError>;
    async fn get_issue(&self, key: &str) -> Result<Option<Issue>, StoreError>;
    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError>;
    async fn update_issue(&self, issue: &Issue) -> Result<(), StoreError>;
    async fn delete_issue(&self, key: &str) -> Result<(), StoreError>;

    async fn create_subscription(&self, sub: Subscription) -> Result<Subscription, StoreError>;
    async fn get_subscription(
        &self,
        issue_id: i64,
        user_id: i64,
    ) -> Result<Option<Subscription>, StoreError>;
    async fn get_subscription_by_id(&self, id: i64) -> Result<Option<Subscription>, StoreError>;
    async fn list_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>, StoreError>;
    async fn update_subscription(&self, sub: &Subscription) -> Result<(), StoreError>;
    async fn delete_subscription(&self, id: i64) -> Result<(), StoreError>;

    async fn create_pull_request(&self, pr: PullRequest) -> Result<PullRequest, StoreError>;
    async fn get_pull_request(
        &self,
        issue_id: i64,
        number: i64,
    ) -> Result<Option<PullRequest>, StoreError>;
    async fn list_pull_requests(&self, issue_id: i64) -> Result<Vec<PullRequest>, StoreError>;
    async fn update_pull_request(&self, pr: &PullRequest) -> Result<(), StoreError>;
    async fn get_unmerged_pull_requests(&self, issue_id: i64)
        -> Result<Vec<PullRequest>, StoreError>;
}
