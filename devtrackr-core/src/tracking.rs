use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::TrackError;
use crate::models::{
    Issue, PullRequest, PullRequestInput, RemoteIssue, Subscription, SubscriptionUpdate,
};
use crate::source::IssueSource;
use crate::store::IssueStore;

/// What a poll did to a stored issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Remote status differed; title, status and `updated_at` were rewritten.
    Updated,
    /// Only `last_polled_at` moved.
    Unchanged,
}

/// Business rules for issues, pull requests and subscriptions.
///
/// Shared by the polling scheduler and on-demand callers. Store and source
/// failures are never retried here.
#[derive(Clone)]
pub struct TrackingService {
    store: Arc<dyn IssueStore>,
    source: Arc<dyn IssueSource>,
}

impl TrackingService {
    pub fn new(store: Arc<dyn IssueStore>, source: Arc<dyn IssueSource>) -> Self {
        Self { store, source }
    }

    /// Fetches current remote state for an issue reference.
    pub async fn fetch_remote(&self, reference: &str) -> Result<RemoteIssue, TrackError> {
        Ok(self.source.get_issue(reference).await?)
    }

    /// Starts tracking the issue behind `source_reference`, or refreshes it if
    /// its key is already tracked.
    pub async fn track_issue(&self, source_reference: &str) -> Result<Issue, TrackError> {
        let remote = self.fetch_remote(source_reference).await?;
        let now = Utc::now();

        if let Some(mut existing) = self.store.get_issue(&remote.key).await? {
            if existing.title != remote.title || existing.status != remote.status {
                existing.updated_at = now;
            }
            existing.title = remote.title;
            existing.status = remote.status;
            existing.source_url = source_reference.to_owned();
            self.store.update_issue(&existing).await?;
            debug!(key = %existing.key, "re-tracked issue");
            return Ok(existing);
        }

        let issue = self
            .store
            .create_issue(Issue::from_remote(&remote, source_reference, now))
            .await?;
        info!(key = %issue.key, status = %issue.status, "tracking new issue");
        Ok(issue)
    }

    pub async fn get_issue(&self, key: &str) -> Result<Issue, TrackError> {
        self.store
            .get_issue(key)
            .await?
            .ok_or_else(|| TrackError::NotFound(format!("issue {key}")))
    }

    pub async fn list_issues(&self) -> Result<Vec<Issue>, TrackError> {
        Ok(self.store.list_issues().await?)
    }

    /// Removes the issue only; its pull requests and subscriptions are left in place.
    pub async fn delete_issue(&self, key: &str) -> Result<(), TrackError> {
        self.store.delete_issue(key).await?;
        info!(%key, "stopped tracking issue");
        Ok(())
    }

    /// Overwrites the whole stored row.
    pub async fn update_issue(&self, issue: &Issue) -> Result<(), TrackError> {
        Ok(self.store.update_issue(issue).await?)
    }

    /// Manual status correction, bypassing the remote tracker.
    pub async fn update_issue_status(
        &self,
        issue: &mut Issue,
        status: impl Into<String>,
    ) -> Result<(), TrackError> {
        // the caller's copy only changes once the store accepted the write
        let updated = Issue {
            status: status.into(),
            updated_at: Utc::now(),
            ..issue.clone()
        };
        self.store.update_issue(&updated).await?;
        *issue = updated;
        Ok(())
    }

    /// Sets the per-issue polling interval (0 = scheduler default) and restarts
    /// its cadence from now.
    pub async fn update_issue_polling_interval(
        &self,
        key: &str,
        interval_secs: i64,
    ) -> Result<Issue, TrackError> {
        if interval_secs < 0 {
            return Err(TrackError::InvalidArgument(format!(
                "polling interval must not be negative, got {interval_secs}"
            )));
        }
        let mut issue = self.get_issue(key).await?;
        issue.polling_interval_secs = interval_secs;
        issue.last_polled_at = Some(Utc::now());
        self.store.update_issue(&issue).await?;
        Ok(issue)
    }

    /// Merges fetched state into `issue` and writes it back. Only a status
    /// change counts as an update; otherwise just `last_polled_at` moves.
    pub async fn apply_remote(
        &self,
        issue: &mut Issue,
        remote: RemoteIssue,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome, TrackError> {
        let outcome = if issue.status != remote.status {
            info!(
                key = %issue.key,
                from = %issue.status,
                to = %remote.status,
                "issue status changed"
            );
            issue.title = remote.title;
            issue.status = remote.status;
            issue.updated_at = now;
            SyncOutcome::Updated
        } else {
            SyncOutcome::Unchanged
        };
        issue.last_polled_at = Some(now);
        self.store.update_issue(issue).await?;
        Ok(outcome)
    }

    /// On-demand poll of a single issue, ignoring its cadence.
    pub async fn refresh_issue(&self, key: &str) -> Result<(Issue, SyncOutcome), TrackError> {
        let mut issue = self.get_issue(key).await?;
        let remote = self.fetch_remote(&issue.source_url).await?;
        let outcome = self.apply_remote(&mut issue, remote, Utc::now()).await?;
        Ok((issue, outcome))
    }

    pub async fn subscribe_to_issue(
        &self,
        key: &str,
        user_id: i64,
    ) -> Result<Subscription, TrackError> {
        let issue = self.get_issue(key).await?;
        let now = Utc::now();
        let sub = self
            .store
            .create_subscription(Subscription {
                id: 0,
                issue_id: issue.id,
                user_id,
                active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
        debug!(%key, user_id, "subscribed");
        Ok(sub)
    }

    /// Removes a user's subscription unless the issue still has unmerged
    /// pull requests, in which case the subscription is left untouched.
    pub async fn unsubscribe_from_issue(&self, key: &str, user_id: i64) -> Result<(), TrackError> {
        let issue = self.get_issue(key).await?;
        let sub = self
            .store
            .get_subscription(issue.id, user_id)
            .await?
            .ok_or_else(|| {
                TrackError::NotFound(format!("subscription of user {user_id} to {key}"))
            })?;

        if self.has_unmerged_pull_requests(key).await? {
            return Err(TrackError::Conflict(format!(
                "issue {key} still has unmerged pull requests"
            )));
        }

        self.store.delete_subscription(sub.id).await?;
        debug!(%key, user_id, "unsubscribed");
        Ok(())
    }

    pub async fn has_unmerged_pull_requests(&self, key: &str) -> Result<bool, TrackError> {
        let issue = self.get_issue(key).await?;
        let unmerged = self.store.get_unmerged_pull_requests(issue.id).await?;
        Ok(!unmerged.is_empty())
    }

    pub async fn list_pull_requests(&self, key: &str) -> Result<Vec<PullRequest>, TrackError> {
        let issue = self.get_issue(key).await?;
        Ok(self.store.list_pull_requests(issue.id).await?)
    }

    pub async fn add_pull_request(
        &self,
        key: &str,
        pr: PullRequestInput,
    ) -> Result<PullRequest, TrackError> {
        let issue = self.get_issue(key).await?;
        let pr = self
            .store
            .create_pull_request(pr.into_pull_request(0, issue.id, Utc::now()))
            .await?;
        info!(%key, number = pr.number, status = %pr.status, "pull request added");
        Ok(pr)
    }

    /// Overwrites every field of the existing `(issue, number)` pull request
    /// except its id. Any status may follow any other.
    pub async fn update_pull_request(
        &self,
        key: &str,
        number: i64,
        pr: PullRequestInput,
    ) -> Result<PullRequest, TrackError> {
        let issue = self.get_issue(key).await?;
        let existing = self
            .store
            .get_pull_request(issue.id, number)
            .await?
            .ok_or_else(|| TrackError::NotFound(format!("pull request #{number} on {key}")))?;

        let mut updated = pr.into_pull_request(existing.id, issue.id, Utc::now());
        updated.created_at = existing.created_at;
        self.store.update_pull_request(&updated).await?;
        if existing.status != updated.status {
            info!(
                %key,
                number,
                from = %existing.status,
                to = %updated.status,
                "pull request status changed"
            );
        }
        Ok(updated)
    }

    pub async fn list_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>, TrackError> {
        Ok(self.store.list_subscriptions(user_id).await?)
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Subscription, TrackError> {
        self.store
            .get_subscription_by_id(id)
            .await?
            .ok_or_else(|| TrackError::NotFound(format!("subscription {id}")))
    }

    /// Changes `active`; issue and user stay as stored.
    pub async fn update_subscription(
        &self,
        id: i64,
        update: SubscriptionUpdate,
    ) -> Result<Subscription, TrackError> {
        let mut sub = self.get_subscription(id).await?;
        sub.active = update.active;
        sub.updated_at = Utc::now();
        self.store.update_subscription(&sub).await?;
        Ok(sub)
    }

    pub async fn delete_subscription(&self, id: i64) -> Result<(), TrackError> {
        Ok(self.store.delete_subscription(id).await?)
    }
}
