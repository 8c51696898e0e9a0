use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Polling interval assigned to newly tracked issues, in seconds.
pub const DEFAULT_ISSUE_POLLING_INTERVAL_SECS: i64 = 300;

/// A remote ticket mirrored locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub id: i64,
    pub key: String,
    pub title: String,
    pub status: String,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Seconds between polls; 0 means "use the scheduler default".
    pub polling_interval_secs: i64,
    /// `None` until the issue has been polled once.
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Builds an unsaved issue (id 0) from freshly fetched remote state.
    pub fn from_remote(remote: &RemoteIssue, source_url: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            key: remote.key.clone(),
            title: remote.title.clone(),
            status: remote.status.clone(),
            source_url: source_url.to_owned(),
            created_at: now,
            updated_at: now,
            polling_interval_secs: DEFAULT_ISSUE_POLLING_INTERVAL_SECS,
            last_polled_at: Some(now),
        }
    }

    pub fn effective_interval(&self, default_interval: Duration) -> Duration {
        if self.polling_interval_secs > 0 {
            Duration::from_secs(self.polling_interval_secs as u64)
        } else {
            default_interval
        }
    }

    /// True when the issue has never been polled or its interval has elapsed.
    pub fn is_due(&self, default_interval: Duration, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_polled_at else {
            return true;
        };
        let interval = self.effective_interval(default_interval);
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= interval,
            // last_polled_at in the future (clock skew or a fresh reset)
            Err(_) => false,
        }
    }
}

/// State of an issue as reported by the remote tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteIssue {
    pub key: String,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrStatus {
    #[default]
    Open,
    Draft,
    Review,
    Approved,
    Merged,
    Closed,
}

impl PrStatus {
    pub const ALL: [PrStatus; 6] = [
        PrStatus::Open,
        PrStatus::Draft,
        PrStatus::Review,
        PrStatus::Approved,
        PrStatus::Merged,
        PrStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PrStatus::Open => "open",
            PrStatus::Draft => "draft",
            PrStatus::Review => "review",
            PrStatus::Approved => "approved",
            PrStatus::Merged => "merged",
            PrStatus::Closed => "closed",
        }
    }

    /// Everything except `Merged` still counts as outstanding work.
    pub fn is_unmerged(self) -> bool {
        self != PrStatus::Merged
    }
}

impl fmt::Display for PrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        PrStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| format!("unknown pull request status '{s}'"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub id: i64,
    pub issue_id: i64,
    pub number: i64,
    pub repository: String,
    pub title: String,
    pub url: String,
    pub status: PrStatus,
    pub target_branch: String,
    pub is_backport: bool,
    /// Lookup-only reference to the PR this one backports.
    pub original_pr_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied pull request fields; identity and timestamps are
/// filled in by the core and the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PullRequestInput {
    pub number: i64,
    pub repository: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub status: PrStatus,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub is_backport: bool,
    #[serde(default)]
    pub original_pr_id: Option<i64>,
}

impl PullRequestInput {
    pub(crate) fn into_pull_request(
        self,
        id: i64,
        issue_id: i64,
        now: DateTime<Utc>,
    ) -> PullRequest {
        PullRequest {
            id,
            issue_id,
            number: self.number,
            repository: self.repository,
            title: self.title,
            url: self.url,
            status: self.status,
            target_branch: self.target_branch,
            is_backport: self.is_backport,
            original_pr_id: self.original_pr_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub id: i64,
    pub issue_id: i64,
    pub user_id: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable subscription fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub active: bool,
}
