pub mod config;
pub mod error;
pub mod models;
pub mod poller;
pub mod source;
pub mod sqlite;
pub mod storage;
pub mod store;
pub mod tracking;

pub use config::AppConfig;
pub use error::{ConfigError, SchedulerError, SourceError, StoreError, TrackError};
pub use models::{
    Issue, PrStatus, PullRequest, PullRequestInput, RemoteIssue, Subscription, SubscriptionUpdate,
    DEFAULT_ISSUE_POLLING_INTERVAL_SECS,
};
pub use poller::{poll_once, CycleReport, PollConfig, Scheduler, SchedulerHandle, DEFAULT_TICK};
pub use source::{issue_key_from_reference, IssueSource, JiraClient};
pub use sqlite::SqliteStore;
pub use storage::MemoryStore;
pub use store::IssueStore;
pub use tracking::{SyncOutcome, TrackingService};
