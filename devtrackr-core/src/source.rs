use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::SourceError;
use crate::models::RemoteIssue;

/// Read access to the remote issue tracker.
#[async_trait]
pub trait IssueSource: Send + Sync {
    /// Fetches the current state of the issue behind `reference`.
    async fn get_issue(&self, reference: &str) -> Result<RemoteIssue, SourceError>;
}

/// Derives the issue key from a tracker URL: the last non-empty path segment.
pub fn issue_key_from_reference(reference: &str) -> Result<String, SourceError> {
    let url = Url::parse(reference.trim())
        .map_err(|e| SourceError::InvalidReference(format!("{reference}: {e}")))?;
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(ToOwned::to_owned)
        .ok_or_else(|| SourceError::InvalidReference(format!("{reference}: no issue key in path")))
}

#[derive(Debug, Deserialize)]
struct JiraIssuePayload {
    fields: JiraFields,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    #[serde(default)]
    summary: String,
    status: JiraStatus,
}

#[derive(Debug, Deserialize)]
struct JiraStatus {
    name: String,
}

/// Jira REST v2 adapter.
#[derive(Debug, Clone)]
pub struct JiraClient {
    base_url: String,
    client: Client,
}

impl JiraClient {
    pub fn new(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client,
        }
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("devtrackr/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(base_url, client))
    }
}

#[async_trait]
impl IssueSource for JiraClient {
    async fn get_issue(&self, reference: &str) -> Result<RemoteIssue, SourceError> {
        let key = issue_key_from_reference(reference)?;
        let api_url = format!("{}/rest/api/2/issue/{}", self.base_url, key);
        debug!(%key, url = %api_url, "fetching issue");

        let response = self
            .client
            .get(api_url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                key,
            });
        }

        let payload: JiraIssuePayload = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        Ok(RemoteIssue {
            key,
            title: payload.fields.summary,
            status: payload.fields.status.name,
        })
    }
}
