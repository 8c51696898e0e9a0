use thiserror::Error;

/// Failure talking to the remote issue tracker.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid issue reference: {0}")]
    InvalidReference(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("tracker returned status {status} for {key}")]
    Status { status: u16, key: String },
    #[error("unexpected tracker payload: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },
    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: String },
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store unavailable during {operation}: {reason}")]
    Unavailable {
        operation: &'static str,
        reason: String,
    },
}

impl StoreError {
    pub(crate) fn missing(entity: &'static str, id: impl ToString) -> Self {
        Self::Missing {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn duplicate(entity: &'static str, id: impl ToString) -> Self {
        Self::Duplicate {
            entity,
            id: id.to_string(),
        }
    }
}

/// Errors surfaced by the tracking core.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("issue source unavailable: {0}")]
    SourceUnavailable(#[from] SourceError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for TrackError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Missing { entity, id } => TrackError::NotFound(format!("{entity} {id}")),
            other => TrackError::Store(other),
        }
    }
}

impl TrackError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrackError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, TrackError::Conflict(_))
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
    #[error("config i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
