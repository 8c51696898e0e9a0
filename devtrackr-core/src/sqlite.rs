//! SQLite-backed [`IssueStore`].
//!
//! Every operation reads and writes the database file directly, so several
//! processes (a `serve` loop and one-shot CLI commands, say) can share one
//! store without overwriting each other's rows. Uniqueness rules live in the
//! schema and surface as [`StoreError::Duplicate`].
//!
//! # Schema versioning
//!
//! The schema version is kept in `PRAGMA user_version`. Bump
//! `SCHEMA_VERSION` and add a step to `migrate` when the tables change.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::models::{Issue, PrStatus, PullRequest, Subscription};
use crate::store::IssueStore;

const SCHEMA_VERSION: i32 = 1;

// No foreign keys: deleting an issue leaves its pull requests and
// subscriptions in place.
const SCHEMA_V1: &str = r#"
BEGIN IMMEDIATE;
CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    source_url TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    polling_interval_secs INTEGER NOT NULL DEFAULT 0,
    last_polled_at TEXT
);
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    active INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(issue_id, user_id)
);
CREATE TABLE IF NOT EXISTS pull_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL,
    number INTEGER NOT NULL,
    repository TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    status TEXT NOT NULL,
    target_branch TEXT NOT NULL,
    is_backport INTEGER NOT NULL,
    original_pr_id INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(issue_id, number)
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id);
CREATE INDEX IF NOT EXISTS idx_pull_requests_issue ON pull_requests(issue_id);
PRAGMA user_version = 1;
COMMIT;
"#;

const ISSUE_COLUMNS: &str = "id, key, title, status, source_url, created_at, updated_at, \
     polling_interval_secs, last_polled_at";
const SUBSCRIPTION_COLUMNS: &str = "id, issue_id, user_id, active, created_at, updated_at";
const PULL_REQUEST_COLUMNS: &str = "id, issue_id, number, repository, title, url, status, \
     target_branch, is_backport, original_pr_id, created_at, updated_at";

/// Issue store persisted in a SQLite database.
///
/// Clones share one connection. Blocking rusqlite calls run on
/// `tokio::task::spawn_blocking` so the runtime threads stay free.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and brings its schema up to date.
    ///
    /// The connection uses `journal_mode = WAL` and a 5 s `busy_timeout` so a
    /// second process writing at the same moment waits instead of failing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;

        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            warn!(path = %path.display(), %journal_mode, "sqlite kept a non-WAL journal mode");
        }
        Self::configure(conn)
    }

    /// Opens a private database that lives only as long as this store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Unavailable {
                operation,
                reason: "connection lock poisoned".into(),
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable {
            operation,
            reason: e.to_string(),
        })?
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < 1 {
        debug!(from = version, to = SCHEMA_VERSION, "migrating store schema");
        conn.execute_batch(SCHEMA_V1)?;
    } else if version > SCHEMA_VERSION {
        warn!(version, supported = SCHEMA_VERSION, "store schema is newer than this build");
    }
    Ok(())
}

fn to_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_timestamp(idx, &raw)).transpose()
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        key: row.get(1)?,
        title: row.get(2)?,
        status: row.get(3)?,
        source_url: row.get(4)?,
        created_at: timestamp(row, 5)?,
        updated_at: timestamp(row, 6)?,
        polling_interval_secs: row.get(7)?,
        last_polled_at: optional_timestamp(row, 8)?,
    })
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        user_id: row.get(2)?,
        active: row.get(3)?,
        created_at: timestamp(row, 4)?,
        updated_at: timestamp(row, 5)?,
    })
}

fn pull_request_from_row(row: &Row<'_>) -> rusqlite::Result<PullRequest> {
    let status: String = row.get(6)?;
    let status = status
        .parse::<PrStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?;
    Ok(PullRequest {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        number: row.get(2)?,
        repository: row.get(3)?,
        title: row.get(4)?,
        url: row.get(5)?,
        status,
        target_branch: row.get(7)?,
        is_backport: row.get(8)?,
        original_pr_id: row.get(9)?,
        created_at: timestamp(row, 10)?,
        updated_at: timestamp(row, 11)?,
    })
}

/// Maps a UNIQUE violation to [`StoreError::Duplicate`].
fn write_error(err: rusqlite::Error, entity: &'static str, id: String) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::duplicate(entity, id)
        }
        other => StoreError::Sqlite(other),
    }
}

fn query_list<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[async_trait]
impl IssueStore for SqliteStore {
    async fn create_issue(&self, mut issue: Issue) -> Result<Issue, StoreError> {
        self.call("create_issue", move |conn| {
            conn.execute(
                "INSERT INTO issues (key, title, status, source_url, created_at, updated_at, \
                 polling_interval_secs, last_polled_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    issue.key,
                    issue.title,
                    issue.status,
                    issue.source_url,
                    to_text(&issue.created_at),
                    to_text(&issue.updated_at),
                    issue.polling_interval_secs,
                    issue.last_polled_at.as_ref().map(to_text),
                ],
            )
            .map_err(|e| write_error(e, "issue", issue.key.clone()))?;
            issue.id = conn.last_insert_rowid();
            Ok(issue)
        })
        .await
    }

    async fn get_issue(&self, key: &str) -> Result<Option<Issue>, StoreError> {
        let key = key.to_string();
        self.call("get_issue", move |conn| {
            let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE key = ?1");
            Ok(conn.query_row(&sql, [&key], issue_from_row).optional()?)
        })
        .await
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        self.call("list_issues", |conn| {
            let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues ORDER BY id");
            query_list(conn, &sql, [], issue_from_row)
        })
        .await
    }

    async fn update_issue(&self, issue: &Issue) -> Result<(), StoreError> {
        let issue = issue.clone();
        self.call("update_issue", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE issues SET key = ?1, title = ?2, status = ?3, source_url = ?4, \
                     created_at = ?5, updated_at = ?6, polling_interval_secs = ?7, \
                     last_polled_at = ?8 WHERE id = ?9",
                    params![
                        issue.key,
                        issue.title,
                        issue.status,
                        issue.source_url,
                        to_text(&issue.created_at),
                        to_text(&issue.updated_at),
                        issue.polling_interval_secs,
                        issue.last_polled_at.as_ref().map(to_text),
                        issue.id,
                    ],
                )
                .map_err(|e| write_error(e, "issue", issue.key.clone()))?;
            if changed == 0 {
                return Err(StoreError::missing("issue", issue.id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_issue(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.call("delete_issue", move |conn| {
            if conn.execute("DELETE FROM issues WHERE key = ?1", [&key])? == 0 {
                return Err(StoreError::missing("issue", key));
            }
            Ok(())
        })
        .await
    }

    async fn create_subscription(
        &self,
        mut sub: Subscription,
    ) -> Result<Subscription, StoreError> {
        self.call("create_subscription", move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO subscriptions (issue_id, user_id, active, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![sub.issue_id, sub.user_id, sub.active, to_text(&now)],
            )
            .map_err(|e| {
                write_error(e, "subscription", format!("{}/{}", sub.issue_id, sub.user_id))
            })?;
            sub.id = conn.last_insert_rowid();
            sub.created_at = now;
            sub.updated_at = now;
            Ok(sub)
        })
        .await
    }

    async fn get_subscription(
        &self,
        issue_id: i64,
        user_id: i64,
    ) -> Result<Option<Subscription>, StoreError> {
        self.call("get_subscription", move |conn| {
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions \
                 WHERE issue_id = ?1 AND user_id = ?2"
            );
            Ok(conn
                .query_row(&sql, [issue_id, user_id], subscription_from_row)
                .optional()?)
        })
        .await
    }

    async fn get_subscription_by_id(&self, id: i64) -> Result<Option<Subscription>, StoreError> {
        self.call("get_subscription_by_id", move |conn| {
            let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], subscription_from_row).optional()?)
        })
        .await
    }

    async fn list_subscriptions(&self, user_id: i64) -> Result<Vec<Subscription>, StoreError> {
        self.call("list_subscriptions", move |conn| {
            let sql = format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = ?1 ORDER BY id"
            );
            query_list(conn, &sql, [user_id], subscription_from_row)
        })
        .await
    }

    async fn update_subscription(&self, sub: &Subscription) -> Result<(), StoreError> {
        let sub = sub.clone();
        self.call("update_subscription", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE subscriptions SET issue_id = ?1, user_id = ?2, active = ?3, \
                     created_at = ?4, updated_at = ?5 WHERE id = ?6",
                    params![
                        sub.issue_id,
                        sub.user_id,
                        sub.active,
                        to_text(&sub.created_at),
                        to_text(&Utc::now()),
                        sub.id,
                    ],
                )
                .map_err(|e| {
                    write_error(e, "subscription", format!("{}/{}", sub.issue_id, sub.user_id))
                })?;
            if changed == 0 {
                return Err(StoreError::missing("subscription", sub.id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_subscription(&self, id: i64) -> Result<(), StoreError> {
        self.call("delete_subscription", move |conn| {
            if conn.execute("DELETE FROM subscriptions WHERE id = ?1", [id])? == 0 {
                return Err(StoreError::missing("subscription", id));
            }
            Ok(())
        })
        .await
    }

    async fn create_pull_request(&self, mut pr: PullRequest) -> Result<PullRequest, StoreError> {
        self.call("create_pull_request", move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO pull_requests (issue_id, number, repository, title, url, status, \
                 target_branch, is_backport, original_pr_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    pr.issue_id,
                    pr.number,
                    pr.repository,
                    pr.title,
                    pr.url,
                    pr.status.as_str(),
                    pr.target_branch,
                    pr.is_backport,
                    pr.original_pr_id,
                    to_text(&now),
                ],
            )
            .map_err(|e| {
                write_error(e, "pull request", format!("{}#{}", pr.issue_id, pr.number))
            })?;
            pr.id = conn.last_insert_rowid();
            pr.created_at = now;
            pr.updated_at = now;
            Ok(pr)
        })
        .await
    }

    async fn get_pull_request(
        &self,
        issue_id: i64,
        number: i64,
    ) -> Result<Option<PullRequest>, StoreError> {
        self.call("get_pull_request", move |conn| {
            let sql = format!(
                "SELECT {PULL_REQUEST_COLUMNS} FROM pull_requests \
                 WHERE issue_id = ?1 AND number = ?2"
            );
            Ok(conn
                .query_row(&sql, [issue_id, number], pull_request_from_row)
                .optional()?)
        })
        .await
    }

    async fn list_pull_requests(&self, issue_id: i64) -> Result<Vec<PullRequest>, StoreError> {
        self.call("list_pull_requests", move |conn| {
            let sql = format!(
                "SELECT {PULL_REQUEST_COLUMNS} FROM pull_requests WHERE issue_id = ?1 ORDER BY id"
            );
            query_list(conn, &sql, [issue_id], pull_request_from_row)
        })
        .await
    }

    async fn update_pull_request(&self, pr: &PullRequest) -> Result<(), StoreError> {
        let pr = pr.clone();
        self.call("update_pull_request", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE pull_requests SET issue_id = ?1, number = ?2, repository = ?3, \
                     title = ?4, url = ?5, status = ?6, target_branch = ?7, is_backport = ?8, \
                     original_pr_id = ?9, updated_at = ?10 WHERE id = ?11",
                    params![
                        pr.issue_id,
                        pr.number,
                        pr.repository,
                        pr.title,
                        pr.url,
                        pr.status.as_str(),
                        pr.target_branch,
                        pr.is_backport,
                        pr.original_pr_id,
                        to_text(&Utc::now()),
                        pr.id,
                    ],
                )
                .map_err(|e| {
                    write_error(e, "pull request", format!("{}#{}", pr.issue_id, pr.number))
                })?;
            if changed == 0 {
                return Err(StoreError::missing("pull request", pr.id));
            }
            Ok(())
        })
        .await
    }

    async fn get_unmerged_pull_requests(
        &self,
        issue_id: i64,
    ) -> Result<Vec<PullRequest>, StoreError> {
        self.call("get_unmerged_pull_requests", move |conn| {
            let sql = format!(
                "SELECT {PULL_REQUEST_COLUMNS} FROM pull_requests \
                 WHERE issue_id = ?1 AND status != ?2 ORDER BY id"
            );
            query_list(
                conn,
                &sql,
                params![issue_id, PrStatus::Merged.as_str()],
                pull_request_from_row,
            )
        })
        .await
    }
}
