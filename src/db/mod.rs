mod conflict_repo;
mod entity_repo;
mod queue_repo;

pub use conflict_repo::{ConflictRecord, ConflictRepository};
pub use entity_repo::EntityRepository;
pub use queue_repo::{QueueError, QueueStats, SyncQueue};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use possync_core::SyncError;

/// Errors from the local SQLite store.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to create database directory '{path}': {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid JSON in column '{column}': {source}")]
    Json {
        column: &'static str,
        source: serde_json::Error,
    },

    #[error("Invalid timestamp '{0}'")]
    Timestamp(String),

    #[error("Invalid id '{0}'")]
    Id(String),

    #[error("Value {0} is out of range for an integer column")]
    Overflow(u64),

    #[error("Invalid stored value: {0}")]
    Value(#[from] SyncError),
}

/// Initialize the database connection pool and run migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, DbError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|source| DbError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::debug!("Opened database {}", path.display());
    Ok(pool)
}

/// Fixed-width UTC timestamps, so lexical order in SQL equals time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::Timestamp(s.to_string()))
}

pub(crate) fn parse_opt_ts(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DbError> {
    s.map(parse_ts).transpose()
}

pub(crate) fn to_db_int(value: u64) -> Result<i64, DbError> {
    i64::try_from(value).map_err(|_| DbError::Overflow(value))
}

pub(crate) fn to_json<T: serde::Serialize>(
    column: &'static str,
    value: &T,
) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|source| DbError::Json { column, source })
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(
    column: &'static str,
    raw: &str,
) -> Result<T, DbError> {
    serde_json::from_str(raw).map_err(|source| DbError::Json { column, source })
}
