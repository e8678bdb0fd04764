//! SQLite persistence for jobs, logs and remote status.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use tokio_rusqlite::{Connection, rusqlite};

use crate::core::error::StoreError;

mod jobs;
mod logs;
mod remotes;

/// One connection implementing every store trait the engine needs.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
    log_history_limit: u32,
}

impl SqliteStore {
    pub async fn open(path: impl AsRef<Path>, log_history_limit: u32) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .await
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::init(conn, log_history_limit).await
    }

    pub async fn open_in_memory(log_history_limit: u32) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .context("Failed to open in-memory database")?;
        Self::init(conn, log_history_limit).await
    }

    async fn init(conn: Connection, log_history_limit: u32) -> Result<Self> {
        conn.call(|conn| {
            // Foreign keys are off by default in SQLite.
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(include_str!("schema.sql"))?;
            Ok::<(), rusqlite::Error>(())
        })
        .await
        .context("Failed to apply database schema")?;

        Ok(Self {
            conn,
            log_history_limit,
        })
    }
}

fn db_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::database(e)
}

fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            details: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn decode_enum<T>(table: &'static str, raw: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| StoreError::Corrupt {
        table,
        details: e.to_string(),
    })
}
