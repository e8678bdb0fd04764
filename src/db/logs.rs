use async_trait::async_trait;
use tokio_rusqlite::{params, rusqlite};

use super::{SqliteStore, db_err, decode_enum, decode_time, encode_time};
use crate::core::error::StoreError;
use crate::core::models::LogEntry;
use crate::core::store::LogStore;

#[async_trait]
impl LogStore for SqliteStore {
    /// Append one entry and prune history beyond the configured bound, in a
    /// single transaction. A job id that no longer exists is stored as NULL.
    async fn append(&self, entry: &LogEntry) -> Result<i64, StoreError> {
        let entry = entry.clone();
        let limit = self.log_history_limit;

        self.conn
            .call(move |c| {
                let tx = c.transaction()?;

                tx.execute(
                    "INSERT INTO job_logs (job_id, status, message, duration_secs, transferred_bytes, timestamp)
                     VALUES ((SELECT id FROM jobs WHERE id = ?1), ?2, ?3, ?4, ?5, ?6)",
                    params![
                        entry.job_id,
                        entry.status.as_str(),
                        entry.message,
                        entry.duration_secs as i64,
                        entry.transferred_bytes as i64,
                        encode_time(entry.timestamp),
                    ],
                )?;
                let id = tx.last_insert_rowid();

                if limit > 0 {
                    tx.execute(
                        "DELETE FROM job_logs WHERE id NOT IN
                            (SELECT id FROM job_logs ORDER BY id DESC LIMIT ?1)",
                        params![limit],
                    )?;
                }

                tx.commit()?;
                Ok::<i64, rusqlite::Error>(id)
            })
            .await
            .map_err(db_err)
    }

    async fn recent(&self, limit: u32) -> Result<Vec<LogEntry>, StoreError> {
        type Raw = (i64, Option<String>, String, String, i64, i64, String);

        let rows: Vec<Raw> = self
            .conn
            .call(move |c| {
                let mut stmt = c.prepare(
                    "SELECT id, job_id, status, message, duration_secs, transferred_bytes, timestamp
                     FROM job_logs ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })?;
                rows.collect::<rusqlite::Result<Vec<Raw>>>()
            })
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|(id, job_id, status, message, duration, bytes, timestamp)| {
                Ok(LogEntry {
                    id: Some(id),
                    job_id,
                    status: decode_enum("job_logs", &status)?,
                    message,
                    duration_secs: duration.max(0) as u64,
                    transferred_bytes: bytes.max(0) as u64,
                    timestamp: decode_time("job_logs", &timestamp)?,
                })
            })
            .collect()
    }
}
