use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, rusqlite};

use super::{SqliteStore, db_err, decode_enum, decode_time, encode_time};
use crate::core::error::StoreError;
use crate::core::models::{JobDefinition, JobStatus};
use crate::core::store::JobStore;

const JOB_COLUMNS: &str = "id, name, operation_mode, transfer_mode, source_path, remote_name,
    destination_path, pre_script, post_script, schedule_cron, max_retention, encryption_key,
    active, status, last_run_at, created_at";

/// A `jobs` row before its text columns are decoded.
struct JobRow {
    id: String,
    name: String,
    operation_mode: String,
    transfer_mode: String,
    source_path: String,
    remote_name: String,
    destination_path: String,
    pre_script: Option<String>,
    post_script: Option<String>,
    schedule_cron: String,
    max_retention: u32,
    encryption_key: Option<String>,
    active: bool,
    status: String,
    last_run_at: Option<String>,
    created_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            operation_mode: row.get(2)?,
            transfer_mode: row.get(3)?,
            source_path: row.get(4)?,
            remote_name: row.get(5)?,
            destination_path: row.get(6)?,
            pre_script: row.get(7)?,
            post_script: row.get(8)?,
            schedule_cron: row.get(9)?,
            max_retention: row.get(10)?,
            encryption_key: row.get(11)?,
            active: row.get(12)?,
            status: row.get(13)?,
            last_run_at: row.get(14)?,
            created_at: row.get(15)?,
        })
    }

    fn decode(self) -> Result<JobDefinition, StoreError> {
        Ok(JobDefinition {
            operation_mode: decode_enum("jobs", &self.operation_mode)?,
            transfer_mode: decode_enum("jobs", &self.transfer_mode)?,
            status: decode_enum("jobs", &self.status)?,
            last_run: self
                .last_run_at
                .as_deref()
                .map(|raw| decode_time("jobs", raw))
                .transpose()?,
            created_at: decode_time("jobs", &self.created_at)?,
            id: self.id,
            name: self.name,
            source_path: self.source_path,
            remote_name: self.remote_name,
            destination_path: self.destination_path,
            pre_script: self.pre_script,
            post_script: self.post_script,
            schedule_cron: self.schedule_cron,
            max_retention: self.max_retention,
            encryption_key: self.encryption_key,
            active: self.active,
        })
    }
}

impl SqliteStore {
    async fn query_jobs(&self, filter: &'static str, arg: Option<String>) -> Result<Vec<JobDefinition>, StoreError> {
        let rows = self
            .conn
            .call(move |c| {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs {filter} ORDER BY created_at, id");
                let mut stmt = c.prepare(&sql)?;
                let rows = match &arg {
                    Some(arg) => stmt.query_map(params![arg], JobRow::from_row)?,
                    None => stmt.query_map([], JobRow::from_row)?,
                };
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await
            .map_err(db_err)?;

        rows.into_iter().map(JobRow::decode).collect()
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create(&self, job: JobDefinition) -> Result<JobDefinition, StoreError> {
        let job = job.normalized();
        let row = job.clone();

        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO jobs (id, name, operation_mode, transfer_mode, source_path,
                        remote_name, destination_path, pre_script, post_script, schedule_cron,
                        max_retention, encryption_key, active, status, last_run_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                        CASE WHEN ?4 = 'sync' THEN 0 ELSE ?11 END, ?12, ?13, ?14, ?15, ?16)",
                    params![
                        row.id,
                        row.name,
                        row.operation_mode.as_str(),
                        row.transfer_mode.as_str(),
                        row.source_path,
                        row.remote_name,
                        row.destination_path,
                        row.pre_script,
                        row.post_script,
                        row.schedule_cron,
                        row.max_retention,
                        row.encryption_key,
                        row.active,
                        row.status.as_str(),
                        row.last_run.map(encode_time),
                        encode_time(row.created_at),
                    ],
                )?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .map_err(db_err)?;

        Ok(job)
    }

    async fn update(&self, job: JobDefinition) -> Result<bool, StoreError> {
        let row = job.normalized();
        let changed = self
            .conn
            .call(move |c| {
                c.execute(
                    "UPDATE jobs SET name = ?2, operation_mode = ?3, transfer_mode = ?4,
                        source_path = ?5, remote_name = ?6, destination_path = ?7,
                        pre_script = ?8, post_script = ?9, schedule_cron = ?10,
                        max_retention = CASE WHEN ?4 = 'sync' THEN 0 ELSE ?11 END,
                        encryption_key = ?12
                     WHERE id = ?1",
                    params![
                        row.id,
                        row.name,
                        row.operation_mode.as_str(),
                        row.transfer_mode.as_str(),
                        row.source_path,
                        row.remote_name,
                        row.destination_path,
                        row.pre_script,
                        row.post_script,
                        row.schedule_cron,
                        row.max_retention,
                        row.encryption_key,
                    ],
                )
            })
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<JobDefinition>, StoreError> {
        let mut jobs = self.query_jobs("WHERE id = ?1", Some(id.to_string())).await?;
        Ok(jobs.pop())
    }

    async fn find_scheduled(&self) -> Result<Vec<JobDefinition>, StoreError> {
        self.query_jobs("WHERE active = 1 AND TRIM(schedule_cron) <> ''", None)
            .await
    }

    async fn list(&self) -> Result<Vec<JobDefinition>, StoreError> {
        self.query_jobs("", None).await
    }

    async fn try_claim(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |c| {
                c.execute(
                    "UPDATE jobs SET status = 'RUNNING', last_run_at = ?2
                     WHERE id = ?1 AND status <> 'RUNNING'",
                    params![id, encode_time(at)],
                )
            })
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    async fn finish(&self, id: &str, status: JobStatus, at: DateTime<Utc>) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |c| {
                c.execute(
                    "UPDATE jobs SET status = ?2, last_run_at = ?3 WHERE id = ?1",
                    params![id, status.as_str(), encode_time(at)],
                )
            })
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn release_interrupted(&self) -> Result<u64, StoreError> {
        let changed = self
            .conn
            .call(|c| c.execute("UPDATE jobs SET status = 'PENDING' WHERE status = 'RUNNING'", []))
            .await
            .map_err(db_err)?;
        Ok(changed as u64)
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |c| c.execute("UPDATE jobs SET active = ?2 WHERE id = ?1", params![id, active]))
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    async fn count_on_remote(&self, remote: &str) -> Result<u64, StoreError> {
        let remote = remote.to_string();
        let count: i64 = self
            .conn
            .call(move |c| {
                c.query_row(
                    "SELECT COUNT(*) FROM jobs WHERE remote_name = ?1 AND operation_mode <> 'RESTORE'",
                    params![remote],
                    |row| row.get(0),
                )
            })
            .await
            .map_err(db_err)?;
        Ok(count.max(0) as u64)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |c| c.execute("DELETE FROM jobs WHERE id = ?1", params![id]))
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }
}
