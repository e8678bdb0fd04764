use async_trait::async_trait;
use tokio_rusqlite::{params, rusqlite};

use super::{SqliteStore, db_err, decode_enum, decode_time, encode_time};
use crate::core::error::StoreError;
use crate::core::models::RemoteStatus;
use crate::core::store::RemoteStore;

type RemoteRow = (String, String, f64, f64, f64, String, String, i64, String);

const REMOTE_COLUMNS: &str =
    "name, state, total_gb, used_gb, free_gb, owner_email, last_checked, active_jobs, message";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RemoteRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode(row: RemoteRow) -> Result<RemoteStatus, StoreError> {
    let (name, state, total_gb, used_gb, free_gb, owner_email, last_checked, active_jobs, message) = row;
    Ok(RemoteStatus {
        name,
        state: decode_enum("remotes", &state)?,
        total_gb,
        used_gb,
        free_gb,
        owner_email,
        last_checked: decode_time("remotes", &last_checked)?,
        active_jobs: active_jobs.max(0) as u64,
        message,
    })
}

#[async_trait]
impl RemoteStore for SqliteStore {
    async fn upsert(&self, status: &RemoteStatus) -> Result<(), StoreError> {
        let s = status.clone();
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO remotes (name, state, total_gb, used_gb, free_gb, owner_email,
                        last_checked, active_jobs, message)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(name) DO UPDATE SET
                        state = excluded.state,
                        total_gb = excluded.total_gb,
                        used_gb = excluded.used_gb,
                        free_gb = excluded.free_gb,
                        owner_email = excluded.owner_email,
                        last_checked = excluded.last_checked,
                        active_jobs = excluded.active_jobs,
                        message = excluded.message",
                    params![
                        s.name,
                        s.state.as_str(),
                        s.total_gb,
                        s.used_gb,
                        s.free_gb,
                        s.owner_email,
                        encode_time(s.last_checked),
                        s.active_jobs as i64,
                        s.message,
                    ],
                )?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .map_err(db_err)
    }

    async fn update(&self, status: &RemoteStatus) -> Result<bool, StoreError> {
        let s = status.clone();
        let changed = self
            .conn
            .call(move |c| {
                c.execute(
                    "UPDATE remotes SET state = ?2, total_gb = ?3, used_gb = ?4, free_gb = ?5,
                        owner_email = ?6, last_checked = ?7, active_jobs = ?8, message = ?9
                     WHERE name = ?1",
                    params![
                        s.name,
                        s.state.as_str(),
                        s.total_gb,
                        s.used_gb,
                        s.free_gb,
                        s.owner_email,
                        encode_time(s.last_checked),
                        s.active_jobs as i64,
                        s.message,
                    ],
                )
            })
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    async fn find(&self, name: &str) -> Result<Option<RemoteStatus>, StoreError> {
        let name = name.to_string();
        let row = self
            .conn
            .call(move |c| {
                let sql = format!("SELECT {REMOTE_COLUMNS} FROM remotes WHERE name = ?1");
                match c.query_row(&sql, params![name], read_row) {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(db_err)?;

        row.map(decode).transpose()
    }

    async fn list(&self) -> Result<Vec<RemoteStatus>, StoreError> {
        let rows = self
            .conn
            .call(|c| {
                let sql = format!("SELECT {REMOTE_COLUMNS} FROM remotes ORDER BY name");
                let mut stmt = c.prepare(&sql)?;
                let rows = stmt.query_map([], read_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await
            .map_err(db_err)?;

        rows.into_iter().map(decode).collect()
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.to_string();
        let changed = self
            .conn
            .call(move |c| c.execute("DELETE FROM remotes WHERE name = ?1", params![name]))
            .await
            .map_err(db_err)?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ConnectionState;
    use chrono::Utc;

    #[tokio::test]
    async fn upsert_replaces_by_name() {
        let store = SqliteStore::open_in_memory(10).await.unwrap();
        store
            .upsert(&RemoteStatus::pending("gdrive", Utc::now()))
            .await
            .unwrap();

        let connected = RemoteStatus {
            state: ConnectionState::Connected,
            total_gb: 15.0,
            used_gb: 3.5,
            free_gb: 11.5,
            owner_email: "ops@example.com".to_string(),
            active_jobs: 2,
            ..RemoteStatus::pending("gdrive", Utc::now())
        };
        store.upsert(&connected).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        let found = store.find("gdrive").await.unwrap().unwrap();
        assert_eq!(found.state, ConnectionState::Connected);
        assert_eq!(found.free_gb, 11.5);
        assert_eq!(found.owner_email, "ops@example.com");
        assert_eq!(found.active_jobs, 2);
    }

    #[tokio::test]
    async fn find_and_delete_missing() {
        let store = SqliteStore::open_in_memory(10).await.unwrap();
        assert!(store.find("nope").await.unwrap().is_none());
        assert!(!store.delete("nope").await.unwrap());
    }
}
