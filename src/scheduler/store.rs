//! Durable schedule entries.
//!
//! The schedule store is independent of the main [`Storage`](crate::storage::Storage):
//! it only knows which timers exist, what fires them and when they are next due.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::core::trigger::Trigger;
use crate::core::types::{ScheduleId, TaskId};
use crate::storage::StorageError;

/// One scheduled timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: ScheduleId,
    pub task_id: TaskId,
    pub trigger: Trigger,
    /// `None` once the trigger has no further fire.
    pub next_run_time: Option<DateTime<Utc>>,
    pub paused: bool,
}

impl ScheduleEntry {
    /// Create an active entry due at the trigger's first fire after `now`.
    pub fn new(
        id: ScheduleId,
        task_id: TaskId,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Result<Self, crate::core::trigger::TriggerError> {
        let next_run_time = trigger.next_fire(None, now)?;
        Ok(Self {
            id,
            task_id,
            trigger,
            next_run_time,
            paused: false,
        })
    }

    /// Whether the entry should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.paused && self.next_run_time.is_some_and(|next| next <= now)
    }
}

/// Persistence for schedule entries.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert an entry, replacing any entry with the same id.
    async fn upsert(&self, entry: ScheduleEntry) -> Result<(), StorageError>;

    async fn get(&self, id: &ScheduleId) -> Result<ScheduleEntry, StorageError>;

    /// All entries, ordered by id.
    async fn list(&self) -> Result<Vec<ScheduleEntry>, StorageError>;

    /// Entries that are not paused and due at or before `now`.
    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, StorageError>;

    async fn remove(&self, id: &ScheduleId) -> Result<(), StorageError>;
}

/// In-memory schedule store.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    entries: RwLock<BTreeMap<ScheduleId, ScheduleEntry>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn upsert(&self, entry: ScheduleEntry) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn get(&self, id: &ScheduleId) -> Result<ScheduleEntry, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        entries
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("schedule {}", id)))
    }

    async fn list(&self) -> Result<Vec<ScheduleEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.values().cloned().collect())
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.values().filter(|e| e.is_due(now)).cloned().collect())
    }

    async fn remove(&self, id: &ScheduleId) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("schedule {}", id)))
    }
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteScheduleStore;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use chrono::SecondsFormat;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
    use std::path::Path;
    use std::str::FromStr;

    type ScheduleRow = (String, String, String, Option<String>, bool);

    /// SQLite schedule store.
    pub struct SqliteScheduleStore {
        pool: SqlitePool,
    }

    impl SqliteScheduleStore {
        /// Open (or create) the schedule database at `path`.
        pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
            let options =
                SqliteConnectOptions::from_str(&format!("sqlite:{}", path.as_ref().to_string_lossy()))
                    .map_err(db_err)?
                    .create_if_missing(true);
            Self::connect(options, 5).await
        }

        /// In-memory database, for tests.
        pub async fn in_memory() -> Result<Self, StorageError> {
            let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
            Self::connect(options, 1).await
        }

        async fn connect(
            options: SqliteConnectOptions,
            max_connections: u32,
        ) -> Result<Self, StorageError> {
            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await
                .map_err(db_err)?;
            let schema = include_str!("../../migrations/002_schedule_store.sql");
            sqlx::raw_sql(schema)
                .execute(&pool)
                .await
                .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
            Ok(Self { pool })
        }

        pub async fn close(&self) {
            self.pool.close().await;
        }
    }

    fn db_err(e: sqlx::Error) -> StorageError {
        StorageError::Other(e.to_string())
    }

    // Fixed width so that text comparison orders instants.
    fn time_key(time: DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn row_to_entry(row: ScheduleRow) -> Result<ScheduleEntry, StorageError> {
        let (id, task_id, trigger_def, next_run_time, paused) = row;
        let next_run_time = next_run_time
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        StorageError::SerializationError(format!("bad timestamp '{}': {}", s, e))
                    })
            })
            .transpose()?;
        Ok(ScheduleEntry {
            id: ScheduleId::new(id),
            task_id: TaskId::new(task_id),
            trigger: serde_json::from_str(&trigger_def)?,
            next_run_time,
            paused,
        })
    }

    #[async_trait]
    impl ScheduleStore for SqliteScheduleStore {
        async fn upsert(&self, entry: ScheduleEntry) -> Result<(), StorageError> {
            sqlx::query(
                "INSERT INTO schedules (id, task_id, trigger_def, next_run_time, paused)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    task_id = excluded.task_id,
                    trigger_def = excluded.trigger_def,
                    next_run_time = excluded.next_run_time,
                    paused = excluded.paused",
            )
            .bind(entry.id.as_str())
            .bind(entry.task_id.as_str())
            .bind(serde_json::to_string(&entry.trigger)?)
            .bind(entry.next_run_time.map(time_key))
            .bind(entry.paused)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(())
        }

        async fn get(&self, id: &ScheduleId) -> Result<ScheduleEntry, StorageError> {
            let row: Option<ScheduleRow> = sqlx::query_as(
                "SELECT id, task_id, trigger_def, next_run_time, paused FROM schedules WHERE id = ?",
            )
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
            row.map(row_to_entry)
                .transpose()?
                .ok_or_else(|| StorageError::NotFound(format!("schedule {}", id)))
        }

        async fn list(&self) -> Result<Vec<ScheduleEntry>, StorageError> {
            let rows: Vec<ScheduleRow> = sqlx::query_as(
                "SELECT id, task_id, trigger_def, next_run_time, paused FROM schedules ORDER BY id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.into_iter().map(row_to_entry).collect()
        }

        async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleEntry>, StorageError> {
            let rows: Vec<ScheduleRow> = sqlx::query_as(
                "SELECT id, task_id, trigger_def, next_run_time, paused FROM schedules
                 WHERE paused = 0 AND next_run_time IS NOT NULL AND next_run_time <= ?
                 ORDER BY next_run_time, id",
            )
            .bind(time_key(now))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            rows.into_iter().map(row_to_entry).collect()
        }

        async fn remove(&self, id: &ScheduleId) -> Result<(), StorageError> {
            let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
                .bind(id.as_str())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
            if result.rows_affected() == 0 {
                return Err(StorageError::NotFound(format!("schedule {}", id)));
            }
            Ok(())
        }
    }
}
