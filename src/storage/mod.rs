//! Durable state the framework's core owns directly: the scheduler's
//! deleted-task archive and the packet router's frame store (spec §4.G,
//! §4.J, §9 "append-only list of deleted tasks").
//!
//! Grounded on the reference crate's `database.rs`: a `SqlitePool` behind a
//! thin connection wrapper, `sqlx::migrate!()` embedded migrations, WAL mode
//! for concurrent readers. Everything `original_source/mcs` delegates to
//! PostgreSQL/timescale stays out of scope (spec Non-goals); this module
//! only covers the two archives the core contract in spec §1 names.

use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use sqlx::{migrate::Migrator, sqlite::SqliteConnectOptions, ConnectOptions, Pool, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::info;

use crate::domain_types::{RotatorName, Timestamp};
use crate::scheduler::{Task, TaskStatus};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Errors from the deleted-task archive or packet store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The underlying `SQLite` connection or query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedded migrations failed to apply.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row's JSON-shaped column failed to (de)serialize.
    #[error("malformed row in '{table}': {source}")]
    MalformedRow {
        /// Table the row came from.
        table: &'static str,
        /// Underlying serialization error.
        source: serde_json::Error,
    },
}

/// One archived (executed or cancelled) task row, as read back from
/// `deleted_tasks`.
#[derive(Debug, Clone)]
pub struct ArchivedTask {
    /// The task as it stood at the moment it was archived.
    pub task: Task,
    /// When this row was written, UTC.
    pub deleted_at: Timestamp,
}

/// One stored packet frame, as read back from `packets`.
#[derive(Debug, Clone)]
pub struct StoredPacket {
    /// Originating endpoint name.
    pub source: String,
    /// Satellite tag, if the frame carried one.
    pub satellite: Option<String>,
    /// When this row was written, UTC.
    pub received_at: Timestamp,
    /// The decoded frame.
    pub frame: Value,
}

/// Connection handle over the embedded `SQLite` archive database.
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    /// Opens (creating if missing) the database at `path`, applying WAL
    /// mode and running embedded migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .disable_statement_logging();

        let pool = SqlitePool::connect_with(options).await?;
        MIGRATOR.run(&pool).await?;
        info!(path = %path.as_ref().display(), "storage database ready");
        Ok(Self { pool })
    }

    /// Builds a handle over an in-memory database, for tests.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePool::connect(":memory:").await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Appends `task` to the deleted-task archive (spec §9).
    pub async fn archive_task(&self, task: &Task) -> Result<(), StorageError> {
        let rotators: Vec<String> = task.rotators.iter().map(RotatorName::to_string).collect();
        let rotators_json = serde_json::to_string(&rotators)
            .map_err(|source| StorageError::MalformedRow { table: "deleted_tasks", source })?;
        let overrides_json = serde_json::to_string(&task.process_overrides)
            .map_err(|source| StorageError::MalformedRow { table: "deleted_tasks", source })?;
        let status = format!("{:?}", task.status);

        sqlx::query(
            "INSERT INTO deleted_tasks \
             (task_name, process_name, start_time, end_time, status, rotators, auto_scheduled, process_overrides, deleted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.task_name)
        .bind(&task.process_name)
        .bind(task.start_time.to_rfc3339())
        .bind(task.end_time.to_rfc3339())
        .bind(status)
        .bind(rotators_json)
        .bind(task.auto_scheduled)
        .bind(overrides_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every archived task for `process_name`, most recently deleted first.
    pub async fn list_deleted_tasks(&self, process_name: &str) -> Result<Vec<ArchivedTask>, StorageError> {
        let rows = sqlx::query_as::<_, DeletedTaskRow>(
            "SELECT task_name, process_name, start_time, end_time, status, rotators, auto_scheduled, process_overrides, deleted_at \
             FROM deleted_tasks WHERE process_name = ? ORDER BY deleted_at DESC",
        )
        .bind(process_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ArchivedTask::try_from).collect()
    }

    /// Records one routed packet frame (spec §4.J's frame store).
    pub async fn store_packet(&self, source: &str, satellite: Option<&str>, frame: &Value) -> Result<(), StorageError> {
        let frame_json = serde_json::to_string(frame).map_err(|source| StorageError::MalformedRow { table: "packets", source })?;
        sqlx::query("INSERT INTO packets (source, satellite, received_at, frame) VALUES (?, ?, ?, ?)")
            .bind(source)
            .bind(satellite)
            .bind(Utc::now().to_rfc3339())
            .bind(frame_json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The most recently stored packets from `source`, newest first.
    pub async fn list_packets(&self, source: &str, limit: i64) -> Result<Vec<StoredPacket>, StorageError> {
        let rows = sqlx::query_as::<_, PacketRow>(
            "SELECT source, satellite, received_at, frame FROM packets WHERE source = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(source)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredPacket::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct DeletedTaskRow {
    task_name: String,
    process_name: String,
    start_time: String,
    end_time: String,
    status: String,
    rotators: String,
    auto_scheduled: bool,
    process_overrides: String,
    deleted_at: String,
}

impl TryFrom<DeletedTaskRow> for ArchivedTask {
    type Error = StorageError;

    fn try_from(row: DeletedTaskRow) -> Result<Self, StorageError> {
        let rotator_names: Vec<String> = serde_json::from_str(&row.rotators)
            .map_err(|source| StorageError::MalformedRow { table: "deleted_tasks", source })?;
        let rotators = rotator_names
            .into_iter()
            .filter_map(|name| RotatorName::try_new(name).ok())
            .collect();
        let process_overrides = serde_json::from_str(&row.process_overrides)
            .map_err(|source| StorageError::MalformedRow { table: "deleted_tasks", source })?;
        let status = match row.status.as_str() {
            "Executed" => TaskStatus::Executed,
            _ => TaskStatus::Cancelled,
        };

        Ok(ArchivedTask {
            task: Task {
                task_name: row.task_name,
                process_name: row.process_name,
                start_time: parse_timestamp(&row.start_time)?,
                end_time: parse_timestamp(&row.end_time)?,
                rotators,
                status,
                auto_scheduled: row.auto_scheduled,
                process_overrides,
            },
            deleted_at: parse_timestamp(&row.deleted_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PacketRow {
    source: String,
    satellite: Option<String>,
    received_at: String,
    frame: String,
}

impl TryFrom<PacketRow> for StoredPacket {
    type Error = StorageError;

    fn try_from(row: PacketRow) -> Result<Self, StorageError> {
        Ok(StoredPacket {
            source: row.source,
            satellite: row.satellite,
            received_at: parse_timestamp(&row.received_at)?,
            frame: serde_json::from_str(&row.frame).map_err(|source| StorageError::MalformedRow { table: "packets", source })?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<Timestamp, StorageError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| StorageError::MalformedRow { table: "deleted_tasks", source: serde_json::Error::io(std::io::Error::other(source)) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn sample_task() -> Task {
        Task {
            task_name: "ISS-pass #1".to_string(),
            process_name: "ISS-pass".to_string(),
            start_time: Utc.with_ymd_and_hms(2025, 1, 2, 10, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 1, 2, 10, 10, 0).unwrap(),
            rotators: HashSet::from([RotatorName::try_new("uhf".to_string()).unwrap()]),
            status: TaskStatus::Executed,
            auto_scheduled: true,
            process_overrides: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn archived_task_round_trips() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.archive_task(&sample_task()).await.unwrap();

        let archived = storage.list_deleted_tasks("ISS-pass").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].task.task_name, "ISS-pass #1");
        assert_eq!(archived[0].task.status, TaskStatus::Executed);
    }

    #[tokio::test]
    async fn packet_store_returns_newest_first() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.store_packet("uhf-downlink", Some("ISS"), &serde_json::json!({"data": "01"})).await.unwrap();
        storage.store_packet("uhf-downlink", Some("ISS"), &serde_json::json!({"data": "02"})).await.unwrap();

        let packets = storage.list_packets("uhf-downlink", 10).await.unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].frame["data"], "02");
    }
}
