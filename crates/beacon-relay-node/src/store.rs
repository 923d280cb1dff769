//! Relay database: the publish cursor and the SQLite artifact queue.

use std::ops::DerefMut;
use std::path::Path;

use async_trait::async_trait;
use beacon_ssz::{decode_hex_array, to_hex};
use beacon_zk_verify::{PublishCursor, SlotRange, VkId};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use thiserror::Error;
use tokio::fs;

use crate::artifacts::{keep_readable, ArtifactError, ArtifactStore, ProofArtifact};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    SQLite(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self) -> Result<Option<PublishCursor>, StoreError>;

    /// Replace the persisted cursor in a single statement
    async fn save_cursor(&self, cursor: &PublishCursor) -> Result<(), StoreError>;
}

const SQLITE_BUSY_TIMEOUT: &str = "5000";

/// SQLite database owned by one relay process.
/// - WAL mode so an importer can read while the relay writes
/// - Single writer connection
#[derive(Debug, Clone)]
pub struct RelayStore {
    pool: Pool<Sqlite>,
}

fn slot_to_sql(slot: u64) -> Result<i64, StoreError> {
    i64::try_from(slot).map_err(|_| StoreError::Corrupted(format!("slot {slot} exceeds SQLite integer range")))
}

fn slot_from_sql(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupted(format!("negative slot {value}")))
}

impl RelayStore {
    pub async fn single_atomic_writer<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("busy_timeout", SQLITE_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn acquire_connection(&self) -> Result<PoolConnection<Sqlite>, sqlx::Error> {
        self.pool.acquire().await
    }

    async fn init(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.acquire_connection().await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS cursor (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                slot INTEGER NOT NULL,
                header_root TEXT NOT NULL
            );"#,
        )
        .execute(conn.deref_mut())
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS artifacts (
                from_slot INTEGER NOT NULL,
                to_slot INTEGER NOT NULL,
                proof TEXT NOT NULL,
                public_signals TEXT NOT NULL,
                vk_id TEXT,
                PRIMARY KEY (from_slot, to_slot)
            );"#,
        )
        .execute(conn.deref_mut())
        .await?;
        Ok(())
    }

    /// Queue an artifact, replacing any previous one for the same range
    pub async fn insert_artifact(&self, artifact: &ProofArtifact) -> Result<(), StoreError> {
        let proof = serde_json::to_string(&artifact.proof)
            .map_err(|err| StoreError::Corrupted(err.to_string()))?;
        let public_signals = serde_json::to_string(&artifact.public_signals)
            .map_err(|err| StoreError::Corrupted(err.to_string()))?;
        let mut conn = self.acquire_connection().await?;
        sqlx::query(
            "INSERT OR REPLACE INTO artifacts (from_slot, to_slot, proof, public_signals, vk_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(slot_to_sql(artifact.range.from)?)
        .bind(slot_to_sql(artifact.range.to)?)
        .bind(proof)
        .bind(public_signals)
        .bind(artifact.vk_id.map(|id| id.to_string()))
        .execute(conn.deref_mut())
        .await?;
        Ok(())
    }

    /// Queued artifacts answering `range`, furthest-reaching first
    async fn find_artifacts(&self, range: SlotRange) -> Result<Vec<Result<ProofArtifact, StoreError>>, StoreError> {
        let mut conn = self.acquire_connection().await?;
        let rows = sqlx::query(
            "SELECT to_slot, proof, public_signals, vk_id FROM artifacts \
             WHERE from_slot = ? AND to_slot <= ? ORDER BY to_slot DESC",
        )
        .bind(slot_to_sql(range.from)?)
        .bind(slot_to_sql(range.to)?)
        .fetch_all(conn.deref_mut())
        .await?;
        Ok(rows.iter().map(|row| decode_artifact(range.from, row)).collect())
    }
}

fn decode_artifact(from: u64, row: &SqliteRow) -> Result<ProofArtifact, StoreError> {
    let to = slot_from_sql(row.try_get("to_slot")?)?;
    let found = SlotRange::new(from, to)
        .ok_or_else(|| StoreError::Corrupted(format!("empty artifact range {from}..{to}")))?;
    let proof: String = row.try_get("proof")?;
    let public_signals: String = row.try_get("public_signals")?;
    let vk_id: Option<String> = row.try_get("vk_id")?;
    Ok(ProofArtifact {
        range: found,
        proof: serde_json::from_str(&proof).map_err(|err| StoreError::Corrupted(err.to_string()))?,
        public_signals: serde_json::from_str(&public_signals)
            .map_err(|err| StoreError::Corrupted(err.to_string()))?,
        vk_id: vk_id
            .map(|id| id.parse::<VkId>())
            .transpose()
            .map_err(|err| StoreError::Corrupted(format!("vk_id: {err}")))?,
    })
}

#[async_trait]
impl CursorStore for RelayStore {
    async fn load_cursor(&self) -> Result<Option<PublishCursor>, StoreError> {
        let mut conn = self.acquire_connection().await?;
        let row = sqlx::query("SELECT slot, header_root FROM cursor WHERE id = 0")
            .fetch_optional(conn.deref_mut())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let slot = slot_from_sql(row.try_get("slot")?)?;
        let header_root: String = row.try_get("header_root")?;
        let header_root =
            decode_hex_array(&header_root).map_err(|err| StoreError::Corrupted(err.to_string()))?;
        Ok(Some(PublishCursor::new(slot, header_root)))
    }

    async fn save_cursor(&self, cursor: &PublishCursor) -> Result<(), StoreError> {
        let mut conn = self.acquire_connection().await?;
        sqlx::query(
            "INSERT INTO cursor (id, slot, header_root) VALUES (0, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET slot = excluded.slot, header_root = excluded.header_root",
        )
        .bind(slot_to_sql(cursor.last_published_slot)?)
        .bind(to_hex(&cursor.last_header_root))
        .execute(conn.deref_mut())
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for RelayStore {
    async fn candidates(&self, range: SlotRange) -> Result<Vec<ProofArtifact>, ArtifactError> {
        let to_artifact_error = |err: StoreError| match err {
            StoreError::Corrupted(reason) => ArtifactError::Malformed {
                name: format!("artifact {range}"),
                reason,
            },
            err => ArtifactError::Backend(err.to_string()),
        };
        let rows = self.find_artifacts(range).await.map_err(to_artifact_error)?;
        keep_readable(rows.into_iter().map(|row| row.map_err(to_artifact_error)))
    }
}
