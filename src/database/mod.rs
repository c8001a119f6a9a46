pub mod memory;
pub mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::ledger::block::Block;
use crate::ledger::hash::GENESIS_PREVIOUS_HASH;
use crate::ledger::record::{AuditRecord, NewAuditRecord, OrgId};
use models::{
    block_from_row, format_timestamp, lamport_column, record_from_row, storage_precision,
    BLOCK_COLUMNS, RECORD_COLUMNS,
};

pub use memory::MemoryStore;

/// Persistence for audit records and blocks.
///
/// `seal_block` is the only multi-row write and must be atomic: either
/// every listed record is stamped and the block is stored, or nothing is.
/// It fails with `ConflictError` if any listed record is already sealed or
/// if `block.previous_hash` is no longer the organization's latest block.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_record(
        &self,
        record: NewAuditRecord,
        lamport: u64,
    ) -> Result<AuditRecord, LedgerError>;

    async fn get_record(&self, id: i64) -> Result<Option<AuditRecord>, LedgerError>;

    async fn latest_lamport(&self, org_id: OrgId) -> Result<Option<u64>, LedgerError>;

    /// Unsealed records, oldest first (`created_at`, then id).
    async fn unblocked_records(
        &self,
        org_id: OrgId,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, LedgerError>;

    /// Records created within `[start, end]`, ascending id.
    async fn records_in_range(
        &self,
        org_id: OrgId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditRecord>, LedgerError>;

    async fn records_in_block(&self, block_hash: &str) -> Result<Vec<AuditRecord>, LedgerError>;

    async fn latest_block(&self, org_id: OrgId) -> Result<Option<Block>, LedgerError>;

    async fn get_block(&self, hash: &str) -> Result<Option<Block>, LedgerError>;

    /// All blocks for an organization, oldest first.
    async fn blocks(&self, org_id: OrgId) -> Result<Vec<Block>, LedgerError>;

    async fn seal_block(&self, block: &Block, record_ids: &[i64]) -> Result<(), LedgerError>;
}

/// How long a writer waits on SQLite's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed ledger store.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, LedgerError> {
        let in_memory = database_url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Each connection to `sqlite::memory:` is its own database.
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Database { pool };
        db.run_migrations().await?;
        info!("Connected to ledger database {}", database_url);
        Ok(db)
    }

    pub async fn new_in_memory() -> Result<Self, LedgerError> {
        Self::new("sqlite::memory:").await
    }

    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn insert_record(
        &self,
        record: NewAuditRecord,
        lamport: u64,
    ) -> Result<AuditRecord, LedgerError> {
        let stored_lamport = lamport_column(lamport)?;
        let created_at = storage_precision(record.created_at.unwrap_or_else(Utc::now));

        let result = sqlx::query(
            r#"
            INSERT INTO audit_records
            (organization_id, user_id, action, category, lamport, created_at,
             hash_pointer, details, metadata, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.organization_id)
        .bind(&record.user_id)
        .bind(&record.action)
        .bind(&record.category)
        .bind(stored_lamport)
        .bind(format_timestamp(&created_at))
        .bind(&record.hash_pointer)
        .bind(serde_json::to_string(&record.details)?)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(&record.status)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("Inserted audit record {} for org {}", id, record.organization_id);
        Ok(record.with_created_at(created_at).into_record(id, lamport))
    }

    async fn get_record(&self, id: i64) -> Result<Option<AuditRecord>, LedgerError> {
        let sql = format!("SELECT {} FROM audit_records WHERE id = ?", RECORD_COLUMNS);
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| record_from_row(&row))
            .transpose()
    }

    async fn latest_lamport(&self, org_id: OrgId) -> Result<Option<u64>, LedgerError> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(lamport) FROM audit_records WHERE organization_id = ?")
                .bind(org_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max.map(|value| value.max(0) as u64))
    }

    async fn unblocked_records(
        &self,
        org_id: OrgId,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM audit_records \
             WHERE organization_id = ? AND block_hash IS NULL \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(org_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn records_in_range(
        &self,
        org_id: OrgId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditRecord>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM audit_records \
             WHERE organization_id = ? \
             AND (? IS NULL OR created_at >= ?) \
             AND (? IS NULL OR created_at <= ?) \
             ORDER BY id ASC",
            RECORD_COLUMNS
        );
        let start = start.map(|t| format_timestamp(&t));
        let end = end.map(|t| format_timestamp(&t));
        let rows = sqlx::query(&sql)
            .bind(org_id)
            .bind(&start)
            .bind(&start)
            .bind(&end)
            .bind(&end)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn records_in_block(&self, block_hash: &str) -> Result<Vec<AuditRecord>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM audit_records WHERE block_hash = ? ORDER BY id ASC",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(block_hash)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn latest_block(&self, org_id: OrgId) -> Result<Option<Block>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM blocks WHERE organization_id = ? ORDER BY rowid DESC LIMIT 1",
            BLOCK_COLUMNS
        );
        sqlx::query(&sql)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| block_from_row(&row))
            .transpose()
    }

    async fn get_block(&self, hash: &str) -> Result<Option<Block>, LedgerError> {
        let sql = format!("SELECT {} FROM blocks WHERE hash = ?", BLOCK_COLUMNS);
        sqlx::query(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| block_from_row(&row))
            .transpose()
    }

    async fn blocks(&self, org_id: OrgId) -> Result<Vec<Block>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM blocks WHERE organization_id = ? ORDER BY rowid ASC",
            BLOCK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(block_from_row).collect()
    }

    async fn seal_block(&self, block: &Block, record_ids: &[i64]) -> Result<(), LedgerError> {
        // Take the write lock before the head read. A deferred transaction
        // that reads first cannot wait out another writer's commit and
        // fails with SQLITE_BUSY on upgrade.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let head: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM blocks WHERE organization_id = ? ORDER BY rowid DESC LIMIT 1",
        )
        .bind(block.organization_id)
        .fetch_optional(&mut *tx)
        .await?;

        let expected_previous = head.as_deref().unwrap_or(GENESIS_PREVIOUS_HASH);
        if block.previous_hash != expected_previous {
            return Err(LedgerError::ConflictError(format!(
                "Organization {}: block {} links to {}, but the latest block is {}",
                block.organization_id, block.hash, block.previous_hash, expected_previous
            )));
        }

        let mut claimed = 0usize;
        for id in record_ids {
            let result = sqlx::query(
                "UPDATE audit_records SET block_hash = ? \
                 WHERE id = ? AND organization_id = ? AND block_hash IS NULL",
            )
            .bind(&block.hash)
            .bind(id)
            .bind(block.organization_id)
            .execute(&mut *tx)
            .await?;
            claimed += result.rows_affected() as usize;
        }

        if claimed != record_ids.len() {
            // Dropping `tx` rolls back the partial claim.
            return Err(LedgerError::seal_conflict(
                block.organization_id,
                claimed,
                record_ids.len(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO blocks
            (hash, previous_hash, organization_id, lamport_clock, timestamp_ms,
             merkle_root, record_count, metrics_data, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&block.hash)
        .bind(&block.previous_hash)
        .bind(block.organization_id)
        .bind(lamport_column(block.lamport_clock)?)
        .bind(block.timestamp)
        .bind(&block.merkle_root)
        .bind(block.record_count as i64)
        .bind(serde_json::to_string(&block.metrics_data)?)
        .bind(format_timestamp(&block.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
                LedgerError::ConflictError(format!(
                    "Block {} already has a successor or exists",
                    block.previous_hash
                ))
            } else {
                LedgerError::from(e)
            }
        })?;

        tx.commit().await?;
        info!("Persisted {}", block.summary());
        Ok(())
    }
}
