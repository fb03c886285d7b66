use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{LoanId, LoanRecord, LoanStatus, MovementAction, MovementEntry};

use super::{
    LedgerStore, LedgerWrite, WriteBatch, MIGRATION_001_INITIAL, MIGRATION_002_APPEND_ONLY,
};

/// SQLite-backed store for the key ledger and the movement log.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_APPEND_ONLY)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    async fn insert_record(tx: &mut Transaction<'_, Sqlite>, record: &mut LoanRecord) -> Result<()> {
        let row = sqlx::query(
            r#"
            INSERT INTO loan_records (id, key_id, holder, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.key_id)
        .bind(&record.holder)
        .bind(record.status.label())
        .bind(record.timestamp.to_rfc3339())
        .fetch_one(&mut **tx)
        .await
        .with_context(|| format!("Failed to save loan record for key {}", record.key_id))?;

        record.sequence = row.get("sequence");
        Ok(())
    }

    async fn mark_returned(tx: &mut Transaction<'_, Sqlite>, loan_id: LoanId) -> Result<()> {
        let result = sqlx::query("UPDATE loan_records SET status = ? WHERE id = ? AND status = ?")
            .bind(LoanStatus::Returned.label())
            .bind(loan_id.to_string())
            .bind(LoanStatus::OnLoan.label())
            .execute(&mut **tx)
            .await
            .context("Failed to mark loan as returned")?;

        if result.rows_affected() != 1 {
            anyhow::bail!("Loan record {} is not on loan", loan_id);
        }
        Ok(())
    }

    async fn append_movement(
        tx: &mut Transaction<'_, Sqlite>,
        entry: &mut MovementEntry,
    ) -> Result<()> {
        let row = sqlx::query(
            r#"
            INSERT INTO movements (id, loan_id, key_id, holder, action, resulting_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.loan_id.to_string())
        .bind(&entry.key_id)
        .bind(&entry.holder)
        .bind(entry.action.label())
        .bind(entry.resulting_status.label())
        .bind(entry.timestamp.to_rfc3339())
        .fetch_one(&mut **tx)
        .await
        .context("Failed to append movement")?;

        entry.sequence = row.get("sequence");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<LoanRecord> {
        let id_str: String = row.get("id");
        let status_str: String = row.get("status");
        let created_at_str: String = row.get("created_at");

        Ok(LoanRecord {
            id: Uuid::parse_str(&id_str).context("Invalid loan record ID")?,
            sequence: row.get("sequence"),
            key_id: row.get("key_id"),
            holder: row.get("holder"),
            status: LoanStatus::from_label(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid loan status: {}", status_str))?,
            timestamp: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }

    fn row_to_movement(row: &sqlx::sqlite::SqliteRow) -> Result<MovementEntry> {
        let id_str: String = row.get("id");
        let loan_id_str: String = row.get("loan_id");
        let action_str: String = row.get("action");
        let status_str: String = row.get("resulting_status");
        let created_at_str: String = row.get("created_at");

        Ok(MovementEntry {
            id: Uuid::parse_str(&id_str).context("Invalid movement ID")?,
            sequence: row.get("sequence"),
            loan_id: Uuid::parse_str(&loan_id_str).context("Invalid loan ID on movement")?,
            key_id: row.get("key_id"),
            holder: row.get("holder"),
            action: MovementAction::from_label(&action_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid movement action: {}", action_str))?,
            resulting_status: LoanStatus::from_label(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid movement status: {}", status_str))?,
            timestamp: DateTime::parse_from_rfc3339(&created_at_str)
                .context("Invalid created_at timestamp")?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl LedgerStore for Repository {
    async fn load_records(&self) -> Result<Vec<LoanRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, id, key_id, holder, status, created_at
            FROM loan_records
            ORDER BY sequence
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list loan records")?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn load_movements(&self) -> Result<Vec<MovementEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, id, loan_id, key_id, holder, action, resulting_status, created_at
            FROM movements
            ORDER BY sequence
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list movements")?;

        rows.iter().map(Self::row_to_movement).collect()
    }

    async fn commit(&self, batch: &mut WriteBatch) -> Result<()> {
        // Dropping the transaction without commit rolls everything back
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        for write in batch.writes_mut() {
            match write {
                LedgerWrite::InsertRecord(record) => Self::insert_record(&mut tx, record).await?,
                LedgerWrite::MarkReturned { loan_id } => {
                    Self::mark_returned(&mut tx, *loan_id).await?
                }
                LedgerWrite::AppendMovement(entry) => Self::append_movement(&mut tx, entry).await?,
            }
        }

        tx.commit().await.context("Failed to commit ledger batch")?;
        debug!(writes = batch.len(), "committed ledger batch to sqlite");
        Ok(())
    }
}
