mod memory;
mod repository;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{LoanId, LoanRecord, MovementEntry};

pub use memory::*;
pub use repository::*;

/// SQL migration for the ledger and movement tables
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration making the movement log append-only
pub const MIGRATION_002_APPEND_ONLY: &str = include_str!("migrations/002_append_only_movements.sql");

/// A single write against the ledger or the movement log.
#[derive(Debug, Clone)]
pub enum LedgerWrite {
    InsertRecord(LoanRecord),
    /// Flip a record from on-loan to returned. Fails if the record is not on loan.
    MarkReturned { loan_id: LoanId },
    AppendMovement(MovementEntry),
}

/// Writes that must land together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<LedgerWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_record(&mut self, record: LoanRecord) {
        self.writes.push(LedgerWrite::InsertRecord(record));
    }

    pub fn mark_returned(&mut self, loan_id: LoanId) {
        self.writes.push(LedgerWrite::MarkReturned { loan_id });
    }

    pub fn append_movement(&mut self, entry: MovementEntry) {
        self.writes.push(LedgerWrite::AppendMovement(entry));
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[LedgerWrite] {
        &self.writes
    }

    pub fn writes_mut(&mut self) -> &mut [LedgerWrite] {
        &mut self.writes
    }

    /// Records inserted by this batch, in order. Sequences are set after commit.
    pub fn inserted_records(&self) -> impl Iterator<Item = &LoanRecord> {
        self.writes.iter().filter_map(|w| match w {
            LedgerWrite::InsertRecord(record) => Some(record),
            _ => None,
        })
    }

    /// Movement entries appended by this batch, in order.
    pub fn appended_movements(&self) -> impl Iterator<Item = &MovementEntry> {
        self.writes.iter().filter_map(|w| match w {
            LedgerWrite::AppendMovement(entry) => Some(entry),
            _ => None,
        })
    }
}

/// Persistence contract the ledger service relies on.
///
/// Implementations must apply a [`WriteBatch`] atomically: after `commit`
/// returns an error, no write of the batch may be visible to later reads.
/// On success the store assigns `sequence` numbers to inserted records and
/// movements, in batch order.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// All ledger records in insertion order.
    async fn load_records(&self) -> Result<Vec<LoanRecord>>;

    /// All movement entries in insertion order.
    async fn load_movements(&self) -> Result<Vec<MovementEntry>>;

    /// Durably apply every write of the batch, or none of them.
    async fn commit(&self, batch: &mut WriteBatch) -> Result<()>;
}
