//! In-memory ledger store.
//!
//! Keeps records and movements in vectors behind a [`parking_lot::RwLock`].
//! A commit is staged on a copy of the state and swapped in only when every
//! write succeeded, so a failed batch leaves nothing behind. Data is lost
//! when the process exits; use it for tests and throwaway sessions.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::{LoanRecord, LoanStatus, MovementEntry};

use super::{LedgerStore, LedgerWrite, WriteBatch};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    records: Vec<LoanRecord>,
    movements: Vec<MovementEntry>,
}

impl MemoryState {
    fn apply(&mut self, write: &mut LedgerWrite) -> Result<()> {
        match write {
            LedgerWrite::InsertRecord(record) => {
                if self.records.iter().any(|r| r.id == record.id) {
                    anyhow::bail!("Loan record {} already exists", record.id);
                }
                if record.is_on_loan()
                    && self
                        .records
                        .iter()
                        .any(|r| r.is_on_loan() && r.key_id == record.key_id)
                {
                    anyhow::bail!("Key {} already has an open loan", record.key_id);
                }
                record.sequence = self.records.len() as i64 + 1;
                self.records.push(record.clone());
            }
            LedgerWrite::MarkReturned { loan_id } => {
                let record = self
                    .records
                    .iter_mut()
                    .find(|r| r.id == *loan_id && r.is_on_loan())
                    .ok_or_else(|| anyhow::anyhow!("Loan record {} is not on loan", loan_id))?;
                record.status = LoanStatus::Returned;
            }
            LedgerWrite::AppendMovement(entry) => {
                if !self.records.iter().any(|r| r.id == entry.loan_id) {
                    anyhow::bail!("Movement refers to unknown loan record {}", entry.loan_id);
                }
                entry.sequence = self.movements.len() as i64 + 1;
                self.movements.push(entry.clone());
            }
        }
        Ok(())
    }
}

/// In-memory [`LedgerStore`]. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail (or succeed again) without applying anything.
    /// Used to exercise the persistence-failure path.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_records(&self) -> Result<Vec<LoanRecord>> {
        Ok(self.state.read().records.clone())
    }

    async fn load_movements(&self) -> Result<Vec<MovementEntry>> {
        Ok(self.state.read().movements.clone())
    }

    async fn commit(&self, batch: &mut WriteBatch) -> Result<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            anyhow::bail!("Injected commit failure");
        }

        let mut state = self.state.write();
        let mut staged = state.clone();
        for write in batch.writes_mut() {
            staged.apply(write)?;
        }
        *state = staged;

        debug!(writes = batch.len(), "committed ledger batch to memory");
        Ok(())
    }
}
