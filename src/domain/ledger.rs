use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use super::{LoanId, LoanRecord, LoanStatus, MovementAction, MovementEntry};

/// Display format for timestamps in sheets and tables (`DD/MM/YYYY HH:MM:SS`).
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Format a timestamp in local time using [`TIMESTAMP_FORMAT`].
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Split comma-separated key input ("101, 102,,105") into trimmed, non-empty key ids.
/// Order and repeats are preserved.
pub fn parse_key_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

/// Index of the records currently on loan, by key id.
pub fn open_loans(records: &[LoanRecord]) -> HashMap<&str, &LoanRecord> {
    records
        .iter()
        .filter(|r| r.is_on_loan())
        .map(|r| (r.key_id.as_str(), r))
        .collect()
}

/// Distinct holders appearing in the ledger, sorted.
pub fn holders(records: &[LoanRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.holder.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Filter for ledger listings. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub status: Option<LoanStatus>,
    pub holder: Option<String>,
}

impl RecordFilter {
    pub fn with_status(mut self, status: LoanStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    pub fn matches(&self, record: &LoanRecord) -> bool {
        self.status.is_none_or(|s| record.status == s)
            && self.holder.as_deref().is_none_or(|h| record.holder == h)
    }

    /// Keep matching records, preserving their order.
    pub fn apply(&self, records: Vec<LoanRecord>) -> Vec<LoanRecord> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

/// Record counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub on_loan: usize,
    pub returned: usize,
    pub duplicate: usize,
    pub movements: usize,
}

impl StatusSummary {
    pub fn total_records(&self) -> usize {
        self.on_loan + self.returned + self.duplicate
    }

    pub fn count(&self, status: LoanStatus) -> usize {
        match status {
            LoanStatus::OnLoan => self.on_loan,
            LoanStatus::Returned => self.returned,
            LoanStatus::Duplicate => self.duplicate,
        }
    }
}

pub fn summarize(records: &[LoanRecord], movement_count: usize) -> StatusSummary {
    records.iter().fold(
        StatusSummary {
            movements: movement_count,
            ..Default::default()
        },
        |mut summary, record| {
            match record.status {
                LoanStatus::OnLoan => summary.on_loan += 1,
                LoanStatus::Returned => summary.returned += 1,
                LoanStatus::Duplicate => summary.duplicate += 1,
            }
            summary
        },
    )
}

/// Rebuild the ledger by replaying the movement log in order.
///
/// Loans and duplicate attempts create records, returns close them. Rebuilt
/// records take their sequence from the position of the creating entry.
pub fn replay(movements: &[MovementEntry]) -> Result<Vec<LoanRecord>, ReplayError> {
    let mut records: Vec<LoanRecord> = Vec::new();
    let mut positions: HashMap<LoanId, usize> = HashMap::new();

    for entry in movements {
        if entry.resulting_status != entry.action.resulting_status() {
            return Err(ReplayError::StatusMismatch {
                sequence: entry.sequence,
            });
        }

        match entry.action {
            MovementAction::Loan | MovementAction::DuplicateAttempt => {
                if positions.contains_key(&entry.loan_id) {
                    return Err(ReplayError::RecordCreatedTwice {
                        loan_id: entry.loan_id,
                    });
                }
                positions.insert(entry.loan_id, records.len());
                records.push(LoanRecord {
                    id: entry.loan_id,
                    sequence: records.len() as i64 + 1,
                    key_id: entry.key_id.clone(),
                    holder: entry.holder.clone(),
                    status: entry.resulting_status,
                    timestamp: entry.timestamp,
                });
            }
            MovementAction::Return => {
                let record = positions
                    .get(&entry.loan_id)
                    .and_then(|&idx| records.get_mut(idx))
                    .ok_or(ReplayError::UnknownRecord {
                        loan_id: entry.loan_id,
                    })?;
                if !record.is_on_loan() {
                    return Err(ReplayError::ReturnOfClosedRecord {
                        loan_id: entry.loan_id,
                    });
                }
                record.status = LoanStatus::Returned;
            }
        }
    }

    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    StatusMismatch { sequence: i64 },
    RecordCreatedTwice { loan_id: LoanId },
    UnknownRecord { loan_id: LoanId },
    ReturnOfClosedRecord { loan_id: LoanId },
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::StatusMismatch { sequence } => write!(
                f,
                "Movement #{} has a resulting status that does not match its action",
                sequence
            ),
            ReplayError::RecordCreatedTwice { loan_id } => {
                write!(f, "Loan record {} is created by more than one movement", loan_id)
            }
            ReplayError::UnknownRecord { loan_id } => {
                write!(f, "Return refers to unknown loan record {}", loan_id)
            }
            ReplayError::ReturnOfClosedRecord { loan_id } => {
                write!(f, "Return of loan record {} which is not on loan", loan_id)
            }
        }
    }
}

impl std::error::Error for ReplayError {}
