use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{LoanId, LoanRecord, LoanStatus};

pub type MovementId = Uuid;

/// What happened to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovementAction {
    Loan,
    Return,
    DuplicateAttempt,
}

impl MovementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementAction::Loan => "loan",
            MovementAction::Return => "return",
            MovementAction::DuplicateAttempt => "duplicate-attempt",
        }
    }

    /// Label written to the database and to exported sheets.
    pub fn label(&self) -> &'static str {
        match self {
            MovementAction::Loan => "Empréstimo",
            MovementAction::Return => "Devolução",
            MovementAction::DuplicateAttempt => "Tentativa de Empréstimo",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "empréstimo" | "emprestimo" | "loan" => Some(MovementAction::Loan),
            "devolução" | "devolução total" | "devolução parcial" | "devolucao" | "return" => {
                Some(MovementAction::Return)
            }
            "tentativa de empréstimo" | "tentativa de emprestimo" | "duplicate-attempt" => {
                Some(MovementAction::DuplicateAttempt)
            }
            _ => None,
        }
    }

    /// The status a record ends up in after this action.
    pub fn resulting_status(&self) -> LoanStatus {
        match self {
            MovementAction::Loan => LoanStatus::OnLoan,
            MovementAction::Return => LoanStatus::Returned,
            MovementAction::DuplicateAttempt => LoanStatus::Duplicate,
        }
    }
}

impl std::fmt::Display for MovementAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable audit log entry. The movement log is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub id: MovementId,
    /// Insertion order, assigned by the store on commit
    pub sequence: i64,
    /// The ledger record this entry created or changed
    pub loan_id: LoanId,
    pub key_id: String,
    pub holder: String,
    pub action: MovementAction,
    pub resulting_status: LoanStatus,
    pub timestamp: DateTime<Utc>,
}

impl MovementEntry {
    /// Record `action` against `record`. The resulting status follows from the action.
    pub fn for_record(record: &LoanRecord, action: MovementAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            loan_id: record.id,
            key_id: record.key_id.clone(),
            holder: record.holder.clone(),
            action,
            resulting_status: action.resulting_status(),
            timestamp,
        }
    }

    /// True for entries that created a ledger record (loans and duplicate attempts).
    pub fn is_loan_attempt(&self) -> bool {
        matches!(
            self.action,
            MovementAction::Loan | MovementAction::DuplicateAttempt
        )
    }
}
