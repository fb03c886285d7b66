use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type LoanId = Uuid;

/// Status of a key-loan record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoanStatus {
    /// The key is out with the holder. At most one record per key may be in this state.
    OnLoan,
    /// The key came back. Terminal for this record.
    Returned,
    /// A loan attempt for a key that was already out. Never transitions.
    Duplicate,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 3] = [LoanStatus::OnLoan, LoanStatus::Returned, LoanStatus::Duplicate];

    /// Canonical English name, used on the command line and in JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::OnLoan => "on-loan",
            LoanStatus::Returned => "returned",
            LoanStatus::Duplicate => "duplicate",
        }
    }

    /// Label written to the database and to exported sheets.
    pub fn label(&self) -> &'static str {
        match self {
            LoanStatus::OnLoan => "Emprestado",
            LoanStatus::Returned => "Devolvido",
            LoanStatus::Duplicate => "Duplicada",
        }
    }

    /// Parse either a storage label or a canonical name.
    ///
    /// Older sheets used `Empréstimo` for keys on loan, so it is accepted too.
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "emprestado" | "empréstimo" | "emprestimo" | "on-loan" | "onloan" | "on_loan" => {
                Some(LoanStatus::OnLoan)
            }
            "devolvido" | "returned" => Some(LoanStatus::Returned),
            "duplicada" | "duplicado" | "duplicate" => Some(LoanStatus::Duplicate),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LoanStatus::from_label(s).ok_or_else(|| format!("unknown loan status '{}'", s))
    }
}

/// One slot of the key ledger: a key handed (or attempted to be handed) to a holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub id: LoanId,
    /// Insertion order, assigned by the store on commit
    pub sequence: i64,
    pub key_id: String,
    pub holder: String,
    pub status: LoanStatus,
    /// When the record was created. Returns do not touch it.
    pub timestamp: DateTime<Utc>,
}

impl LoanRecord {
    /// Create a new record. Sequence number must be assigned by the store.
    pub fn new(
        key_id: impl Into<String>,
        holder: impl Into<String>,
        status: LoanStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            key_id: key_id.into(),
            holder: holder.into(),
            status,
            timestamp,
        }
    }

    pub fn is_on_loan(&self) -> bool {
        self.status == LoanStatus::OnLoan
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.is_on_loan() && self.holder == holder
    }
}
