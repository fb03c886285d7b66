use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    build_integrity_report, holders, open_loans, summarize, IntegrityReport, LoanRecord,
    LoanStatus, MovementAction, MovementEntry, RecordFilter, StatusSummary,
};
use crate::storage::{LedgerStore, MemoryStore, Repository, WriteBatch};

use super::AppError;

/// Application service owning the key ledger and its movement log.
/// Every mutation goes through here; clients (CLI, tests) only call these methods.
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    /// Serializes read-decide-commit cycles so two loans of one key cannot race.
    write_lock: Mutex<()>,
}

/// Result of a single loan request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanOutcome {
    /// The key is now on loan to the requester.
    Loaned(LoanRecord),
    /// The key was already out; a duplicate record was logged instead.
    Duplicate {
        record: LoanRecord,
        /// Who holds the key right now
        current_holder: String,
    },
}

impl LoanOutcome {
    pub fn record(&self) -> &LoanRecord {
        match self {
            LoanOutcome::Loaned(record) => record,
            LoanOutcome::Duplicate { record, .. } => record,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.record().key_id
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, LoanOutcome::Duplicate { .. })
    }
}

/// Result of a (possibly multi-key) loan request for one holder
#[derive(Debug, Clone)]
pub struct BatchLoanOutcome {
    pub holder: String,
    /// One outcome per requested key, in request order
    pub outcomes: Vec<LoanOutcome>,
}

impl BatchLoanOutcome {
    pub fn loaned(&self) -> impl Iterator<Item = &LoanRecord> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_duplicate())
            .map(LoanOutcome::record)
    }

    /// Keys that were already on loan, deduplicated, in request order.
    pub fn duplicate_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for outcome in self.outcomes.iter().filter(|o| o.is_duplicate()) {
            if !keys.iter().any(|k| k == outcome.key_id()) {
                keys.push(outcome.key_id().to_string());
            }
        }
        keys
    }

    pub fn warning(&self) -> Option<DuplicateLoanWarning> {
        let keys = self.duplicate_keys();
        (!keys.is_empty()).then_some(DuplicateLoanWarning { keys })
    }
}

/// Reported when a loan request hit keys that were already out.
/// Not an error: the attempt is recorded in the ledger and the movement log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateLoanWarning {
    pub keys: Vec<String>,
}

impl std::fmt::Display for DuplicateLoanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Keys already on loan: {}", self.keys.join(", "))
    }
}

/// Which keys a return covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnMode {
    /// Every key the holder has on loan
    Full,
    /// Only these keys; keys not on loan to the holder are ignored
    Partial(Vec<String>),
}

impl ReturnMode {
    pub fn partial<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ReturnMode::Partial(keys.into_iter().map(Into::into).collect())
    }
}

/// Result of a return request
#[derive(Debug, Clone)]
pub struct ReturnOutcome {
    pub holder: String,
    /// Records moved to returned, in ledger order
    pub returned: Vec<LoanRecord>,
    /// Requested keys (partial mode) that were not on loan to the holder
    pub ignored: Vec<String>,
}

impl LedgerService {
    /// Create a ledger service over any store.
    pub fn new(store: impl LedgerStore + 'static) -> Self {
        Self::with_store(Arc::new(store))
    }

    /// Create a ledger service over a shared store handle.
    pub fn with_store(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// A service backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Loans
    // ========================

    /// Request a single key for a holder.
    pub async fn request_loan(&self, key_id: &str, holder: &str) -> Result<LoanOutcome, AppError> {
        self.request_loans(&[key_id], holder)
            .await?
            .outcomes
            .pop()
            .ok_or_else(|| AppError::Persistence(anyhow::anyhow!("Loan produced no outcome")))
    }

    /// Request several keys for one holder.
    ///
    /// Each key is checked against the ledger as it stood before the request,
    /// plus the keys this same request has already loaned: asking for "101, 101"
    /// loans 101 once and logs the second as a duplicate attempt. The whole
    /// request is committed as one batch.
    #[instrument(skip(self, key_ids), fields(keys = key_ids.len()))]
    pub async fn request_loans<S: AsRef<str>>(
        &self,
        key_ids: &[S],
        holder: &str,
    ) -> Result<BatchLoanOutcome, AppError> {
        let holder = required("holder", holder)?;
        if key_ids.is_empty() {
            return Err(AppError::Validation(
                "at least one key is required".to_string(),
            ));
        }
        let keys = key_ids
            .iter()
            .map(|k| required("key", k.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self.write_lock.lock().await;

        let records = self.store.load_records().await?;
        let mut open: HashMap<String, String> = open_loans(&records)
            .into_iter()
            .map(|(key, record)| (key.to_string(), record.holder.clone()))
            .collect();

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        let mut conflicts: Vec<Option<String>> = Vec::with_capacity(keys.len());

        for key in keys {
            let (status, action, conflict) = match open.get(&key) {
                Some(current_holder) => (
                    LoanStatus::Duplicate,
                    MovementAction::DuplicateAttempt,
                    Some(current_holder.clone()),
                ),
                None => (LoanStatus::OnLoan, MovementAction::Loan, None),
            };

            if conflict.is_none() {
                open.insert(key.clone(), holder.clone());
            }

            let record = LoanRecord::new(key, holder.clone(), status, now);
            let entry = MovementEntry::for_record(&record, action, now);
            batch.insert_record(record);
            batch.append_movement(entry);
            conflicts.push(conflict);
        }

        self.store.commit(&mut batch).await?;

        let outcomes: Vec<LoanOutcome> = batch
            .inserted_records()
            .cloned()
            .zip(conflicts)
            .map(|(record, conflict)| match conflict {
                Some(current_holder) => {
                    warn!(
                        key = %record.key_id,
                        holder = %record.holder,
                        current_holder = %current_holder,
                        "duplicate loan attempt recorded"
                    );
                    LoanOutcome::Duplicate {
                        record,
                        current_holder,
                    }
                }
                None => {
                    info!(key = %record.key_id, holder = %record.holder, "key loaned");
                    LoanOutcome::Loaned(record)
                }
            })
            .collect();

        Ok(BatchLoanOutcome { holder, outcomes })
    }

    // ========================
    // Returns
    // ========================

    /// Return keys held by `holder`.
    ///
    /// `Full` closes every open loan of the holder and fails with
    /// [`AppError::NoKeysOnLoan`] if there is none. `Partial` closes only the
    /// listed keys; listed keys the holder does not have are skipped without
    /// error. An empty partial selection fails with
    /// [`AppError::EmptyReturnSelection`].
    #[instrument(skip(self, mode))]
    pub async fn request_return(
        &self,
        holder: &str,
        mode: ReturnMode,
    ) -> Result<ReturnOutcome, AppError> {
        let holder = required("holder", holder)?;
        let selection = match mode {
            ReturnMode::Full => None,
            ReturnMode::Partial(keys) => {
                let keys: Vec<String> = keys
                    .iter()
                    .map(|k| k.trim())
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect();
                if keys.is_empty() {
                    return Err(AppError::EmptyReturnSelection);
                }
                Some(keys)
            }
        };

        let _guard = self.write_lock.lock().await;

        let targets: Vec<LoanRecord> = self
            .store
            .load_records()
            .await?
            .into_iter()
            .filter(|r| r.is_held_by(&holder))
            .filter(|r| {
                selection
                    .as_ref()
                    .is_none_or(|keys| keys.contains(&r.key_id))
            })
            .collect();

        let mut ignored: Vec<String> = Vec::new();
        if let Some(keys) = &selection {
            for key in keys {
                if !targets.iter().any(|r| &r.key_id == key) && !ignored.contains(key) {
                    ignored.push(key.clone());
                }
            }
        }

        if targets.is_empty() {
            if selection.is_none() {
                return Err(AppError::NoKeysOnLoan { holder });
            }
            debug!(holder = %holder, ignored = ?ignored, "partial return matched no open loans");
            return Ok(ReturnOutcome {
                holder,
                returned: Vec::new(),
                ignored,
            });
        }

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        for record in &targets {
            batch.mark_returned(record.id);
            batch.append_movement(MovementEntry::for_record(
                record,
                MovementAction::Return,
                now,
            ));
        }

        self.store.commit(&mut batch).await?;

        let returned: Vec<LoanRecord> = targets
            .into_iter()
            .map(|mut record| {
                record.status = LoanStatus::Returned;
                info!(key = %record.key_id, holder = %record.holder, "key returned");
                record
            })
            .collect();

        Ok(ReturnOutcome {
            holder,
            returned,
            ignored,
        })
    }

    // ========================
    // Queries
    // ========================

    /// Current ledger, in insertion order, narrowed by the filter.
    pub async fn list_current(&self, filter: &RecordFilter) -> Result<Vec<LoanRecord>, AppError> {
        Ok(filter.apply(self.store.load_records().await?))
    }

    /// Full movement log, oldest first.
    pub async fn list_history(&self) -> Result<Vec<MovementEntry>, AppError> {
        Ok(self.store.load_movements().await?)
    }

    /// Distinct holders that appear in the ledger, sorted.
    pub async fn holders(&self) -> Result<Vec<String>, AppError> {
        Ok(holders(&self.store.load_records().await?))
    }

    /// Records currently on loan to `holder`.
    pub async fn keys_on_loan(&self, holder: &str) -> Result<Vec<LoanRecord>, AppError> {
        let filter = RecordFilter::default()
            .with_status(LoanStatus::OnLoan)
            .with_holder(holder.trim());
        self.list_current(&filter).await
    }

    /// Record counts per status plus the history length.
    pub async fn status_summary(&self) -> Result<StatusSummary, AppError> {
        let records = self.store.load_records().await?;
        let movements = self.store.load_movements().await?;
        Ok(summarize(&records, movements.len()))
    }

    // ========================
    // Integrity
    // ========================

    /// Check the ledger against the movement log.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        // Hold the write lock so the two scans see the same state
        let _guard = self.write_lock.lock().await;
        let records = self.store.load_records().await?;
        let movements = self.store.load_movements().await?;
        Ok(build_integrity_report(&records, &movements))
    }
}

fn required(field: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(value.to_string())
}
