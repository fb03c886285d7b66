// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::path::PathBuf;

use anyhow::Result;
use keyledger::application::LedgerService;
use keyledger::domain::{LoanRecord, LoanStatus, RecordFilter};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Path of the database created by [`test_service`]
pub fn db_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("test.db")
}

/// Open a second, raw connection to the test database
pub async fn raw_pool(temp_dir: &TempDir) -> Result<sqlx::SqlitePool> {
    let url = format!("sqlite:{}", db_path(temp_dir).to_str().unwrap());
    Ok(sqlx::SqlitePool::connect(&url).await?)
}

/// Every ledger record, unfiltered
pub async fn all_records(service: &LedgerService) -> Result<Vec<LoanRecord>> {
    Ok(service.list_current(&RecordFilter::default()).await?)
}

/// Records of `key` that are currently on loan
pub async fn open_records_for(service: &LedgerService, key: &str) -> Result<Vec<LoanRecord>> {
    Ok(all_records(service)
        .await?
        .into_iter()
        .filter(|r| r.key_id == key && r.status == LoanStatus::OnLoan)
        .collect())
}

/// Fails if any key has more than one record on loan
pub async fn assert_one_open_loan_per_key(service: &LedgerService) -> Result<()> {
    let records = all_records(service).await?;
    for record in records.iter().filter(|r| r.is_on_loan()) {
        let open = records
            .iter()
            .filter(|r| r.is_on_loan() && r.key_id == record.key_id)
            .count();
        assert_eq!(open, 1, "key {} is on loan {} times", record.key_id, open);
    }
    Ok(())
}
