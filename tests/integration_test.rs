mod common;

use anyhow::Result;
use common::{all_records, assert_one_open_loan_per_key, db_path, raw_pool, test_service};
use keyledger::application::{AppError, LedgerService, ReturnMode};
use keyledger::domain::{LoanStatus, MovementAction, RecordFilter};
use keyledger::storage::MemoryStore;

#[tokio::test]
async fn test_alice_bob_scenario() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service.request_loan("101", "Alice").await?;
    let duplicate = service.request_loans(&["101"], "Bob").await?;
    assert_eq!(
        duplicate.warning().map(|w| w.keys),
        Some(vec!["101".to_string()])
    );

    service.request_return("Alice", ReturnMode::Full).await?;

    let records = all_records(&service).await?;
    assert_eq!(records.len(), 2);
    assert_eq!(
        (records[0].holder.as_str(), records[0].status),
        ("Alice", LoanStatus::Returned)
    );
    assert_eq!(
        (records[1].holder.as_str(), records[1].status),
        ("Bob", LoanStatus::Duplicate)
    );

    let actions: Vec<MovementAction> = service
        .list_history()
        .await?
        .iter()
        .map(|m| m.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            MovementAction::Loan,
            MovementAction::DuplicateAttempt,
            MovementAction::Return
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_history_length_matches_attempts_plus_returns() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let mut attempts = 0;
    let mut returns = 0;

    attempts += service.request_loans(&["1", "2", "3"], "Ana").await?.outcomes.len();
    attempts += service.request_loans(&["2", "4"], "Bia").await?.outcomes.len();
    returns += service
        .request_return("Ana", ReturnMode::partial(["1", "9"]))
        .await?
        .returned
        .len();
    attempts += service.request_loans(&["1", "3", "3"], "Caio").await?.outcomes.len();
    returns += service
        .request_return("Ana", ReturnMode::Full)
        .await?
        .returned
        .len();
    returns += service
        .request_return("Bia", ReturnMode::Full)
        .await?
        .returned
        .len();
    attempts += service.request_loan("3", "Bia").await.map(|_| 1)?;

    assert_eq!(attempts, 9);
    assert_eq!(returns, 1 + 2 + 1);
    assert_eq!(service.list_history().await?.len(), attempts + returns);
    assert_eq!(all_records(&service).await?.len(), attempts);
    assert_one_open_loan_per_key(&service).await?;

    let summary = service.status_summary().await?;
    assert_eq!(summary.movements, attempts + returns);
    assert_eq!(summary.returned, returns);
    assert_eq!(summary.total_records(), attempts);

    Ok(())
}

#[tokio::test]
async fn test_every_movement_matches_ledger_state() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service.request_loans(&["10", "11"], "Ana").await?;
    service.request_loan("10", "Bia").await?;
    service
        .request_return("Ana", ReturnMode::partial(["11"]))
        .await?;

    let records = all_records(&service).await?;
    let history = service.list_history().await?;

    for record in &records {
        // The last movement for a record carries its current status
        let last = history
            .iter()
            .filter(|m| m.loan_id == record.id)
            .last()
            .expect("every record has a movement");
        assert_eq!(last.resulting_status, record.status);
    }

    Ok(())
}

#[tokio::test]
async fn test_list_current_is_idempotent_and_ordered() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service.request_loans(&["3", "1", "2"], "Ana").await?;
    service.request_loan("1", "Bia").await?;

    let first = all_records(&service).await?;
    let second = all_records(&service).await?;
    assert_eq!(first, second);

    let keys: Vec<&str> = first.iter().map(|r| r.key_id.as_str()).collect();
    assert_eq!(keys, vec!["3", "1", "2", "1"]);
    assert!(first.windows(2).all(|w| w[0].sequence < w[1].sequence));

    Ok(())
}

#[tokio::test]
async fn test_list_current_filters() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service.request_loans(&["1", "2"], "Ana").await?;
    service.request_loan("1", "Bia").await?;
    service.request_loan("3", "Bia").await?;

    let duplicates = service
        .list_current(&RecordFilter::default().with_status(LoanStatus::Duplicate))
        .await?;
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].holder, "Bia");

    let bia = service
        .list_current(&RecordFilter::default().with_holder("Bia"))
        .await?;
    assert_eq!(bia.len(), 2);

    let bia_on_loan = service
        .list_current(
            &RecordFilter::default()
                .with_holder("Bia")
                .with_status(LoanStatus::OnLoan),
        )
        .await?;
    assert_eq!(bia_on_loan.len(), 1);
    assert_eq!(bia_on_loan[0].key_id, "3");

    assert_eq!(service.holders().await?, vec!["Ana", "Bia"]);

    Ok(())
}

#[tokio::test]
async fn test_data_survives_reconnect() -> Result<()> {
    let (service, temp) = test_service().await?;

    service.request_loan("101", "Alice").await?;
    service.request_loan("101", "Bob").await?;
    drop(service);

    let reopened = LedgerService::connect(db_path(&temp).to_str().unwrap()).await?;
    assert_eq!(all_records(&reopened).await?.len(), 2);
    assert_eq!(reopened.list_history().await?.len(), 2);

    // The reopened ledger still knows 101 is out
    let outcome = reopened.request_loan("101", "Carol").await?;
    assert!(outcome.is_duplicate());

    Ok(())
}

#[tokio::test]
async fn test_failed_commit_leaves_no_trace_in_memory() -> Result<()> {
    let store = MemoryStore::new();
    let service = LedgerService::new(store.clone());

    service.request_loan("101", "Alice").await?;
    store.fail_commits(true);

    let err = service.request_loan("102", "Alice").await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
    let err = service
        .request_return("Alice", ReturnMode::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));

    let records = all_records(&service).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, LoanStatus::OnLoan);
    assert_eq!(service.list_history().await?.len(), 1);

    store.fail_commits(false);
    service.request_loan("102", "Alice").await?;
    assert_eq!(service.list_history().await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_failed_movement_write_rolls_back_sqlite() -> Result<()> {
    let (service, temp) = test_service().await?;
    service.request_loan("101", "Alice").await?;

    // Make every movement insert fail after the ledger row has been written
    let pool = raw_pool(&temp).await?;
    sqlx::query(
        r#"
        CREATE TRIGGER fail_movement_insert
        BEFORE INSERT ON movements
        BEGIN
            SELECT RAISE(ABORT, 'disk full');
        END;
        "#,
    )
    .execute(&pool)
    .await?;

    let err = service.request_loan("102", "Alice").await.unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));
    let err = service
        .request_return("Alice", ReturnMode::Full)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Persistence(_)));

    let records = all_records(&service).await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key_id, "101");
    assert_eq!(records[0].status, LoanStatus::OnLoan);
    assert_eq!(service.list_history().await?.len(), 1);

    sqlx::query("DROP TRIGGER fail_movement_insert")
        .execute(&pool)
        .await?;
    service.request_loan("102", "Alice").await?;
    assert!(service.check_integrity().await?.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_movement_log_rejects_edits() -> Result<()> {
    let (service, temp) = test_service().await?;
    service.request_loan("101", "Alice").await?;

    let pool = raw_pool(&temp).await?;
    assert!(sqlx::query("UPDATE movements SET holder = 'Mallory'")
        .execute(&pool)
        .await
        .is_err());
    assert!(sqlx::query("DELETE FROM movements")
        .execute(&pool)
        .await
        .is_err());
    assert!(sqlx::query("DELETE FROM loan_records")
        .execute(&pool)
        .await
        .is_err());

    assert_eq!(service.list_history().await?[0].holder, "Alice");

    Ok(())
}

#[tokio::test]
async fn test_integrity_check_healthy_ledger() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service.request_loans(&["1", "2", "2"], "Ana").await?;
    service.request_loan("1", "Bia").await?;
    service.request_return("Ana", ReturnMode::partial(["2"])).await?;

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "{:?}", report);
    assert_eq!(report.record_count, 4);
    assert_eq!(report.movement_count, 5);
    assert_eq!(report.open_loan_count, 1);

    Ok(())
}

#[tokio::test]
async fn test_integrity_check_detects_status_edited_outside_service() -> Result<()> {
    let (service, temp) = test_service().await?;
    service.request_loan("101", "Alice").await?;

    let pool = raw_pool(&temp).await?;
    sqlx::query("UPDATE loan_records SET status = 'Devolvido'")
        .execute(&pool)
        .await?;

    let report = service.check_integrity().await?;
    assert!(!report.is_healthy());
    assert_eq!(report.replay_mismatches, 1);
    assert_eq!(report.expected_movement_count, 2);

    Ok(())
}

#[tokio::test]
async fn test_status_is_stored_with_sheet_label() -> Result<()> {
    let (service, temp) = test_service().await?;
    service.request_loan("101", "Alice").await?;
    service.request_loan("101", "Bob").await?;

    let pool = raw_pool(&temp).await?;
    let labels: Vec<String> =
        sqlx::query_scalar("SELECT status FROM loan_records ORDER BY sequence")
            .fetch_all(&pool)
            .await?;
    assert_eq!(labels, vec!["Emprestado", "Duplicada"]);

    let actions: Vec<String> = sqlx::query_scalar("SELECT action FROM movements ORDER BY sequence")
        .fetch_all(&pool)
        .await?;
    assert_eq!(actions, vec!["Empréstimo", "Tentativa de Empréstimo"]);

    Ok(())
}
