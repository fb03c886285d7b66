mod common;

use anyhow::Result;
use chrono::NaiveDateTime;
use common::test_service;
use keyledger::application::{LedgerService, ReturnMode};
use keyledger::domain::TIMESTAMP_FORMAT;
use keyledger::io::{Exporter, LedgerSnapshot, HISTORY_HEADERS, LEDGER_HEADERS};

async fn seeded_service() -> Result<(LedgerService, tempfile::TempDir)> {
    let (service, temp) = test_service().await?;
    service.request_loans(&["101", "102"], "Alice").await?;
    service.request_loan("101", "Bob").await?;
    service
        .request_return("Alice", ReturnMode::partial(["102"]))
        .await?;
    Ok((service, temp))
}

fn read_rows(bytes: &[u8], delimiter: u8) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_reader(bytes);
    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|r| r.map(|rec| rec.iter().map(str::to_string).collect()))
        .collect::<Result<Vec<Vec<String>>, _>>()?;
    Ok((headers, rows))
}

#[tokio::test]
async fn test_export_ledger_csv() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let mut buffer = Vec::new();

    let count = Exporter::new(&service)
        .export_ledger_csv(&mut buffer)
        .await?;
    assert_eq!(count, 3);

    let (headers, rows) = read_rows(&buffer, b',')?;
    assert_eq!(headers, LEDGER_HEADERS);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][..3], ["101", "Alice", "Emprestado"]);
    assert_eq!(rows[1][..3], ["102", "Alice", "Devolvido"]);
    assert_eq!(rows[2][..3], ["101", "Bob", "Duplicada"]);
    for row in &rows {
        assert!(NaiveDateTime::parse_from_str(&row[3], TIMESTAMP_FORMAT).is_ok());
    }

    Ok(())
}

#[tokio::test]
async fn test_export_history_csv() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let mut buffer = Vec::new();

    let count = Exporter::new(&service)
        .export_history_csv(&mut buffer)
        .await?;
    assert_eq!(count, 4);

    let (headers, rows) = read_rows(&buffer, b',')?;
    assert_eq!(headers, HISTORY_HEADERS);
    let actions: Vec<(&str, &str)> = rows
        .iter()
        .map(|r| (r[2].as_str(), r[3].as_str()))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("Empréstimo", "Emprestado"),
            ("Empréstimo", "Emprestado"),
            ("Tentativa de Empréstimo", "Duplicada"),
            ("Devolução", "Devolvido"),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_export_with_semicolon_delimiter() -> Result<()> {
    let service = LedgerService::in_memory();
    service.request_loan("101", "Silva, J.").await?;
    let mut buffer = Vec::new();

    Exporter::new(&service)
        .with_delimiter(b';')
        .export_ledger_csv(&mut buffer)
        .await?;

    let text = String::from_utf8(buffer.clone())?;
    assert!(text.starts_with("Chave;Usuário/Chapa;Status;Data"));

    let (_, rows) = read_rows(&buffer, b';')?;
    assert_eq!(rows[0][1], "Silva, J.");

    Ok(())
}

#[tokio::test]
async fn test_export_empty_ledger_writes_headers_only() -> Result<()> {
    let service = LedgerService::in_memory();
    let mut buffer = Vec::new();

    let count = Exporter::new(&service)
        .export_history_csv(&mut buffer)
        .await?;
    assert_eq!(count, 0);

    let (headers, rows) = read_rows(&buffer, b',')?;
    assert_eq!(headers.len(), 5);
    assert!(rows.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_export_full_json() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let mut buffer = Vec::new();

    let snapshot = Exporter::new(&service)
        .export_full_json(&mut buffer)
        .await?;
    assert_eq!(snapshot.records.len(), 3);
    assert_eq!(snapshot.movements.len(), 4);

    let parsed: LedgerSnapshot = serde_json::from_slice(&buffer)?;
    assert_eq!(parsed.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(parsed.records, snapshot.records);
    assert_eq!(parsed.movements, snapshot.movements);

    let raw: serde_json::Value = serde_json::from_slice(&buffer)?;
    assert_eq!(raw["records"][2]["status"], "duplicate");
    assert_eq!(raw["movements"][3]["action"], "return");

    Ok(())
}
