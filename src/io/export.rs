use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{format_timestamp, LoanRecord, MovementEntry, RecordFilter};

/// Column headers of the ledger sheet. Order is part of the format.
pub const LEDGER_HEADERS: [&str; 4] = ["Chave", "Usuário/Chapa", "Status", "Data"];

/// Column headers of the movement log sheet. Order is part of the format.
pub const HISTORY_HEADERS: [&str; 5] = ["Chave", "Usuário/Chapa", "Ação", "Status", "Data"];

/// Full snapshot of both stores for backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub records: Vec<LoanRecord>,
    pub movements: Vec<MovementEntry>,
}

/// Exporter for writing the ledger and the movement log out
pub struct Exporter<'a> {
    service: &'a LedgerService,
    delimiter: u8,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self {
            service,
            delimiter: b',',
        }
    }

    /// Field delimiter for CSV output (`;` suits spreadsheets in comma-decimal locales).
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn csv_writer<W: Write>(&self, writer: W) -> csv::Writer<W> {
        csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(writer)
    }

    /// Export the current ledger to CSV
    pub async fn export_ledger_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let records = self.service.list_current(&RecordFilter::default()).await?;
        let mut csv_writer = self.csv_writer(writer);

        csv_writer.write_record(LEDGER_HEADERS)?;

        for record in &records {
            let date = format_timestamp(record.timestamp);
            csv_writer.write_record([
                record.key_id.as_str(),
                record.holder.as_str(),
                record.status.label(),
                date.as_str(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(records.len())
    }

    /// Export the movement log to CSV
    pub async fn export_history_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let movements = self.service.list_history().await?;
        let mut csv_writer = self.csv_writer(writer);

        csv_writer.write_record(HISTORY_HEADERS)?;

        for entry in &movements {
            let date = format_timestamp(entry.timestamp);
            csv_writer.write_record([
                entry.key_id.as_str(),
                entry.holder.as_str(),
                entry.action.label(),
                entry.resulting_status.label(),
                date.as_str(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(movements.len())
    }

    /// Export both stores as a JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<LedgerSnapshot> {
        let records = self.service.list_current(&RecordFilter::default()).await?;
        let movements = self.service.list_history().await?;

        let snapshot = LedgerSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            records,
            movements,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
