use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{LedgerService, ReturnMode};
use crate::domain::{format_timestamp, parse_key_list, LoanStatus, RecordFilter};

/// keyledger - Key Loan Ledger
#[derive(Parser)]
#[command(name = "keyledger")]
#[command(about = "A local-first ledger of physical key loans, returns and duplicate attempts")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "KEYLEDGER_DB", default_value = "keyledger.db")]
    pub database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "KEYLEDGER_LOG", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Lend one or more keys to a holder
    Loan {
        /// Keys to lend, comma-separated (e.g. "101, 102, 105")
        keys: String,

        /// Holder name or badge
        #[arg(long)]
        holder: String,
    },

    /// Register returned keys
    Return {
        /// Holder name or badge
        #[arg(long)]
        holder: String,

        /// Keys to return, comma-separated (omit to return everything the holder has)
        #[arg(short, long)]
        keys: Option<String>,
    },

    /// Show the current ledger
    List {
        /// Filter by status: on-loan, returned, duplicate (or Emprestado, Devolvido, Duplicada)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by holder
        #[arg(long)]
        holder: Option<String>,
    },

    /// Show keys currently on loan to a holder
    Holding {
        /// Holder name or badge
        holder: String,
    },

    /// List every holder that appears in the ledger
    Holders,

    /// Show the movement log
    History,

    /// Count records per status
    Summary,

    /// Verify the ledger against the movement log
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: ledger, history, full
        export_type: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// CSV field delimiter
        #[arg(long, default_value = ",")]
        delimiter: char,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Loan { keys, holder } => {
                let service = LedgerService::connect(&self.database).await?;
                run_loan_command(&service, &keys, &holder).await?;
            }

            Commands::Return { holder, keys } => {
                let service = LedgerService::connect(&self.database).await?;
                run_return_command(&service, &holder, keys.as_deref()).await?;
            }

            Commands::List { status, holder } => {
                let service = LedgerService::connect(&self.database).await?;
                run_list_command(&service, status, holder).await?;
            }

            Commands::Holding { holder } => {
                let service = LedgerService::connect(&self.database).await?;
                let records = service.keys_on_loan(&holder).await?;
                if records.is_empty() {
                    println!("{} has no keys on loan.", holder);
                } else {
                    let keys: Vec<&str> = records.iter().map(|r| r.key_id.as_str()).collect();
                    println!("Keys on loan to {}: {}", holder, keys.join(", "));
                }
            }

            Commands::Holders => {
                let service = LedgerService::connect(&self.database).await?;
                let holders = service.holders().await?;
                if holders.is_empty() {
                    println!("No holders found.");
                } else {
                    for holder in holders {
                        println!("{}", holder);
                    }
                }
            }

            Commands::History => {
                let service = LedgerService::connect(&self.database).await?;
                run_history_command(&service).await?;
            }

            Commands::Summary => {
                let service = LedgerService::connect(&self.database).await?;
                let summary = service.status_summary().await?;
                println!("{:<12} {:>6}", "STATUS", "COUNT");
                println!("{}", "-".repeat(19));
                for status in LoanStatus::ALL {
                    println!("{:<12} {:>6}", status.label(), summary.count(status));
                }
                println!("{}", "-".repeat(19));
                println!("{:<12} {:>6}", "Total", summary.total_records());
                println!("{:<12} {:>6}", "Movements", summary.movements);
            }

            Commands::Check => {
                let service = LedgerService::connect(&self.database).await?;
                run_check_command(&service).await?;
            }

            Commands::Export {
                export_type,
                output,
                delimiter,
            } => {
                let service = LedgerService::connect(&self.database).await?;
                run_export_command(&service, &export_type, output.as_deref(), delimiter).await?;
            }
        }

        Ok(())
    }
}

async fn run_loan_command(service: &LedgerService, keys: &str, holder: &str) -> Result<()> {
    let keys = parse_key_list(keys);
    if keys.is_empty() {
        anyhow::bail!("No keys given. Use a comma-separated list, e.g. \"101, 102\"");
    }

    let result = service.request_loans(&keys, holder).await?;

    for outcome in &result.outcomes {
        let record = outcome.record();
        if outcome.is_duplicate() {
            println!("Duplicate: key {} (attempt by {})", record.key_id, record.holder);
        } else {
            println!("Loaned:    key {} -> {}", record.key_id, record.holder);
        }
    }

    if let Some(warning) = result.warning() {
        eprintln!("Warning: {}", warning);
    }
    Ok(())
}

async fn run_return_command(
    service: &LedgerService,
    holder: &str,
    keys: Option<&str>,
) -> Result<()> {
    let mode = match keys {
        Some(keys) => ReturnMode::Partial(parse_key_list(keys)),
        None => ReturnMode::Full,
    };

    let result = service.request_return(holder, mode).await?;

    if result.returned.is_empty() {
        println!("Nothing returned: {} has none of those keys on loan.", result.holder);
    } else {
        let keys: Vec<&str> = result.returned.iter().map(|r| r.key_id.as_str()).collect();
        println!("Returned by {}: {}", result.holder, keys.join(", "));
    }
    if !result.ignored.is_empty() {
        eprintln!("Not on loan to {}: {}", result.holder, result.ignored.join(", "));
    }
    Ok(())
}

async fn run_list_command(
    service: &LedgerService,
    status: Option<String>,
    holder: Option<String>,
) -> Result<()> {
    let status = status
        .map(|s| s.parse::<LoanStatus>())
        .transpose()
        .map_err(|e| {
            anyhow::anyhow!(
                "{}. Valid statuses: on-loan, returned, duplicate (or Emprestado, Devolvido, Duplicada)",
                e
            )
        })?;

    let filter = RecordFilter { status, holder };
    let records = service.list_current(&filter).await?;

    if records.is_empty() {
        println!("No records found.");
    } else {
        println!(
            "{:<10} {:<20} {:<12} DATA",
            "CHAVE", "USUÁRIO/CHAPA", "STATUS"
        );
        println!("{}", "-".repeat(64));
        for record in records {
            println!(
                "{:<10} {:<20} {:<12} {}",
                truncate(&record.key_id, 10),
                truncate(&record.holder, 20),
                record.status.label(),
                format_timestamp(record.timestamp)
            );
        }
    }
    Ok(())
}

async fn run_history_command(service: &LedgerService) -> Result<()> {
    let movements = service.list_history().await?;

    if movements.is_empty() {
        println!("No movements recorded yet.");
    } else {
        println!(
            "{:<10} {:<20} {:<24} {:<12} DATA",
            "CHAVE", "USUÁRIO/CHAPA", "AÇÃO", "STATUS"
        );
        println!("{}", "-".repeat(88));
        for entry in movements {
            println!(
                "{:<10} {:<20} {:<24} {:<12} {}",
                truncate(&entry.key_id, 10),
                truncate(&entry.holder, 20),
                entry.action.label(),
                entry.resulting_status.label(),
                format_timestamp(entry.timestamp)
            );
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Records:    {}", report.record_count);
    println!("Movements:  {}", report.movement_count);
    println!("On loan:    {}", report.open_loan_count);
    println!();

    if !report.keys_with_multiple_open_loans.is_empty() {
        println!(
            "  [FAIL] Keys on loan more than once: {}",
            report.keys_with_multiple_open_loans.join(", ")
        );
    }
    if report.records_without_movement > 0 {
        println!(
            "  [FAIL] {} record(s) with no movement creating them",
            report.records_without_movement
        );
    }
    if report.movement_count != report.expected_movement_count {
        println!(
            "  [FAIL] Movement log has {} entries, expected {}",
            report.movement_count, report.expected_movement_count
        );
    }
    if let Some(err) = &report.replay_error {
        println!("  [FAIL] Movement log cannot be replayed: {}", err);
    }
    if report.replay_mismatches > 0 {
        println!(
            "  [FAIL] {} record(s) differ from the replayed movement log",
            report.replay_mismatches
        );
    }

    if report.is_healthy() {
        println!("  [OK] Ledger matches the movement log");
        Ok(())
    } else {
        anyhow::bail!("Ledger integrity check failed")
    }
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    output: Option<&str>,
    delimiter: char,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{stdout, Write};

    if !delimiter.is_ascii() {
        anyhow::bail!("Delimiter must be a single ASCII character");
    }
    let exporter = Exporter::new(service).with_delimiter(delimiter as u8);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "ledger" => {
            let count = exporter.export_ledger_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} ledger records", count);
            }
        }
        "history" => {
            let count = exporter.export_history_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} movements", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full database: {} records, {} movements",
                    snapshot.records.len(),
                    snapshot.movements.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: ledger, history, full",
                export_type
            );
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
