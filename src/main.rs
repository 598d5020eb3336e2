use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use invoice_ledger::{
    DecimalSeparator, FilenameTemplate, InvoiceKey, InvoiceRecord, Ledger, LedgerConfig,
    Partition, RenderOptions, SaveOutcome, SaveRequest, StoreLocation, TokenAliases,
};

/// Exit status when a save was refused because the invoice already exists.
const DUPLICATE_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "invoice-ledger", about = "Invoice ledger maintenance", version)]
struct Cli {
    #[command(flatten)]
    storage: StorageArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct StorageArgs {
    /// Storage root; overrides INVOICE_LEDGER_ROOT.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Keep everything directly in the storage root instead of YYYY-MM folders.
    #[arg(long, global = true)]
    flat: bool,
    /// Use one store file at this path for all partitions.
    #[arg(long, global = true)]
    global_db: Option<PathBuf>,
    /// Also write JSON logs to a rotating file in this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct KeyArgs {
    #[arg(long, conflicts_with = "filename", required_unless_present = "filename")]
    id: Option<i64>,
    #[arg(long)]
    filename: Option<String>,
}

impl KeyArgs {
    fn into_key(self) -> Result<InvoiceKey> {
        match (self.id, self.filename) {
            (Some(id), _) => Ok(InvoiceKey::Id(id)),
            (None, Some(name)) => Ok(InvoiceKey::Filename(name)),
            (None, None) => anyhow::bail!("either --id or --filename is required"),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the invoices of a month.
    List {
        partition: Partition,
        #[arg(long)]
        json: bool,
    },
    /// Regenerate a month's CSV file from the store.
    Export { partition: Partition },
    /// Import legacy CSV files once.
    Migrate {
        #[arg(long)]
        json: bool,
    },
    /// File a document with its invoice record.
    Save {
        partition: Partition,
        /// JSON invoice record, `-` for stdin.
        #[arg(long)]
        record: PathBuf,
        /// Document to file.
        #[arg(long)]
        source: PathBuf,
        /// Save even if the invoice is already stored.
        #[arg(long)]
        confirm_duplicate: bool,
        /// Remember the record's account for its company.
        #[arg(long)]
        remember_account: bool,
        #[arg(long)]
        json: bool,
    },
    /// Replace an invoice's fields and rename its document to match.
    Update {
        partition: Partition,
        #[command(flatten)]
        key: KeyArgs,
        /// JSON invoice record, `-` for stdin.
        #[arg(long)]
        record: PathBuf,
    },
    /// Delete an invoice and its document.
    Delete {
        partition: Partition,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Suggest a booking account for a company.
    Account {
        company: String,
        /// Store this account for the company instead of suggesting one.
        #[arg(long)]
        set: Option<i64>,
    },
    /// Print the filename a record would be stored under.
    Render {
        /// JSON invoice record, `-` for stdin.
        #[arg(long)]
        record: PathBuf,
        /// Naming template; defaults to the configured one.
        #[arg(long)]
        template: Option<String>,
        /// Decimal separator for amounts, `,` or `.`.
        #[arg(long)]
        separator: Option<DecimalSeparator>,
        /// Value for ${OriginalName}.
        #[arg(long)]
        original_name: Option<String>,
    },
}

fn main() {
    invoice_ledger::init_logging();

    let cli = Cli::parse();
    if let Some(dir) = &cli.storage.log_dir {
        if let Err(err) = invoice_ledger::init_file_logging(dir) {
            eprintln!("Warning: file logging disabled: {err}");
        }
    }
    let result = run(cli);
    invoice_ledger::flush_file_logs();
    match result {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn config_for(args: &StorageArgs) -> LedgerConfig {
    let mut config = LedgerConfig::from_env();
    if let Some(root) = &args.root {
        config.storage_root = root.clone();
    }
    if args.flat {
        config.use_month_subfolders = false;
    }
    if let Some(path) = &args.global_db {
        config.store = StoreLocation::Global { path: path.clone() };
    }
    config
}

fn read_record(path: &Path) -> Result<InvoiceRecord> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("read record from stdin")?;
        buf
    } else {
        fs::read_to_string(path).with_context(|| format!("read record {}", path.display()))?
    };
    serde_json::from_str(&text).context("parse invoice record JSON")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<i32> {
    let config = config_for(&cli.storage);

    if let Commands::Render {
        record,
        template,
        separator,
        original_name,
    } = &cli.command
    {
        let record = read_record(record)?;
        let template = FilenameTemplate::new(
            template.as_deref().unwrap_or(&config.naming_template),
            &TokenAliases::default(),
        );
        let opts = RenderOptions {
            decimal_separator: separator.unwrap_or(config.decimal_separator),
            original_name: original_name.clone(),
        };
        println!("{}", template.render_for_filing(&record, &opts));
        return Ok(0);
    }

    let ledger = Ledger::open(config)?;
    match cli.command {
        Commands::List { partition, json } => {
            let rows = ledger.list(partition)?;
            if json {
                print_json(&rows)?;
            } else {
                println!("{:>6}  {:<10}  {:<24}  {:>10}  Filename", "ID", "Date", "Company", "Gross");
                for row in &rows {
                    println!(
                        "{:>6}  {:<10}  {:<24}  {:>10.2}  {}",
                        row.id,
                        row.record.invoice_date,
                        row.record.company,
                        row.record.gross_amount,
                        row.record.filename
                    );
                }
            }
            Ok(0)
        }
        Commands::Export { partition } => {
            let report = ledger.export(partition)?;
            println!("exported {} rows to {}", report.rows, report.path.display());
            Ok(0)
        }
        Commands::Migrate { json } => {
            let report = ledger.migrate()?;
            if json {
                print_json(&report)?;
            } else if report.already_migrated {
                println!("legacy import already done");
            } else {
                println!(
                    "imported {} invoices from {} files ({} duplicates, {} failed files)",
                    report.imported, report.files_scanned, report.duplicates, report.files_failed
                );
            }
            Ok(0)
        }
        Commands::Save {
            partition,
            record,
            source,
            confirm_duplicate,
            remember_account,
            json,
        } => {
            let record = read_record(&record)?;
            let outcome = ledger.save(SaveRequest {
                partition,
                record,
                source,
                confirm_duplicate,
                remember_account,
            })?;
            if json {
                print_json(&outcome)?;
            }
            match outcome {
                SaveOutcome::Saved(saved) => {
                    if !json {
                        println!("{}", saved.path.display());
                    }
                    for warning in &saved.warnings {
                        eprintln!("Warning: {warning}");
                    }
                    Ok(0)
                }
                SaveOutcome::Duplicate { filename } => {
                    eprintln!("Duplicate invoice, not saved: {filename} (use --confirm-duplicate)");
                    Ok(DUPLICATE_EXIT_CODE)
                }
            }
        }
        Commands::Update {
            partition,
            key,
            record,
        } => {
            let key = key.into_key()?;
            let record = read_record(&record)?;
            let report = ledger.update_invoice(partition, &key, record)?;
            println!("updated {} ({})", report.filename, report.id);
            for warning in &report.warnings {
                eprintln!("Warning: {warning}");
            }
            Ok(0)
        }
        Commands::Delete { partition, key } => {
            let key = key.into_key()?;
            let report = ledger.delete_invoice(partition, &key)?;
            println!("deleted {}", report.filename);
            for warning in &report.warnings {
                eprintln!("Warning: {warning}");
            }
            Ok(0)
        }
        Commands::Account { company, set } => {
            match set {
                Some(account) => {
                    ledger.remember_account(&company, account)?;
                    println!("{account}");
                }
                None => {
                    let (account, known) = ledger.suggest_account(&company);
                    let source = if known { "remembered" } else { "default" };
                    println!("{account} ({source})");
                }
            }
            Ok(0)
        }
        Commands::Render { .. } => Ok(0),
    }
}
