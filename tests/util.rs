#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use invoice_ledger::{
    DecimalSeparator, InvoiceRecord, Ledger, LedgerConfig, Partition, SaveOutcome, SaveRequest,
    StoreLocation,
};
use tempfile::TempDir;

pub fn config(dir: &TempDir) -> LedgerConfig {
    LedgerConfig {
        storage_root: dir.path().join("Invoices"),
        decimal_separator: DecimalSeparator::Dot,
        store: StoreLocation::PerFolder,
        company_map_path: Some(dir.path().join("company_accounts.json")),
        ..LedgerConfig::default()
    }
}

pub fn ledger(dir: &TempDir) -> Ledger {
    Ledger::open(config(dir)).expect("open ledger")
}

pub fn partition(year: i32, month: u32) -> Partition {
    Partition::new(year, month).unwrap()
}

pub fn record(company: &str, number: &str, date: &str, gross: f64) -> InvoiceRecord {
    InvoiceRecord {
        company: company.into(),
        invoice_number: number.into(),
        invoice_date: date.into(),
        net_amount: 100.0,
        tax_percent: 19.0,
        tax_amount: 19.0,
        gross_amount: gross,
        currency: "EUR".into(),
        account: 4930,
        ..Default::default()
    }
}

pub fn document(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"%PDF-1.7").unwrap();
    path
}

pub fn save(
    ledger: &Ledger,
    partition: Partition,
    record: InvoiceRecord,
    source: PathBuf,
) -> SaveOutcome {
    ledger
        .save(SaveRequest {
            partition,
            record,
            source,
            confirm_duplicate: false,
            remember_account: false,
        })
        .expect("save")
}
