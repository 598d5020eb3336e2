#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use std::fs;

use invoice_ledger::{Ledger, LedgerConfig, StoreLocation, TabularCodec};
use tempfile::tempdir;
use util::{config, partition, record};

#[test]
fn imports_legacy_files_exactly_once() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Invoices");
    let codec = TabularCodec::default();

    let mut first = record("Acme GmbH", "R-100", "15.03.2025", 119.0);
    first.filename = "a.pdf".into();
    let mut second = record("Beta AG", "B-7", "20.03.2025", 59.5);
    second.filename = "b.pdf".into();
    // Same invoice twice in one legacy file: only one row lands.
    codec
        .rewrite(
            &root.join("2025-03/invoices.csv"),
            &[first.clone(), second, first.clone()],
        )
        .unwrap();
    let mut january = record("Gamma KG", "G-1", "05.01.2025", 10.0);
    january.filename = "g.pdf".into();
    codec
        .rewrite(&root.join("2025-01/invoices.csv"), &[january])
        .unwrap();

    let ledger = Ledger::open(config(&dir)).unwrap();
    let report = ledger.migrate().unwrap();
    assert_eq!(report.files_scanned, 2);
    assert_eq!(report.imported, 3);
    assert_eq!(report.duplicates, 1);
    assert!(root.join(".migrated").exists());
    assert_eq!(ledger.list(partition(2025, 3)).unwrap().len(), 2);
    assert_eq!(ledger.list(partition(2025, 1)).unwrap().len(), 1);

    let again = ledger.migrate().unwrap();
    assert!(again.already_migrated);
    assert_eq!(again.imported, 0);
    assert_eq!(ledger.list(partition(2025, 3)).unwrap().len(), 2);
}

#[test]
fn unreadable_file_is_skipped_and_marker_still_written() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Invoices");
    fs::create_dir_all(root.join("2025-02")).unwrap();
    fs::write(root.join("2025-02/invoices.csv"), [0xff, 0xfe, b'"', b'\n', 0x00]).unwrap();

    let mut good = record("Acme GmbH", "R-100", "15.03.2025", 119.0);
    good.filename = "a.pdf".into();
    TabularCodec::default()
        .rewrite(&root.join("2025-03/invoices.csv"), &[good])
        .unwrap();

    let ledger = Ledger::open(config(&dir)).unwrap();
    let report = ledger.migrate().unwrap();
    assert_eq!(report.files_scanned, 2);
    assert_eq!(report.imported, 1);
    assert!(root.join(".migrated").exists());
}

#[test]
fn global_store_routes_rows_by_their_own_month() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Invoices");
    let db = dir.path().join("ledger.db");

    let mut march = record("Acme GmbH", "R-100", "15.03.2025", 119.0);
    march.filename = "a.pdf".into();
    let mut april = record("Acme GmbH", "R-101", "02.04.2025", 119.0);
    april.filename = "b.pdf".into();
    // Flat legacy file: no folder month, so rows fall back to their dates.
    TabularCodec::default()
        .rewrite(&root.join("invoices.csv"), &[march, april])
        .unwrap();

    let config = LedgerConfig {
        use_month_subfolders: false,
        store: StoreLocation::Global { path: db.clone() },
        ..config(&dir)
    };
    let ledger = Ledger::open(config).unwrap();
    assert_eq!(ledger.migrate().unwrap().imported, 2);
    assert_eq!(ledger.list(partition(2025, 3)).unwrap().len(), 1);
    assert_eq!(ledger.list(partition(2025, 4)).unwrap().len(), 1);
    assert!(dir.path().join(".migrated").exists());
}

#[test]
fn append_migrates_an_old_header_first() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("invoices.csv");

    fs::write(
        &path,
        "Dateiname,Firmenname,Rechnungsnummer,Bruttobetrag\na.pdf,Acme GmbH,R-100,\"119,00\"\n",
    )
    .unwrap();

    let codec = TabularCodec::default();
    let mut new = record("Beta AG", "B-7", "20.03.2025", 59.5);
    new.filename = "b.pdf".into();
    codec.append(&path, &new).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(header, codec.order().header().join(","));

    let rows = codec.load(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].company, "Acme GmbH");
    assert_eq!(rows[0].gross_amount, 119.0);
    assert_eq!(rows[0].invoice_date, "");
    assert_eq!(rows[1].invoice_number, "B-7");
}
