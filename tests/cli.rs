#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use tempfile::tempdir;

const RECORD: &str = r#"{
    "company": "Acme GmbH",
    "invoice_number": "R-100",
    "invoice_date": "15.03.2025",
    "net_amount": 100.0,
    "tax_percent": 19.0,
    "tax_amount": 19.0,
    "gross_amount": 119.0,
    "currency": "EUR",
    "account": 4930
}"#;

fn cli(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("invoice-ledger").unwrap();
    cmd.env_remove("INVOICE_LEDGER_ROOT")
        .env_remove("INVOICE_LEDGER_TEMPLATE")
        .env_remove("INVOICE_LEDGER_GLOBAL_DB")
        .env_remove("INVOICE_LEDGER_MONTH_SUBFOLDERS")
        .env("INVOICE_LEDGER_DECIMAL_SEPARATOR", ".")
        .env("INVOICE_LEDGER_LOG", "off")
        .arg("--root")
        .arg(root);
    cmd
}

#[test]
fn render_prints_filename_without_touching_storage() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Invoices");
    let record = dir.path().join("record.json");
    fs::write(&record, RECORD).unwrap();

    let output = cli(&root)
        .args(["render", "--record"])
        .arg(&record)
        .args(["--separator", ","])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "2025-03-15_Acme GmbH_119,00_EUR.pdf"
    );
    assert!(!root.exists());

    let output = cli(&root)
        .args(["render", "--template", "${Firma}-${Rechnungsnummer}.pdf", "--record"])
        .arg(&record)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "Acme GmbH-R-100.pdf");
}

#[test]
fn second_save_of_same_invoice_exits_with_duplicate_status() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Invoices");
    let record = dir.path().join("record.json");
    fs::write(&record, RECORD).unwrap();

    for (name, expected) in [("first.pdf", 0), ("second.pdf", 2)] {
        let source = dir.path().join(name);
        fs::write(&source, b"%PDF").unwrap();
        cli(&root)
            .args(["save", "2025-03", "--record"])
            .arg(&record)
            .arg("--source")
            .arg(&source)
            .assert()
            .code(expected);
    }
    assert!(root.join("2025-03/2025-03-15_Acme GmbH_119.00_EUR.pdf").exists());
    assert!(dir.path().join("second.pdf").exists());

    let output = cli(&root)
        .args(["list", "2025-03", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.as_array().map(Vec::len), Some(1));
    assert_eq!(rows[0]["invoice_number"], "R-100");

    cli(&root)
        .args(["delete", "2025-03", "--id"])
        .arg(rows[0]["id"].to_string())
        .assert()
        .success();
    assert!(!root.join("2025-03/2025-03-15_Acme GmbH_119.00_EUR.pdf").exists());
}

#[test]
fn malformed_partition_is_rejected() {
    let dir = tempdir().unwrap();
    cli(&dir.path().join("Invoices"))
        .args(["list", "2025-13"])
        .assert()
        .failure();
}

#[test]
fn render_takes_period_from_invoice_date_like_save() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("Invoices");
    let mut value: serde_json::Value = serde_json::from_str(RECORD).unwrap();
    value["year"] = "2025".into();
    value["month"] = "04".into();
    let record = dir.path().join("record.json");
    fs::write(&record, value.to_string()).unwrap();

    let output = cli(&root)
        .args(["render", "--record"])
        .arg(&record)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "2025-03-15_Acme GmbH_119.00_EUR.pdf"
    );
}
