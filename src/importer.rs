//! One-time import of legacy tabular files into the store.
//!
//! Guarded by the `.migrated` marker: once it exists the importer does
//! nothing. Files that fail to load are logged and skipped, and the marker is
//! written even after partial success so the import never repeats.

use std::fs;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::file_ops::{find_tabular_files, parent_folder_name};
use crate::model::{InvoiceRecord, Partition};
use crate::stores::StoreSet;
use crate::tabular::TabularCodec;
use crate::AppResult;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Rows newly inserted into a store.
    pub imported: usize,
    pub duplicates: usize,
    /// Rows without any usable month.
    pub unroutable: usize,
    pub files_scanned: usize,
    pub files_failed: usize,
    pub already_migrated: bool,
}

/// Partition for a legacy row: the `YYYY-MM` folder the file sits in, then
/// the row's own year/month, then its invoice date.
fn route(folder: Option<Partition>, record: &InvoiceRecord) -> Option<Partition> {
    folder
        .or_else(|| Partition::from_fields(&record.year, &record.month))
        .or_else(|| Partition::from_invoice_date(&record.invoice_date))
}

pub fn migrate_legacy_files(stores: &mut StoreSet, codec: &TabularCodec) -> AppResult<ImportReport> {
    let marker = stores.layout().marker_path();
    if marker.exists() {
        info!(
            target: "invoice_ledger",
            event = "legacy_import_skipped",
            marker = %marker.display()
        );
        return Ok(ImportReport {
            already_migrated: true,
            ..Default::default()
        });
    }

    let started = Instant::now();
    let root = stores.layout().root().to_path_buf();
    let mut report = ImportReport::default();

    for path in find_tabular_files(&root) {
        report.files_scanned += 1;
        if let Err(err) = import_file(stores, codec, &path, &mut report) {
            report.files_failed += 1;
            warn!(
                target: "invoice_ledger",
                event = "legacy_import_file_failed",
                path = %path.display(),
                error = %err
            );
        }
    }

    write_marker(&marker);
    info!(
        target: "invoice_ledger",
        event = "legacy_import_complete",
        imported = report.imported,
        duplicates = report.duplicates,
        unroutable = report.unroutable,
        files = report.files_scanned,
        failed = report.files_failed,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
    );
    Ok(report)
}

fn import_file(
    stores: &mut StoreSet,
    codec: &TabularCodec,
    path: &Path,
    report: &mut ImportReport,
) -> AppResult<()> {
    let rows = codec.load(path)?;
    let folder = parent_folder_name(path).and_then(|name| name.parse::<Partition>().ok());

    for row in rows {
        let Some(partition) = route(folder, &row) else {
            report.unroutable += 1;
            warn!(
                target: "invoice_ledger",
                event = "legacy_row_unroutable",
                path = %path.display(),
                filename = %row.filename
            );
            continue;
        };
        let store = stores.for_partition(partition)?;
        if store.is_duplicate(partition, &row)? {
            report.duplicates += 1;
            continue;
        }
        store.insert(partition, &row)?;
        report.imported += 1;
    }
    Ok(())
}

fn write_marker(marker: &Path) {
    let result = marker
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| fs::write(marker, b""));
    if let Err(err) = result {
        warn!(
            target: "invoice_ledger",
            event = "legacy_import_marker_failed",
            marker = %marker.display(),
            error = %err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StorageLayout, StoreLocation};
    use tempfile::tempdir;

    #[test]
    fn routing_prefers_folder_then_fields_then_date() {
        let folder = Some(Partition::new(2025, 3).unwrap());
        let mut row = InvoiceRecord {
            year: "2024".into(),
            month: "11".into(),
            invoice_date: "01.01.2023".into(),
            ..Default::default()
        };
        assert_eq!(route(folder, &row), folder);
        assert_eq!(route(None, &row), Some(Partition::new(2024, 11).unwrap()));
        row.year.clear();
        assert_eq!(route(None, &row), Some(Partition::new(2023, 1).unwrap()));
        row.invoice_date = "soon".into();
        assert_eq!(route(None, &row), None);
    }

    #[test]
    fn marker_short_circuits() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".migrated"), b"").unwrap();
        fs::create_dir_all(dir.path().join("2025-03")).unwrap();
        fs::write(
            dir.path().join("2025-03/invoices.csv"),
            "filename,company,invoice_number\na.pdf,Acme,R-1\n",
        )
        .unwrap();

        let mut stores = StoreSet::new(StorageLayout::new(dir.path(), true, StoreLocation::PerFolder));
        let report = migrate_legacy_files(&mut stores, &TabularCodec::default()).unwrap();
        assert!(report.already_migrated);
        assert_eq!(report.imported, 0);
        assert_eq!(stores.open_count(), 0);
    }

    #[test]
    fn broken_file_is_skipped_and_marker_written() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2025-02")).unwrap();
        fs::create_dir_all(dir.path().join("2025-03")).unwrap();
        fs::write(dir.path().join("2025-02/invoices.csv"), [0xff, 0xfe, b',', 0xff]).unwrap();
        fs::write(
            dir.path().join("2025-03/invoices.csv"),
            "filename,company,invoice_number,invoice_date\na.pdf,Acme,R-1,15.03.2025\na.pdf,Acme,R-1,15.03.2025\n",
        )
        .unwrap();

        let mut stores = StoreSet::new(StorageLayout::new(dir.path(), true, StoreLocation::PerFolder));
        let report = migrate_legacy_files(&mut stores, &TabularCodec::default()).unwrap();
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.imported, 1);
        assert_eq!(report.duplicates, 1);
        assert!(dir.path().join(".migrated").exists());
    }
}
