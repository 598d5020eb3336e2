use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::config::StorageLayout;
use crate::model::{InvoiceRecord, Partition};
use crate::repo::InvoiceStore;
use crate::tabular::TabularCodec;
use crate::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: usize,
}

/// Regenerate the tabular file for `partition` from the store. Always a full
/// rewrite, so running it again after a failure converges.
///
/// Without month subfolders every partition shares one file, which then
/// holds every stored row.
pub fn export_partition(
    store: &InvoiceStore,
    codec: &TabularCodec,
    layout: &StorageLayout,
    partition: Partition,
) -> AppResult<ExportReport> {
    let stored = if layout.month_subfolders() {
        store.list(partition)?
    } else {
        store.list_all()?
    };
    let records: Vec<InvoiceRecord> = stored.into_iter().map(|s| s.record).collect();
    let path = layout.tabular_path(partition);
    codec.rewrite(&path, &records)?;
    info!(
        target: "invoice_ledger",
        event = "partition_exported",
        partition = %partition,
        rows = records.len(),
        path = %path.display()
    );
    Ok(ExportReport {
        path,
        rows: records.len(),
    })
}
