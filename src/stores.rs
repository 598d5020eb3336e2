use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::StorageLayout;
use crate::model::Partition;
use crate::repo::InvoiceStore;
use crate::AppResult;

/// Lazily opened stores keyed by file, so a global store is opened once and
/// per-folder stores are created on first write to their partition.
#[derive(Debug)]
pub struct StoreSet {
    layout: StorageLayout,
    open: HashMap<PathBuf, InvoiceStore>,
}

impl StoreSet {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            open: HashMap::new(),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn for_partition(&mut self, partition: Partition) -> AppResult<&mut InvoiceStore> {
        let path = self.layout.store_path(partition);
        if !self.open.contains_key(&path) {
            let store = InvoiceStore::open(&path)?.with_marker(self.layout.marker_path());
            self.open.insert(path.clone(), store);
        }
        self.open
            .get_mut(&path)
            .ok_or_else(|| crate::AppError::new("LEDGER/STORE_UNAVAILABLE", "Store could not be opened."))
    }

    /// Close and forget the store backing `partition`.
    pub fn take(&mut self, partition: Partition) -> Option<InvoiceStore> {
        let path = self.layout.store_path(partition);
        self.open.remove(&path)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
