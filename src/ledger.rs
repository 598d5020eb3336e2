//! The save/edit/delete workflows that tie the store, the document files and
//! the tabular export together.
//!
//! All mutations run under one lock. The store is authoritative: a failed
//! export after a committed mutation is logged and reported as a warning,
//! and the next export repairs the file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::company_map::CompanyAccountMap;
use crate::config::{LedgerConfig, StorageLayout};
use crate::dedupe::check_consistency;
use crate::export::{export_partition, ExportReport};
use crate::file_ops::{copy_file, move_file, remove_if_present, stage_file};
use crate::importer::{migrate_legacy_files, ImportReport};
use crate::model::{InvoiceRecord, Partition, StoredInvoice};
use crate::repo::{InvoiceStore, UpdateOutcome};
use crate::sanitize::{unique_filename, unique_filename_keeping, validate_component};
use crate::stores::StoreSet;
use crate::tabular::TabularCodec;
use crate::template::{FilenameTemplate, RenderOptions, TokenAliases};
use crate::{AppError, AppResult};

/// How a mutation addresses an existing invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceKey {
    Id(i64),
    Filename(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavePreview {
    pub filename: String,
    pub is_duplicate: bool,
    /// `net + tax` matches `gross`.
    pub consistent: bool,
}

#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub partition: Partition,
    pub record: InvoiceRecord,
    /// Document to file under the rendered name.
    pub source: PathBuf,
    /// Accept the record even when it collides with a stored one.
    pub confirm_duplicate: bool,
    /// Remember `record.account` for `record.company`.
    pub remember_account: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedInvoice {
    pub id: i64,
    pub partition: Partition,
    pub filename: String,
    pub path: PathBuf,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved(SavedInvoice),
    /// Nothing was written; ask the user and retry with `confirm_duplicate`.
    Duplicate { filename: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationReport {
    pub id: i64,
    pub partition: Partition,
    pub filename: String,
    pub warnings: Vec<String>,
}

pub struct Ledger {
    config: LedgerConfig,
    layout: StorageLayout,
    codec: TabularCodec,
    template: FilenameTemplate,
    stores: Mutex<StoreSet>,
    accounts: Mutex<CompanyAccountMap>,
}

impl Ledger {
    pub fn open(config: LedgerConfig) -> AppResult<Self> {
        Self::with_aliases(config, &TokenAliases::default())
    }

    pub fn with_aliases(config: LedgerConfig, aliases: &TokenAliases) -> AppResult<Self> {
        let layout = config.layout();
        let accounts = CompanyAccountMap::load(&config.company_map_path())?;
        let ledger = Self {
            codec: TabularCodec::new(config.column_order()),
            template: FilenameTemplate::new(&config.naming_template, aliases),
            stores: Mutex::new(StoreSet::new(layout.clone())),
            accounts: Mutex::new(accounts),
            layout,
            config,
        };
        info!(
            target: "invoice_ledger",
            event = "ledger_open",
            root = %ledger.layout.root().display(),
            month_subfolders = ledger.layout.month_subfolders()
        );
        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn codec(&self) -> &TabularCodec {
        &self.codec
    }

    fn stores(&self) -> MutexGuard<'_, StoreSet> {
        self.stores.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn accounts(&self) -> MutexGuard<'_, CompanyAccountMap> {
        self.accounts.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Filename for `record`. Pure, cheap enough for live previews. The
    /// period comes from the invoice date, not from the storage partition.
    pub fn render_filename(&self, record: &InvoiceRecord, original_name: Option<&str>) -> String {
        let opts = RenderOptions {
            decimal_separator: self.config.decimal_separator,
            original_name: original_name.map(str::to_string),
        };
        self.template.render_for_filing(record, &opts)
    }

    pub fn preview_save(
        &self,
        partition: Partition,
        record: &InvoiceRecord,
        source: Option<&Path>,
    ) -> AppResult<SavePreview> {
        let filename = self.render_filename(record, source.and_then(file_stem));
        let mut stores = self.stores();
        let is_duplicate = stores.for_partition(partition)?.is_duplicate(partition, record)?;
        Ok(SavePreview {
            filename,
            is_duplicate,
            consistent: check_consistency(record),
        })
    }

    /// Stage the document, commit the row, then give the document its final
    /// name. A failure before the commit puts the document back; a failure
    /// at the final rename removes the committed row again.
    pub fn save(&self, request: SaveRequest) -> AppResult<SaveOutcome> {
        let SaveRequest {
            partition,
            record,
            source,
            confirm_duplicate,
            remember_account,
        } = request;
        let mut record = record.normalized();
        let rendered = self.render_filename(&record, file_stem(&source));
        let rendered = validate_component(&rendered)?;

        let mut stores = self.stores();
        let store = stores.for_partition(partition)?;

        if !confirm_duplicate && store.is_duplicate(partition, &record)? {
            info!(
                target: "invoice_ledger",
                event = "save_refused_duplicate",
                partition = %partition,
                filename = %rendered
            );
            return Ok(SaveOutcome::Duplicate { filename: rendered });
        }

        let dir = self.layout.partition_dir(partition);
        let taken = stored_filenames(store, partition)?;
        let filename = unique_filename(&dir, &rendered, |name| taken.contains(name));
        let staged = stage_file(&source, &dir, &filename)?;

        record.filename = filename.clone();
        let id = match store.insert(partition, &record) {
            Ok(id) => id,
            Err(err) => {
                if let Err(rollback) = staged.rollback() {
                    error!(
                        target: "invoice_ledger",
                        event = "save_rollback_failed",
                        source = %source.display(),
                        error = %rollback
                    );
                }
                return Err(err);
            }
        };

        let target = dir.join(&filename);
        if let Err(err) = staged.finalize(&target) {
            if let Err(undo) = store.delete_by_id(id) {
                error!(target: "invoice_ledger", event = "save_row_undo_failed", id, error = %undo);
            }
            if let Err(rollback) = staged.rollback() {
                error!(
                    target: "invoice_ledger",
                    event = "save_rollback_failed",
                    source = %source.display(),
                    error = %rollback
                );
            }
            return Err(err);
        }

        let mut warnings = Vec::new();
        self.export_after_mutation(store, partition, &mut warnings);
        drop(stores);

        if remember_account && !record.company.trim().is_empty() {
            if let Err(err) = self.remember_account(&record.company, record.account) {
                warn!(target: "invoice_ledger", event = "company_map_save_failed", error = %err);
                warnings.push(err.to_string());
            }
        }

        info!(
            target: "invoice_ledger",
            event = "invoice_saved",
            id,
            partition = %partition,
            filename = %filename
        );
        Ok(SaveOutcome::Saved(SavedInvoice {
            id,
            partition,
            filename,
            path: target,
            warnings,
        }))
    }

    /// Apply edits. The document is renamed to the re-rendered filename
    /// before the row changes and renamed back if the row update fails. A
    /// document still referenced by another row is copied instead of moved.
    pub fn update_invoice(
        &self,
        partition: Partition,
        key: &InvoiceKey,
        record: InvoiceRecord,
    ) -> AppResult<MutationReport> {
        let mut stores = self.stores();
        let store = stores.for_partition(partition)?;
        let existing = resolve(store, partition, key)?;
        let partition = existing.partition;
        let old_name = existing.record.filename.clone();

        let mut record = record.normalized();
        let rendered = validate_component(&self.render_filename(&record, None))?;
        let dir = self.layout.partition_dir(partition);
        let old_path = dir.join(&old_name);

        let shared = filename_refs(store, partition, &old_name)? > 1;
        let mut taken = stored_filenames(store, partition)?;
        if !shared {
            taken.remove(&old_name);
        }
        let new_name = unique_filename_keeping(&dir, &rendered, &old_name, |name| taken.contains(name));

        let new_path = dir.join(&new_name);
        let relocated = if new_name == old_name {
            None
        } else if !old_path.exists() {
            warn!(
                target: "invoice_ledger",
                event = "update_document_missing",
                path = %old_path.display()
            );
            None
        } else if shared {
            copy_file(&old_path, &new_path)?;
            Some(Relocation::Copied)
        } else {
            move_file(&old_path, &new_path)?;
            Some(Relocation::Moved)
        };

        record.filename = new_name.clone();
        let outcome = match key {
            InvoiceKey::Id(_) => store.update_by_id(existing.id, &record),
            InvoiceKey::Filename(_) => match store.update(partition, &old_name, &record) {
                Ok(UpdateOutcome::Updated) => Ok(()),
                Ok(UpdateOutcome::NoMatch) => Err(AppError::not_found("Invoice no longer exists.")
                    .with_context("partition", partition.to_string())
                    .with_context("filename", old_name.clone())),
                Err(err) => Err(err),
            },
        };
        if let Err(err) = outcome {
            let undo = match relocated {
                Some(Relocation::Moved) => move_file(&new_path, &old_path),
                Some(Relocation::Copied) => remove_if_present(&new_path).map(|_| ()),
                None => Ok(()),
            };
            if let Err(undo) = undo {
                error!(
                    target: "invoice_ledger",
                    event = "update_rename_undo_failed",
                    path = %new_path.display(),
                    error = %undo
                );
            }
            return Err(err);
        }

        let mut warnings = Vec::new();
        self.export_after_mutation(store, partition, &mut warnings);
        Ok(MutationReport {
            id: existing.id,
            partition,
            filename: new_name,
            warnings,
        })
    }

    /// Remove the row, then the document. A document that is already gone
    /// is only a warning.
    pub fn delete_invoice(&self, partition: Partition, key: &InvoiceKey) -> AppResult<MutationReport> {
        let mut stores = self.stores();
        let store = stores.for_partition(partition)?;
        let existing = resolve(store, partition, key)?;
        let partition = existing.partition;
        let filename = existing.record.filename.clone();

        match key {
            InvoiceKey::Id(id) => store.delete_by_id(*id)?,
            InvoiceKey::Filename(name) => store.delete(partition, name)?,
        }

        let mut warnings = Vec::new();
        let path = self.layout.partition_dir(partition).join(&filename);
        if !filename.is_empty() && filename_refs(store, partition, &filename)? > 0 {
            warn!(
                target: "invoice_ledger",
                event = "delete_document_kept",
                path = %path.display()
            );
            warnings.push(format!(
                "{filename} is still referenced by another invoice and was kept"
            ));
        } else if !filename.is_empty() {
            match remove_if_present(&path) {
                Ok(true) => {}
                Ok(false) => warn!(
                    target: "invoice_ledger",
                    event = "delete_document_missing",
                    path = %path.display()
                ),
                Err(err) => {
                    warn!(
                        target: "invoice_ledger",
                        event = "delete_document_failed",
                        path = %path.display(),
                        error = %err
                    );
                    warnings.push(err.to_string());
                }
            }
        }

        self.export_after_mutation(store, partition, &mut warnings);
        Ok(MutationReport {
            id: existing.id,
            partition,
            filename,
            warnings,
        })
    }

    pub fn get(&self, partition: Partition, id: i64) -> AppResult<Option<StoredInvoice>> {
        let mut stores = self.stores();
        stores.for_partition(partition)?.get(id)
    }

    pub fn list(&self, partition: Partition) -> AppResult<Vec<StoredInvoice>> {
        let mut stores = self.stores();
        stores.for_partition(partition)?.list(partition)
    }

    pub fn is_duplicate(&self, partition: Partition, candidate: &InvoiceRecord) -> AppResult<bool> {
        let mut stores = self.stores();
        stores.for_partition(partition)?.is_duplicate(partition, candidate)
    }

    pub fn export(&self, partition: Partition) -> AppResult<ExportReport> {
        let mut stores = self.stores();
        let store = stores.for_partition(partition)?;
        export_partition(store, &self.codec, &self.layout, partition)
    }

    pub fn migrate(&self) -> AppResult<ImportReport> {
        let mut stores = self.stores();
        migrate_legacy_files(&mut stores, &self.codec)
    }

    /// Empty the store backing `partition` and forget the import marker. The tabular
    /// file is left alone so the next [`Ledger::migrate`] can reload it.
    pub fn wipe(&self, partition: Partition) -> AppResult<()> {
        let mut stores = self.stores();
        stores.for_partition(partition)?.wipe()
    }

    pub fn delete_database(&self, partition: Partition) -> AppResult<()> {
        let mut stores = self.stores();
        let store = match stores.take(partition) {
            Some(store) => store,
            None => InvoiceStore::open(&self.layout.store_path(partition))?
                .with_marker(self.layout.marker_path()),
        };
        store.delete_database()
    }

    pub fn suggest_account(&self, company: &str) -> (i64, bool) {
        self.accounts().suggest(company, self.config.default_account)
    }

    pub fn remember_account(&self, company: &str, account: i64) -> AppResult<()> {
        let mut accounts = self.accounts();
        accounts.set(company, account);
        accounts.save()
    }

    fn export_after_mutation(&self, store: &InvoiceStore, partition: Partition, warnings: &mut Vec<String>) {
        if let Err(err) = export_partition(store, &self.codec, &self.layout, partition) {
            warn!(
                target: "invoice_ledger",
                event = "export_after_mutation_failed",
                partition = %partition,
                error = %err
            );
            warnings.push(err.to_string());
        }
    }
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

/// How an edit relocated the document, so a failed row update can undo it.
enum Relocation {
    Moved,
    Copied,
}

fn filename_refs(store: &InvoiceStore, partition: Partition, filename: &str) -> AppResult<usize> {
    Ok(store
        .list(partition)?
        .iter()
        .filter(|stored| stored.record.filename == filename)
        .count())
}

fn stored_filenames(store: &InvoiceStore, partition: Partition) -> AppResult<HashSet<String>> {
    Ok(store
        .list(partition)?
        .into_iter()
        .map(|stored| stored.record.filename)
        .collect())
}

fn resolve(store: &InvoiceStore, partition: Partition, key: &InvoiceKey) -> AppResult<StoredInvoice> {
    let found = match key {
        InvoiceKey::Id(id) => store.get(*id)?,
        InvoiceKey::Filename(name) => store
            .list(partition)?
            .into_iter()
            .find(|stored| &stored.record.filename == name),
    };
    found.ok_or_else(|| {
        let err = AppError::not_found("Invoice no longer exists.").with_context("partition", partition.to_string());
        match key {
            InvoiceKey::Id(id) => err.with_context("id", id.to_string()),
            InvoiceKey::Filename(name) => err.with_context("filename", name.clone()),
        }
    })
}
