use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::columns::ColumnOrder;
use crate::model::Partition;
use crate::repo::STORE_FILENAME;
use crate::tabular::TABULAR_FILENAME;
use crate::template::{DecimalSeparator, DEFAULT_TEMPLATE};

pub const ENV_ROOT: &str = "INVOICE_LEDGER_ROOT";
pub const ENV_TEMPLATE: &str = "INVOICE_LEDGER_TEMPLATE";
pub const ENV_DECIMAL_SEPARATOR: &str = "INVOICE_LEDGER_DECIMAL_SEPARATOR";
pub const ENV_MONTH_SUBFOLDERS: &str = "INVOICE_LEDGER_MONTH_SUBFOLDERS";
pub const ENV_GLOBAL_DB: &str = "INVOICE_LEDGER_GLOBAL_DB";

pub const MARKER_FILENAME: &str = ".migrated";
const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_ACCOUNT: i64 = 2000;

/// Where the relational store lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreLocation {
    /// One store file per partition folder.
    #[default]
    PerFolder,
    Global { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub storage_root: PathBuf,
    pub use_month_subfolders: bool,
    pub naming_template: String,
    pub decimal_separator: DecimalSeparator,
    pub default_currency: String,
    pub default_account: i64,
    /// Canonical column identifiers; empty means default order.
    pub column_order: Vec<String>,
    pub store: StoreLocation,
    pub company_map_path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let storage_root = dirs::document_dir()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Invoices");
        Self {
            storage_root,
            use_month_subfolders: true,
            naming_template: DEFAULT_TEMPLATE.to_string(),
            decimal_separator: DecimalSeparator::default(),
            default_currency: DEFAULT_CURRENCY.to_string(),
            default_account: DEFAULT_ACCOUNT,
            column_order: Vec::new(),
            store: StoreLocation::default(),
            company_map_path: None,
        }
    }
}

impl LedgerConfig {
    /// Defaults overlaid with `INVOICE_LEDGER_*` variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|key| env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Values that do not parse are logged and
    /// ignored.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.trim().is_empty()) {
            self.storage_root = PathBuf::from(root);
        }
        if let Some(template) = lookup(ENV_TEMPLATE).filter(|v| !v.trim().is_empty()) {
            self.naming_template = template;
        }
        if let Some(raw) = lookup(ENV_DECIMAL_SEPARATOR) {
            match raw.parse::<DecimalSeparator>() {
                Ok(sep) => self.decimal_separator = sep,
                Err(reason) => warn!(
                    target: "invoice_ledger",
                    event = "config_value_ignored",
                    key = ENV_DECIMAL_SEPARATOR,
                    reason = %reason
                ),
            }
        }
        if let Some(raw) = lookup(ENV_MONTH_SUBFOLDERS) {
            match raw.trim() {
                "1" | "true" | "TRUE" | "yes" | "YES" => self.use_month_subfolders = true,
                "0" | "false" | "FALSE" | "no" | "NO" => self.use_month_subfolders = false,
                other => warn!(
                    target: "invoice_ledger",
                    event = "config_value_ignored",
                    key = ENV_MONTH_SUBFOLDERS,
                    value = %other
                ),
            }
        }
        if let Some(path) = lookup(ENV_GLOBAL_DB).filter(|v| !v.trim().is_empty()) {
            self.store = StoreLocation::Global {
                path: PathBuf::from(path),
            };
        }
        self
    }

    pub fn column_order(&self) -> ColumnOrder {
        ColumnOrder::from_ids(&self.column_order)
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout {
            root: self.storage_root.clone(),
            month_subfolders: self.use_month_subfolders,
            store: self.store.clone(),
        }
    }

    pub fn company_map_path(&self) -> PathBuf {
        self.company_map_path
            .clone()
            .unwrap_or_else(|| self.storage_root.join("company_accounts.json"))
    }
}

/// Resolves every on-disk location used by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    month_subfolders: bool,
    store: StoreLocation,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, month_subfolders: bool, store: StoreLocation) -> Self {
        Self {
            root: root.into(),
            month_subfolders,
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn month_subfolders(&self) -> bool {
        self.month_subfolders
    }

    pub fn store_location(&self) -> &StoreLocation {
        &self.store
    }

    pub fn partition_dir(&self, partition: Partition) -> PathBuf {
        if self.month_subfolders {
            self.root.join(partition.folder_name())
        } else {
            self.root.clone()
        }
    }

    pub fn tabular_path(&self, partition: Partition) -> PathBuf {
        self.partition_dir(partition).join(TABULAR_FILENAME)
    }

    pub fn store_path(&self, partition: Partition) -> PathBuf {
        match &self.store {
            StoreLocation::Global { path } => path.clone(),
            StoreLocation::PerFolder => self.partition_dir(partition).join(STORE_FILENAME),
        }
    }

    /// Next to a global store, else at the storage root.
    pub fn marker_path(&self) -> PathBuf {
        match &self.store {
            StoreLocation::Global { path } => path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .join(MARKER_FILENAME),
            StoreLocation::PerFolder => self.root.join(MARKER_FILENAME),
        }
    }
}
