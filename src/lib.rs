//! Month-partitioned invoice records: SQLite as the system of record, a CSV
//! projection per partition, duplicate detection and filename templating.

pub mod columns;
pub mod company_map;
pub mod config;
pub mod db;
pub mod dedupe;
mod error;
pub mod export;
pub mod file_ops;
pub mod importer;
pub mod ledger;
mod logging;
pub mod migrate;
pub mod model;
pub mod repo;
pub mod sanitize;
pub mod stores;
pub mod tabular;
pub mod template;
pub mod time;

pub use error::{AppError, AppResult};
pub use logging::{flush_file_logs, init_file_logging, init_logging};

pub use columns::{Column, ColumnOrder};
pub use config::{LedgerConfig, StorageLayout, StoreLocation};
pub use ledger::{InvoiceKey, Ledger, MutationReport, SaveOutcome, SavePreview, SaveRequest, SavedInvoice};
pub use model::{InvoiceRecord, Partition, StoredInvoice};
pub use repo::{InvoiceStore, UpdateOutcome};
pub use tabular::TabularCodec;
pub use template::{DecimalSeparator, FilenameTemplate, RenderOptions, TokenAliases};
