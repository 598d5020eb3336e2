use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rusqlite::{named_params, params, Connection, OptionalExtension, Row, ToSql};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{open_connection, open_in_memory, remove_store_files};
use crate::dedupe::{self, issuer_key};
use crate::migrate::apply_migrations;
use crate::model::{InvoiceRecord, Partition, StoredInvoice};
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const STORE_FILENAME: &str = "invoices.db";

const SELECT_COLUMNS: &str = "id, filename, invoice_date, year, month, company, \
     short_description, invoice_number, tax_id, net_amount, tax_percent, tax_amount, \
     gross_amount, currency, account, bank_account, payment_date, partial_payment, comment, \
     net_amount_default_currency, fee, has_attachments, created_at, updated_at";

// DD.MM.YYYY sorts by year, then month, then day.
const ORDER_BY_DATE: &str = "substr(invoice_date, 7, 4) DESC, substr(invoice_date, 4, 2) DESC, \
     substr(invoice_date, 1, 2) DESC, filename ASC";

const MUTABLE_ASSIGNMENTS: &str = "filename = :filename, invoice_date = :invoice_date, \
     company = :company, company_key = :company_key, short_description = :short_description, \
     invoice_number = :invoice_number, tax_id = :tax_id, net_amount = :net_amount, \
     tax_percent = :tax_percent, tax_amount = :tax_amount, gross_amount = :gross_amount, \
     currency = :currency, account = :account, bank_account = :bank_account, \
     payment_date = :payment_date, partial_payment = :partial_payment, comment = :comment, \
     net_amount_default_currency = :net_amount_default_currency, fee = :fee, \
     has_attachments = :has_attachments, updated_at = :updated_at";

/// Result of an update addressed by `(partition, filename)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    Updated,
    NoMatch,
}

/// The system of record for invoices.
pub struct InvoiceStore {
    conn: Connection,
    path: Option<PathBuf>,
    marker: Option<PathBuf>,
}

impl std::fmt::Debug for InvoiceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvoiceStore")
            .field("path", &self.path)
            .field("marker", &self.marker)
            .finish()
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<StoredInvoice> {
    let year: String = row.get("year")?;
    let month: String = row.get("month")?;
    let partition = Partition::from_fields(&year, &month).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("invalid partition {year}-{month}").into(),
        )
    })?;
    Ok(StoredInvoice {
        id: row.get("id")?,
        partition,
        record: InvoiceRecord {
            company: row.get("company")?,
            short_description: row.get("short_description")?,
            invoice_number: row.get("invoice_number")?,
            tax_id: row.get("tax_id")?,
            net_amount: row.get("net_amount")?,
            tax_percent: row.get("tax_percent")?,
            tax_amount: row.get("tax_amount")?,
            gross_amount: row.get("gross_amount")?,
            currency: row.get("currency")?,
            invoice_date: row.get("invoice_date")?,
            payment_date: row.get("payment_date")?,
            year,
            month,
            account: row.get("account")?,
            bank_account: row.get("bank_account")?,
            partial_payment: row.get("partial_payment")?,
            comment: row.get("comment")?,
            net_amount_default_currency: row.get("net_amount_default_currency")?,
            fee: row.get("fee")?,
            has_attachments: row.get("has_attachments")?,
            filename: row.get("filename")?,
        },
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl InvoiceStore {
    /// Open a store file, creating it and bringing its schema up to date.
    pub fn open(path: &Path) -> AppResult<Self> {
        let mut conn = open_connection(path)?;
        apply_migrations(&mut conn).map_err(|err| err.at("migrate_store", path))?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            marker: None,
        })
    }

    pub fn in_memory() -> AppResult<Self> {
        let mut conn = open_in_memory()?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn,
            path: None,
            marker: None,
        })
    }

    /// Associate the legacy-import marker so maintenance can reset it.
    pub fn with_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn insert(&self, partition: Partition, record: &InvoiceRecord) -> AppResult<i64> {
        let mut record = record.clone().normalized();
        record.assign_partition(partition);
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO invoices (filename, invoice_date, year, month, company, company_key, \
               short_description, invoice_number, tax_id, net_amount, tax_percent, tax_amount, \
               gross_amount, currency, account, bank_account, payment_date, partial_payment, \
               comment, net_amount_default_currency, fee, has_attachments, created_at, updated_at) \
             VALUES (:filename, :invoice_date, :year, :month, :company, :company_key, \
               :short_description, :invoice_number, :tax_id, :net_amount, :tax_percent, :tax_amount, \
               :gross_amount, :currency, :account, :bank_account, :payment_date, :partial_payment, \
               :comment, :net_amount_default_currency, :fee, :has_attachments, :created_at, :updated_at)",
            named_params! {
                ":filename": record.filename,
                ":invoice_date": record.invoice_date,
                ":year": record.year,
                ":month": record.month,
                ":company": record.company,
                ":company_key": issuer_key(&record.company),
                ":short_description": record.short_description,
                ":invoice_number": record.invoice_number,
                ":tax_id": record.tax_id,
                ":net_amount": record.net_amount,
                ":tax_percent": record.tax_percent,
                ":tax_amount": record.tax_amount,
                ":gross_amount": record.gross_amount,
                ":currency": record.currency,
                ":account": record.account,
                ":bank_account": record.bank_account,
                ":payment_date": record.payment_date,
                ":partial_payment": record.partial_payment,
                ":comment": record.comment,
                ":net_amount_default_currency": record.net_amount_default_currency,
                ":fee": record.fee,
                ":has_attachments": record.has_attachments,
                ":created_at": now,
                ":updated_at": now,
            },
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            target: "invoice_ledger",
            event = "invoice_inserted",
            id,
            partition = %partition,
            filename = %record.filename
        );
        Ok(id)
    }

    fn update_where(
        &self,
        clause: &str,
        key: &[(&str, &dyn ToSql)],
        record: &InvoiceRecord,
    ) -> AppResult<usize> {
        let record = record.clone().normalized();
        let company_key = issuer_key(&record.company);
        let now = now_ms();
        let sql = format!("UPDATE invoices SET {MUTABLE_ASSIGNMENTS} WHERE {clause}");
        let fields = named_params! {
            ":filename": record.filename,
            ":invoice_date": record.invoice_date,
            ":company": record.company,
            ":company_key": company_key,
            ":short_description": record.short_description,
            ":invoice_number": record.invoice_number,
            ":tax_id": record.tax_id,
            ":net_amount": record.net_amount,
            ":tax_percent": record.tax_percent,
            ":tax_amount": record.tax_amount,
            ":gross_amount": record.gross_amount,
            ":currency": record.currency,
            ":account": record.account,
            ":bank_account": record.bank_account,
            ":payment_date": record.payment_date,
            ":partial_payment": record.partial_payment,
            ":comment": record.comment,
            ":net_amount_default_currency": record.net_amount_default_currency,
            ":fee": record.fee,
            ":has_attachments": record.has_attachments,
            ":updated_at": now,
        };
        let mut values: Vec<(&str, &dyn ToSql)> = fields.to_vec();
        values.extend_from_slice(key);
        Ok(self.conn.execute(&sql, values.as_slice())?)
    }

    /// Replace every mutable field of the row stored as `old_filename` in
    /// `partition`. The row keeps its partition.
    pub fn update(
        &self,
        partition: Partition,
        old_filename: &str,
        record: &InvoiceRecord,
    ) -> AppResult<UpdateOutcome> {
        let year = partition.year_str();
        let month = partition.month_str();
        let affected = self.update_where(
            "year = :key_year AND month = :key_month AND filename = :key_filename",
            named_params! {
                ":key_year": year,
                ":key_month": month,
                ":key_filename": old_filename,
            },
            record,
        )?;
        if affected == 0 {
            warn!(
                target: "invoice_ledger",
                event = "invoice_update_no_match",
                partition = %partition,
                filename = %old_filename
            );
            return Ok(UpdateOutcome::NoMatch);
        }
        info!(
            target: "invoice_ledger",
            event = "invoice_updated",
            partition = %partition,
            filename = %record.filename,
            rows = affected
        );
        Ok(UpdateOutcome::Updated)
    }

    pub fn update_by_id(&self, id: i64, record: &InvoiceRecord) -> AppResult<()> {
        let affected = self.update_where("id = :key_id", named_params! { ":key_id": id }, record)?;
        if affected == 0 {
            return Err(AppError::not_found("Invoice no longer exists.").with_context("id", id.to_string()));
        }
        info!(target: "invoice_ledger", event = "invoice_updated", id, filename = %record.filename);
        Ok(())
    }

    pub fn delete(&self, partition: Partition, filename: &str) -> AppResult<()> {
        let affected = self.conn.execute(
            "DELETE FROM invoices WHERE year = ?1 AND month = ?2 AND filename = ?3",
            params![partition.year_str(), partition.month_str(), filename],
        )?;
        if affected == 0 {
            return Err(AppError::not_found("Invoice no longer exists.")
                .with_context("partition", partition.to_string())
                .with_context("filename", filename));
        }
        info!(
            target: "invoice_ledger",
            event = "invoice_deleted",
            partition = %partition,
            filename = %filename,
            rows = affected
        );
        Ok(())
    }

    pub fn delete_by_id(&self, id: i64) -> AppResult<()> {
        let affected = self
            .conn
            .execute("DELETE FROM invoices WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(AppError::not_found("Invoice no longer exists.").with_context("id", id.to_string()));
        }
        info!(target: "invoice_ledger", event = "invoice_deleted", id);
        Ok(())
    }

    pub fn get(&self, id: i64) -> AppResult<Option<StoredInvoice>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM invoices WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![id], map_row).optional()?)
    }

    /// Rows of one partition, newest invoice date first, then by filename.
    pub fn list(&self, partition: Partition) -> AppResult<Vec<StoredInvoice>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM invoices WHERE year = ?1 AND month = ?2 ORDER BY {ORDER_BY_DATE}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![partition.year_str(), partition.month_str()], map_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn list_all(&self) -> AppResult<Vec<StoredInvoice>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM invoices ORDER BY year DESC, month DESC, {ORDER_BY_DATE}"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_row)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn count(&self, partition: Partition) -> AppResult<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM invoices WHERE year = ?1 AND month = ?2",
            params![partition.year_str(), partition.month_str()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    /// Whether `candidate` collides with a stored row of `partition`.
    pub fn is_duplicate(&self, partition: Partition, candidate: &InvoiceRecord) -> AppResult<bool> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM invoices \
             WHERE year = ?1 AND month = ?2 AND invoice_number = ?3 AND invoice_date = ?4 \
               AND company_key = ?5"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                partition.year_str(),
                partition.month_str(),
                candidate.invoice_number,
                candidate.invoice_date,
                issuer_key(&candidate.company),
            ],
            map_row,
        )?;
        let existing: Vec<StoredInvoice> = rows.collect::<Result<_, _>>()?;
        Ok(dedupe::is_duplicate(
            existing.iter().map(|stored| &stored.record),
            candidate,
        ))
    }

    /// Drop all invoices and the migration history, recreate the schema and
    /// forget that the legacy import ran.
    pub fn wipe(&mut self) -> AppResult<()> {
        self.conn.execute_batch(
            "DROP TABLE IF EXISTS invoices;\n\
             DROP TABLE IF EXISTS schema_migrations;",
        )?;
        apply_migrations(&mut self.conn)?;
        if let Some(marker) = &self.marker {
            remove_if_exists(marker).map_err(|err| AppError::from(err).at("remove_marker", marker))?;
        }
        warn!(
            target: "invoice_ledger",
            event = "store_wiped",
            path = %self.path.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
        );
        Ok(())
    }

    /// Close the store and remove its file, sidecars and marker.
    pub fn delete_database(self) -> AppResult<()> {
        let InvoiceStore { conn, path, marker } = self;
        conn.close().map_err(|(_, err)| AppError::from(err))?;
        if let Some(path) = &path {
            remove_store_files(path).map_err(|err| AppError::from(err).at("delete_store", path))?;
        }
        if let Some(marker) = &marker {
            remove_if_exists(marker).map_err(|err| AppError::from(err).at("remove_marker", marker))?;
        }
        warn!(
            target: "invoice_ledger",
            event = "store_deleted",
            path = %path.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
        );
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
