//! Column-order aware CSV projection of a partition's invoices.
//!
//! The file is a generated artifact: the store is authoritative and the whole
//! file can be regenerated at any time. Loading is lenient per cell but a
//! structurally broken file fails the call.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{debug, info};

use crate::columns::{Column, ColumnOrder};
use crate::db::write_atomic;
use crate::model::InvoiceRecord;
use crate::{AppError, AppResult};

pub const TABULAR_FILENAME: &str = "invoices.csv";

#[derive(Debug, Clone, Default)]
pub struct TabularCodec {
    order: ColumnOrder,
}

impl TabularCodec {
    pub fn new(order: ColumnOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &ColumnOrder {
        &self.order
    }

    /// Read every record. A missing file is an empty partition.
    pub fn load(&self, path: &Path) -> AppResult<Vec<InvoiceRecord>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(AppError::from(err).at("read_tabular", path)),
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());
        let rows: Vec<StringRecord> = reader
            .records()
            .collect::<Result<_, _>>()
            .map_err(|err| AppError::from(err).at("parse_tabular", path))?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };

        let header: Vec<Option<Column>> = first.iter().map(Column::from_header).collect();
        let (layout, body) = if header.iter().any(Option::is_some) {
            (header, &rows[1..])
        } else {
            debug!(
                target: "invoice_ledger",
                event = "tabular_headerless",
                path = %path.display()
            );
            let default: Vec<Option<Column>> = Column::iter().map(Some).collect();
            (default, &rows[..])
        };

        let records: Vec<InvoiceRecord> = body
            .iter()
            .filter(|row| row.iter().any(|cell| !cell.is_empty()))
            .map(|row| {
                let mut record = InvoiceRecord::default();
                for (cell, column) in row.iter().zip(layout.iter()) {
                    if let Some(column) = column {
                        apply_cell(&mut record, *column, cell);
                    }
                }
                record
            })
            .collect();

        debug!(
            target: "invoice_ledger",
            event = "tabular_loaded",
            path = %path.display(),
            rows = records.len()
        );
        Ok(records)
    }

    /// Append one record, creating the file with a header or migrating an
    /// existing file to the configured column order first.
    pub fn append(&self, path: &Path, record: &InvoiceRecord) -> AppResult<()> {
        if !self.header_matches(path)? {
            let existing = self.load(path)?;
            info!(
                target: "invoice_ledger",
                event = "tabular_header_migrated",
                path = %path.display(),
                rows = existing.len()
            );
            self.rewrite(path, &existing)?;
        }

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|err| AppError::from(err).at("append_tabular", path))?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(self.row(record))
            .map_err(|err| AppError::from(err).at("append_tabular", path))?;
        writer
            .flush()
            .map_err(|err| AppError::from(err).at("append_tabular", path))?;
        Ok(())
    }

    /// Replace the file with a header and one row per record.
    pub fn rewrite(&self, path: &Path, records: &[InvoiceRecord]) -> AppResult<()> {
        let bytes = self.encode(records)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| AppError::from(err).at("create_partition_dir", parent))?;
        }
        write_atomic(path, &bytes).map_err(|err| AppError::from(err).at("rewrite_tabular", path))?;
        debug!(
            target: "invoice_ledger",
            event = "tabular_rewritten",
            path = %path.display(),
            rows = records.len()
        );
        Ok(())
    }

    pub fn encode(&self, records: &[InvoiceRecord]) -> AppResult<Vec<u8>> {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.write_record(self.order.header())?;
        for record in records {
            writer.write_record(self.row(record))?;
        }
        writer
            .into_inner()
            .map_err(|err| AppError::from(err.into_error()))
    }

    fn row(&self, record: &InvoiceRecord) -> Vec<String> {
        self.order
            .columns()
            .iter()
            .map(|column| format_cell(record, *column))
            .collect()
    }

    /// False when the file is missing, empty, or laid out differently.
    fn header_matches(&self, path: &Path) -> AppResult<bool> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(AppError::from(err).at("read_tabular", path)),
        };
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());
        let mut first = StringRecord::new();
        let has_row = reader
            .read_record(&mut first)
            .map_err(|err| AppError::from(err).at("parse_tabular", path))?;
        Ok(has_row && first.iter().eq(self.order.header()))
    }
}

/// Wire representation of one cell: amounts with two decimals and `.`,
/// booleans as `true`/`false`.
pub fn format_cell(record: &InvoiceRecord, column: Column) -> String {
    let amount = |value: f64| format!("{value:.2}");
    match column {
        Column::Filename => record.filename.clone(),
        Column::InvoiceDate => record.invoice_date.clone(),
        Column::Year => record.year.clone(),
        Column::Month => record.month.clone(),
        Column::Company => record.company.clone(),
        Column::ShortDescription => record.short_description.clone(),
        Column::InvoiceNumber => record.invoice_number.clone(),
        Column::NetAmount => amount(record.net_amount),
        Column::TaxPercent => amount(record.tax_percent),
        Column::TaxAmount => amount(record.tax_amount),
        Column::GrossAmount => amount(record.gross_amount),
        Column::Currency => record.currency.clone(),
        Column::Account => record.account.to_string(),
        Column::BankAccount => record.bank_account.clone(),
        Column::PaymentDate => record.payment_date.clone(),
        Column::PartialPayment => record.partial_payment.to_string(),
        Column::Comment => record.comment.clone(),
        Column::NetAmountDefaultCurrency => amount(record.net_amount_default_currency),
        Column::Fee => amount(record.fee),
        Column::HasAttachments => record.has_attachments.to_string(),
        Column::TaxId => record.tax_id.clone(),
    }
}

pub fn apply_cell(record: &mut InvoiceRecord, column: Column, cell: &str) {
    match column {
        Column::Filename => record.filename = cell.to_string(),
        Column::InvoiceDate => record.invoice_date = cell.to_string(),
        Column::Year => record.year = cell.to_string(),
        Column::Month => record.month = cell.to_string(),
        Column::Company => record.company = cell.to_string(),
        Column::ShortDescription => record.short_description = cell.to_string(),
        Column::InvoiceNumber => record.invoice_number = cell.to_string(),
        Column::NetAmount => record.net_amount = parse_amount(cell),
        Column::TaxPercent => record.tax_percent = parse_amount(cell),
        Column::TaxAmount => record.tax_amount = parse_amount(cell),
        Column::GrossAmount => record.gross_amount = parse_amount(cell),
        Column::Currency => record.currency = cell.to_string(),
        Column::Account => record.account = parse_int(cell),
        Column::BankAccount => record.bank_account = cell.to_string(),
        Column::PaymentDate => record.payment_date = cell.to_string(),
        Column::PartialPayment => record.partial_payment = parse_flag(cell),
        Column::Comment => record.comment = cell.to_string(),
        Column::NetAmountDefaultCurrency => record.net_amount_default_currency = parse_amount(cell),
        Column::Fee => record.fee = parse_amount(cell),
        Column::HasAttachments => record.has_attachments = parse_flag(cell),
        Column::TaxId => record.tax_id = cell.to_string(),
    }
}

/// Accepts `.` or a single `,` as separator; anything else is `0.0`.
pub fn parse_amount(cell: &str) -> f64 {
    let cell = cell.trim();
    cell.parse::<f64>()
        .or_else(|_| cell.replace(',', ".").parse::<f64>())
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn parse_int(cell: &str) -> i64 {
    cell.trim().parse().unwrap_or(0)
}

pub fn parse_flag(cell: &str) -> bool {
    matches!(cell.trim(), "1" | "t" | "T" | "true" | "TRUE" | "True")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(number: &str) -> InvoiceRecord {
        InvoiceRecord {
            filename: format!("{number}.pdf"),
            company: "Acme, Inc.".into(),
            invoice_number: number.into(),
            invoice_date: "15.03.2025".into(),
            year: "2025".into(),
            month: "03".into(),
            net_amount: 100.0,
            tax_percent: 19.0,
            tax_amount: 19.0,
            gross_amount: 119.0,
            currency: "EUR".into(),
            account: 4930,
            partial_payment: true,
            comment: "line one\nline two".into(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let codec = TabularCodec::default();
        assert!(codec.load(&dir.path().join("nope.csv")).unwrap().is_empty());
    }

    #[test]
    fn rewrite_then_load_preserves_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TABULAR_FILENAME);
        let codec = TabularCodec::default();
        let records = vec![sample("R-1"), sample("R-2")];
        codec.rewrite(&path, &records).unwrap();
        assert_eq!(codec.load(&path).unwrap(), records);
    }

    #[test]
    fn cells_use_wire_format() {
        let record = sample("R-1");
        assert_eq!(format_cell(&record, Column::GrossAmount), "119.00");
        assert_eq!(format_cell(&record, Column::PartialPayment), "true");
        assert_eq!(format_cell(&record, Column::HasAttachments), "false");
    }

    #[test]
    fn malformed_cells_degrade_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TABULAR_FILENAME);
        fs::write(
            &path,
            "invoice_number,gross_amount,account,partial_payment,unknown\n\
             R-1,12x,abc,maybe,zzz\n\
             R-2,\"119,50\",4930,TRUE\n",
        )
        .unwrap();
        let rows = TabularCodec::default().load(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].gross_amount, 0.0);
        assert_eq!(rows[0].account, 0);
        assert!(!rows[0].partial_payment);
        assert_eq!(rows[1].gross_amount, 119.5);
        assert_eq!(rows[1].account, 4930);
        assert!(rows[1].partial_payment);
        assert_eq!(rows[1].company, "");
    }

    #[test]
    fn headerless_file_uses_default_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TABULAR_FILENAME);
        fs::write(
            &path,
            "a.pdf,15.03.2025,2025,03,Acme GmbH,Hosting,R-100,100.00,19.00,19.00,119.00,EUR,4930,DE00,,false\n",
        )
        .unwrap();
        let rows = TabularCodec::default().load(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].filename, "a.pdf");
        assert_eq!(rows[0].company, "Acme GmbH");
        assert_eq!(rows[0].gross_amount, 119.0);
        assert_eq!(rows[0].bank_account, "DE00");
    }

    #[test]
    fn legacy_german_header_is_understood() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TABULAR_FILENAME);
        fs::write(
            &path,
            "Dateiname,Firmenname,Bruttobetrag,Teilzahlung\nb.pdf,Müller KG,59.90,false\n",
        )
        .unwrap();
        let rows = TabularCodec::default().load(&path).unwrap();
        assert_eq!(rows[0].filename, "b.pdf");
        assert_eq!(rows[0].company, "Müller KG");
        assert_eq!(rows[0].gross_amount, 59.9);
    }

    #[test]
    fn append_creates_file_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TABULAR_FILENAME);
        let codec = TabularCodec::default();
        codec.append(&path, &sample("R-1")).unwrap();
        codec.append(&path, &sample("R-2")).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("filename,invoice_date,year,month,company"));
        assert_eq!(text.matches("filename,").count(), 1);
        assert_eq!(codec.load(&path).unwrap().len(), 2);
    }

    #[test]
    fn append_migrates_header_to_new_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(TABULAR_FILENAME);
        TabularCodec::default()
            .rewrite(&path, &[sample("R-1")])
            .unwrap();

        let reordered = TabularCodec::new(ColumnOrder::from_ids(&["gross_amount", "company"]));
        reordered.append(&path, &sample("R-2")).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("gross_amount,company,filename"));
        let rows = reordered.load(&path).unwrap();
        assert_eq!(rows, vec![sample("R-1"), sample("R-2")]);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        for yes in ["1", "t", "T", "true", "TRUE", "True", " true "] {
            assert!(parse_flag(yes), "{yes}");
        }
        for no in ["0", "f", "false", "", "yes", "ja"] {
            assert!(!parse_flag(no), "{no}");
        }
    }
}
