use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Closed set of logical invoice columns shared by the tabular export and the
/// table view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Filename,
    InvoiceDate,
    Year,
    Month,
    Company,
    ShortDescription,
    InvoiceNumber,
    NetAmount,
    TaxPercent,
    TaxAmount,
    GrossAmount,
    Currency,
    Account,
    BankAccount,
    PaymentDate,
    PartialPayment,
    Comment,
    NetAmountDefaultCurrency,
    Fee,
    HasAttachments,
    TaxId,
}

impl Column {
    /// Canonical default order. The first sixteen entries mirror the layout
    /// of headerless legacy files.
    pub const ALL: [Column; 21] = [
        Column::Filename,
        Column::InvoiceDate,
        Column::Year,
        Column::Month,
        Column::Company,
        Column::ShortDescription,
        Column::InvoiceNumber,
        Column::NetAmount,
        Column::TaxPercent,
        Column::TaxAmount,
        Column::GrossAmount,
        Column::Currency,
        Column::Account,
        Column::BankAccount,
        Column::PaymentDate,
        Column::PartialPayment,
        Column::Comment,
        Column::NetAmountDefaultCurrency,
        Column::Fee,
        Column::HasAttachments,
        Column::TaxId,
    ];

    pub const fn id(self) -> &'static str {
        match self {
            Column::Filename => "filename",
            Column::InvoiceDate => "invoice_date",
            Column::Year => "year",
            Column::Month => "month",
            Column::Company => "company",
            Column::ShortDescription => "short_description",
            Column::InvoiceNumber => "invoice_number",
            Column::NetAmount => "net_amount",
            Column::TaxPercent => "tax_percent",
            Column::TaxAmount => "tax_amount",
            Column::GrossAmount => "gross_amount",
            Column::Currency => "currency",
            Column::Account => "account",
            Column::BankAccount => "bank_account",
            Column::PaymentDate => "payment_date",
            Column::PartialPayment => "partial_payment",
            Column::Comment => "comment",
            Column::NetAmountDefaultCurrency => "net_amount_default_currency",
            Column::Fee => "fee",
            Column::HasAttachments => "has_attachments",
            Column::TaxId => "tax_id",
        }
    }

    /// Header names written by older releases.
    const fn legacy_ids(self) -> &'static [&'static str] {
        match self {
            Column::Filename => &["Dateiname"],
            Column::InvoiceDate => &["Rechnungsdatum"],
            Column::Year => &["Jahr"],
            Column::Month => &["Monat"],
            Column::Company => &["Firmenname", "Auftraggeber"],
            Column::ShortDescription => &["Kurzbezeichnung", "Verwendungszweck"],
            Column::InvoiceNumber => &["Rechnungsnummer"],
            Column::NetAmount => &["BetragNetto"],
            Column::TaxPercent => &["Steuersatz_Prozent"],
            Column::TaxAmount => &["Steuersatz_Betrag"],
            Column::GrossAmount => &["Bruttobetrag"],
            Column::Currency => &["Waehrung"],
            Column::Account => &["Gegenkonto"],
            Column::BankAccount => &["Bankkonto"],
            Column::PaymentDate => &["Bezahldatum"],
            Column::PartialPayment => &["Teilzahlung"],
            Column::Comment => &["Kommentar"],
            Column::NetAmountDefaultCurrency => &["BetragNetto_EUR"],
            Column::Fee => &["Gebuehr"],
            Column::HasAttachments => &["HatAnhaenge"],
            Column::TaxId => &["UStIdNr"],
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Column::Filename => "Filename",
            Column::InvoiceDate => "Invoice date",
            Column::Year => "Year",
            Column::Month => "Month",
            Column::Company => "Company",
            Column::ShortDescription => "Description",
            Column::InvoiceNumber => "Invoice no.",
            Column::NetAmount => "Net",
            Column::TaxPercent => "Tax %",
            Column::TaxAmount => "Tax",
            Column::GrossAmount => "Gross",
            Column::Currency => "Currency",
            Column::Account => "Account",
            Column::BankAccount => "Bank account",
            Column::PaymentDate => "Payment date",
            Column::PartialPayment => "Partial",
            Column::Comment => "Comment",
            Column::NetAmountDefaultCurrency => "Net (default currency)",
            Column::Fee => "Fee",
            Column::HasAttachments => "Attachments",
            Column::TaxId => "Tax ID",
        }
    }

    pub fn iter() -> impl Iterator<Item = Column> {
        Self::ALL.into_iter()
    }

    /// Resolve a header cell, accepting canonical and legacy identifiers.
    pub fn from_header(cell: &str) -> Option<Column> {
        let cell = cell.trim().trim_start_matches('\u{feff}');
        Self::iter().find(|col| col.id() == cell || col.legacy_ids().contains(&cell))
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown column identifier: {value}")]
pub struct ColumnParseError {
    pub value: String,
}

impl FromStr for Column {
    type Err = ColumnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::from_header(s).ok_or_else(|| ColumnParseError {
            value: s.to_string(),
        })
    }
}

/// A permutation of every known column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnOrder {
    columns: Vec<Column>,
}

impl Default for ColumnOrder {
    fn default() -> Self {
        Self {
            columns: Column::ALL.to_vec(),
        }
    }
}

impl ColumnOrder {
    /// Build from configured identifiers. Unknown identifiers and repeats are
    /// dropped; known columns not mentioned are appended in default order.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Self {
        let mut columns: Vec<Column> = Vec::with_capacity(Column::ALL.len());
        for id in ids {
            match id.as_ref().parse::<Column>() {
                Ok(col) if !columns.contains(&col) => columns.push(col),
                Ok(_) => {}
                Err(err) => warn!(
                    target: "invoice_ledger",
                    event = "column_order_unknown_column",
                    column = %err.value
                ),
            }
        }
        Self::complete(columns)
    }

    pub fn from_columns(columns: impl IntoIterator<Item = Column>) -> Self {
        let mut unique: Vec<Column> = Vec::with_capacity(Column::ALL.len());
        for col in columns {
            if !unique.contains(&col) {
                unique.push(col);
            }
        }
        Self::complete(unique)
    }

    fn complete(mut columns: Vec<Column>) -> Self {
        for col in Column::iter() {
            if !columns.contains(&col) {
                columns.push(col);
            }
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn header(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.id()).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.id().to_string()).collect()
    }
}
