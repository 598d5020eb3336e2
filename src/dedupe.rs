//! Duplicate detection over invoice records.
//!
//! Two records collide when issuer (case and whitespace insensitive), invoice
//! number, invoice date and partial-payment flag are equal and the gross
//! amounts differ by less than [`AMOUNT_TOLERANCE`]. Amounts reach us after
//! independent rounding in extraction and manual entry, so exact float
//! equality is never used.

use unicode_normalization::UnicodeNormalization;

use crate::model::InvoiceRecord;

pub const AMOUNT_TOLERANCE: f64 = 0.01;

pub fn amounts_match(a: f64, b: f64) -> bool {
    (a - b).abs() < AMOUNT_TOLERANCE
}

/// Comparison key for issuer names: NFC, lower case, single spaces, trimmed.
pub fn issuer_key(name: &str) -> String {
    let composed: String = name.nfc().collect::<String>().to_lowercase();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn same_invoice(existing: &InvoiceRecord, candidate: &InvoiceRecord) -> bool {
    existing.invoice_number == candidate.invoice_number
        && existing.invoice_date == candidate.invoice_date
        && existing.partial_payment == candidate.partial_payment
        && amounts_match(existing.gross_amount, candidate.gross_amount)
        && issuer_key(&existing.company) == issuer_key(&candidate.company)
}

pub fn is_duplicate<'a, I>(existing: I, candidate: &InvoiceRecord) -> bool
where
    I: IntoIterator<Item = &'a InvoiceRecord>,
{
    existing
        .into_iter()
        .any(|record| same_invoice(record, candidate))
}

/// Advisory check that `net + tax ≈ gross`. Never blocks a save.
pub fn check_consistency(record: &InvoiceRecord) -> bool {
    amounts_match(record.net_amount + record.tax_amount, record.gross_amount)
}
