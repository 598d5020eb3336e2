use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical external representation of invoice and payment dates.
pub const DATE_FORMAT: &str = "%d.%m.%Y";

pub const SHORT_DESCRIPTION_MAX_CHARS: usize = 80;

/// One invoice's metadata. Every attribute defaults to its empty value so
/// partially extracted drafts deserialize cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceRecord {
    pub company: String,
    pub short_description: String,
    pub invoice_number: String,
    pub tax_id: String,
    pub net_amount: f64,
    pub tax_percent: f64,
    pub tax_amount: f64,
    pub gross_amount: f64,
    pub currency: String,
    /// `DD.MM.YYYY`
    pub invoice_date: String,
    /// `DD.MM.YYYY`
    pub payment_date: String,
    pub year: String,
    pub month: String,
    pub account: i64,
    pub bank_account: String,
    pub partial_payment: bool,
    pub comment: String,
    /// Net amount in the default currency when `currency` differs from it.
    pub net_amount_default_currency: f64,
    pub fee: f64,
    pub has_attachments: bool,
    pub filename: String,
}

impl InvoiceRecord {
    /// Day segment of the invoice date; empty when the date is absent or not
    /// in `DD.MM.YYYY` shape.
    pub fn invoice_day(&self) -> &str {
        match split_date(&self.invoice_date) {
            Some((day, _, _)) => day,
            None => "",
        }
    }

    /// Year/month taken from the invoice date, used for filename templating.
    pub fn with_period_from_invoice_date(mut self) -> Self {
        if let Some((_, month, year)) = split_date(&self.invoice_date) {
            self.year = year.to_string();
            self.month = month.to_string();
        }
        self
    }

    /// Overwrite the stored year/month with the storage partition.
    pub fn assign_partition(&mut self, partition: Partition) {
        self.year = partition.year_str();
        self.month = partition.month_str();
    }

    /// Apply the field limits enforced on every write.
    pub fn normalized(mut self) -> Self {
        if self.short_description.chars().count() > SHORT_DESCRIPTION_MAX_CHARS {
            self.short_description = self
                .short_description
                .chars()
                .take(SHORT_DESCRIPTION_MAX_CHARS)
                .collect();
        }
        self
    }
}

fn split_date(date: &str) -> Option<(&str, &str, &str)> {
    let mut parts = date.split('.');
    let day = parts.next()?;
    let month = parts.next()?;
    let year = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((day, month, year))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionParseError {
    #[error("partition must look like YYYY-MM, got {0:?}")]
    Malformed(String),
    #[error("month {0} is outside 1..=12")]
    MonthOutOfRange(u32),
}

/// A `(year, month)` storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Partition {
    year: i32,
    month: u32,
}

impl Partition {
    pub fn new(year: i32, month: u32) -> Result<Self, PartitionParseError> {
        if !(1..=12).contains(&month) {
            return Err(PartitionParseError::MonthOutOfRange(month));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn year_str(&self) -> String {
        format!("{:04}", self.year)
    }

    pub fn month_str(&self) -> String {
        format!("{:02}", self.month)
    }

    /// `YYYY-MM`, also the partition folder name.
    pub fn folder_name(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn from_invoice_date(value: &str) -> Option<Self> {
        parse_date(value).map(Self::from_date)
    }

    /// Partition named by a record's stored year/month strings.
    pub fn from_fields(year: &str, month: &str) -> Option<Self> {
        let year = year.trim().parse::<i32>().ok()?;
        let month = month.trim().parse::<u32>().ok()?;
        Self::new(year, month).ok()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.folder_name())
    }
}

impl FromStr for Partition {
    type Err = PartitionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, month) = trimmed
            .split_once('-')
            .ok_or_else(|| PartitionParseError::Malformed(s.to_string()))?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(PartitionParseError::Malformed(s.to_string()));
        }
        let year = year
            .parse::<i32>()
            .map_err(|_| PartitionParseError::Malformed(s.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| PartitionParseError::Malformed(s.to_string()))?;
        Partition::new(year, month)
    }
}

impl TryFrom<String> for Partition {
    type Error = PartitionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Partition> for String {
    fn from(value: Partition) -> Self {
        value.folder_name()
    }
}

/// A record as held by the relational store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredInvoice {
    pub id: i64,
    pub partition: Partition,
    #[serde(flatten)]
    pub record: InvoiceRecord,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_comes_from_first_date_segment() {
        let record = InvoiceRecord {
            invoice_date: "15.03.2025".into(),
            ..Default::default()
        };
        assert_eq!(record.invoice_day(), "15");
    }

    #[test]
    fn malformed_dates_yield_empty_day() {
        for date in ["", "2025-03-15", "15.03", "1.2.3.4"] {
            let record = InvoiceRecord {
                invoice_date: date.into(),
                ..Default::default()
            };
            assert_eq!(record.invoice_day(), "", "date {date:?}");
        }
    }

    #[test]
    fn period_from_invoice_date_differs_from_partition() {
        let mut record = InvoiceRecord {
            invoice_date: "28.02.2025".into(),
            ..Default::default()
        }
        .with_period_from_invoice_date();
        assert_eq!((record.year.as_str(), record.month.as_str()), ("2025", "02"));

        record.assign_partition(Partition::new(2025, 3).unwrap());
        assert_eq!((record.year.as_str(), record.month.as_str()), ("2025", "03"));
    }

    #[test]
    fn short_description_is_capped() {
        let record = InvoiceRecord {
            short_description: "ä".repeat(120),
            ..Default::default()
        }
        .normalized();
        assert_eq!(record.short_description.chars().count(), 80);
    }

    #[test]
    fn partition_parses_and_formats() {
        let p: Partition = "2025-03".parse().unwrap();
        assert_eq!(p.year(), 2025);
        assert_eq!(p.month(), 3);
        assert_eq!(p.to_string(), "2025-03");
        assert_eq!("2025-3".parse::<Partition>().unwrap(), p);
        assert!(matches!(
            "2025-13".parse::<Partition>(),
            Err(PartitionParseError::MonthOutOfRange(13))
        ));
        assert!("march".parse::<Partition>().is_err());
        assert!("25-03".parse::<Partition>().is_err());
    }

    #[test]
    fn partition_from_record_fields_and_dates() {
        assert_eq!(
            Partition::from_fields("2024", "12"),
            Some(Partition::new(2024, 12).unwrap())
        );
        assert_eq!(Partition::from_fields("", "12"), None);
        assert_eq!(
            Partition::from_invoice_date("01.07.2023"),
            Some(Partition::new(2023, 7).unwrap())
        );
        assert_eq!(Partition::from_invoice_date("31.02.2023"), None);
    }
}
