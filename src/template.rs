use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::model::InvoiceRecord;
use crate::sanitize::sanitize_filename;

pub const DEFAULT_TEMPLATE: &str = "${YYYY}-${MM}-${DD}_${Company}_${GrossAmount}_${Currency}.pdf";

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").expect("static regex"));

/// Fraction separator used when amounts appear in filenames and previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecimalSeparator {
    #[default]
    #[serde(rename = ",")]
    Comma,
    #[serde(rename = ".")]
    Dot,
}

impl DecimalSeparator {
    pub const fn as_char(self) -> char {
        match self {
            DecimalSeparator::Comma => ',',
            DecimalSeparator::Dot => '.',
        }
    }
}

impl fmt::Display for DecimalSeparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for DecimalSeparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "," => Ok(DecimalSeparator::Comma),
            "." => Ok(DecimalSeparator::Dot),
            other => Err(format!("decimal separator must be ',' or '.', got {other:?}")),
        }
    }
}

/// Literal replacements applied to a template before token substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAliases {
    pairs: Vec<(String, String)>,
}

impl TokenAliases {
    pub fn new<I, A, C>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, C)>,
        A: Into<String>,
        C: Into<String>,
    {
        let mut pairs: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(a, c)| (a.into(), c.into()))
            .collect();
        // Longest alias first keeps substitution independent of input order.
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { pairs }
    }

    pub fn none() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn resolve(&self, template: &str) -> String {
        let mut out = template.to_string();
        for (alias, canonical) in &self.pairs {
            if out.contains(alias.as_str()) {
                out = out.replace(alias.as_str(), canonical);
            }
        }
        out
    }
}

impl Default for TokenAliases {
    /// The German token vocabulary of earlier releases.
    fn default() -> Self {
        Self::new([
            ("${Firma}", "${Company}"),
            ("${Rechnungsnummer}", "${InvoiceNumber}"),
            ("${Kurzbez}", "${ShortDescription}"),
            ("${Kurzbezeichnung}", "${ShortDescription}"),
            ("${BetragNetto}", "${NetAmount}"),
            ("${SteuersatzProzent}", "${TaxPercent}"),
            ("${Steuerbetrag}", "${TaxAmount}"),
            ("${Bruttobetrag}", "${GrossAmount}"),
            ("${Waehrung}", "${Currency}"),
            ("${Jahr}", "${YYYY}"),
            ("${Monat}", "${MM}"),
        ])
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub decimal_separator: DecimalSeparator,
    /// Substituted for `${OriginalName}`; empty when absent.
    pub original_name: Option<String>,
}

impl RenderOptions {
    pub fn with_separator(decimal_separator: DecimalSeparator) -> Self {
        Self {
            decimal_separator,
            original_name: None,
        }
    }
}

/// A naming template with its aliases already resolved. Rendering is pure
/// and allocation-light so it can run on every keystroke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    source: String,
    resolved: String,
}

impl FilenameTemplate {
    pub fn new(template: &str, aliases: &TokenAliases) -> Self {
        Self {
            source: template.to_string(),
            resolved: aliases.resolve(template),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn resolved(&self) -> &str {
        &self.resolved
    }

    pub fn render(&self, record: &InvoiceRecord, opts: &RenderOptions) -> String {
        let amount = |value: f64| {
            let formatted = format!("{value:.2}");
            match opts.decimal_separator {
                DecimalSeparator::Dot => formatted,
                DecimalSeparator::Comma => formatted.replacen('.', ",", 1),
            }
        };

        // Records that never had their period assigned fall back to the
        // invoice date.
        let dated;
        let period = if record.year.is_empty() && record.month.is_empty() {
            dated = record.clone().with_period_from_invoice_date();
            &dated
        } else {
            record
        };

        let substituted = TOKEN_RE.replace_all(&self.resolved, |caps: &Captures<'_>| {
            match caps.get(1).map(|m| m.as_str()).unwrap_or_default() {
                "YYYY" => period.year.clone(),
                "MM" => period.month.clone(),
                "DD" => record.invoice_day().to_string(),
                "Company" => record.company.clone(),
                "InvoiceNumber" => record.invoice_number.clone(),
                "ShortDescription" => record.short_description.clone(),
                "NetAmount" => amount(record.net_amount),
                "TaxPercent" => amount(record.tax_percent),
                "TaxAmount" => amount(record.tax_amount),
                "GrossAmount" => amount(record.gross_amount),
                "Currency" => record.currency.clone(),
                "OriginalName" => opts.original_name.clone().unwrap_or_default(),
                _ => String::new(),
            }
        });

        sanitize_filename(&substituted)
    }

    /// The name a document is filed under: the period always comes from the
    /// invoice date, never from the record's stored year/month.
    pub fn render_for_filing(&self, record: &InvoiceRecord, opts: &RenderOptions) -> String {
        self.render(&record.clone().with_period_from_invoice_date(), opts)
    }
}

impl Default for FilenameTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE, &TokenAliases::default())
    }
}

/// One-shot rendering with the default alias table.
pub fn render_filename(template: &str, record: &InvoiceRecord, separator: DecimalSeparator) -> String {
    FilenameTemplate::new(template, &TokenAliases::default())
        .render(record, &RenderOptions::with_separator(separator))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> InvoiceRecord {
        InvoiceRecord {
            company: "Acme GmbH".into(),
            invoice_number: "R-100".into(),
            invoice_date: "15.03.2025".into(),
            year: "2025".into(),
            month: "03".into(),
            net_amount: 100.0,
            tax_percent: 19.0,
            tax_amount: 19.0,
            gross_amount: 119.0,
            currency: "EUR".into(),
            ..Default::default()
        }
    }

    #[test]
    fn renders_default_template_with_dot() {
        let name = render_filename(DEFAULT_TEMPLATE, &acme(), DecimalSeparator::Dot);
        assert_eq!(name, "2025-03-15_Acme GmbH_119.00_EUR.pdf");
    }

    #[test]
    fn filing_name_takes_period_from_invoice_date() {
        let record = InvoiceRecord {
            month: "04".into(),
            ..acme()
        };
        let template = FilenameTemplate::default();
        let opts = RenderOptions::with_separator(DecimalSeparator::Dot);
        assert_eq!(template.render(&record, &opts), "2025-04-15_Acme GmbH_119.00_EUR.pdf");
        assert_eq!(
            template.render_for_filing(&record, &opts),
            "2025-03-15_Acme GmbH_119.00_EUR.pdf"
        );
    }

    #[test]
    fn comma_separator_only_affects_amounts() {
        let name = render_filename(
            "${YYYY}.${MM} ${NetAmount} ${TaxPercent}",
            &acme(),
            DecimalSeparator::Comma,
        );
        assert_eq!(name, "2025.03 100,00 19,00");
    }

    #[test]
    fn legacy_tokens_resolve_to_canonical() {
        let record = InvoiceRecord {
            short_description: "Hosting".into(),
            ..acme()
        };
        let name = render_filename(
            "${Jahr}${Monat}_${Firma}_${Rechnungsnummer}_${Kurzbez}_${Bruttobetrag}${Waehrung}",
            &record,
            DecimalSeparator::Comma,
        );
        assert_eq!(name, "202503_Acme GmbH_R-100_Hosting_119,00EUR");
    }

    #[test]
    fn unresolved_tokens_become_empty() {
        let name = render_filename("${Company}${Nope}-${OriginalName}.pdf", &acme(), DecimalSeparator::Dot);
        assert_eq!(name, "Acme GmbH-.pdf");
    }

    #[test]
    fn original_name_is_caller_supplied() {
        let template = FilenameTemplate::new("${OriginalName}_${DD}", &TokenAliases::default());
        let opts = RenderOptions {
            decimal_separator: DecimalSeparator::Dot,
            original_name: Some("scan".into()),
        };
        assert_eq!(template.render(&acme(), &opts), "scan_15");
    }

    #[test]
    fn values_are_sanitized() {
        let record = InvoiceRecord {
            company: "A/B: \"Tools\" | Co?".into(),
            ..acme()
        };
        let name = render_filename("${Company}  ${Currency}", &record, DecimalSeparator::Dot);
        assert_eq!(name, "A-B Tools Co EUR");
    }

    #[test]
    fn malformed_date_gives_empty_day_and_period_fallback() {
        let record = InvoiceRecord {
            invoice_date: "March 5th".into(),
            year: String::new(),
            month: String::new(),
            ..acme()
        };
        assert_eq!(
            render_filename("${YYYY}-${MM}-${DD}", &record, DecimalSeparator::Dot),
            "--"
        );

        let undated = InvoiceRecord {
            year: String::new(),
            month: String::new(),
            ..acme()
        };
        assert_eq!(
            render_filename("${YYYY}-${MM}-${DD}", &undated, DecimalSeparator::Dot),
            "2025-03-15"
        );
    }

    #[test]
    fn rendering_is_repeatable() {
        let template = FilenameTemplate::default();
        let opts = RenderOptions::default();
        let first = template.render(&acme(), &opts);
        let second = template.render(&acme(), &opts);
        assert_eq!(first, second);
    }

    #[test]
    fn separator_parses_from_settings_strings() {
        assert_eq!(",".parse::<DecimalSeparator>().unwrap(), DecimalSeparator::Comma);
        assert_eq!(".".parse::<DecimalSeparator>().unwrap(), DecimalSeparator::Dot);
        assert!(";".parse::<DecimalSeparator>().is_err());
    }
}
