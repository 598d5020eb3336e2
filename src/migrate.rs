use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::time::now_ms;
use crate::{AppError, AppResult};
use tracing::{error, info};

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let head: String = trimmed.chars().take(160).collect();
        format!("{head}…")
    } else {
        trimmed.to_string()
    }
}

static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202501010900_invoices.sql",
        include_str!("../migrations/202501010900_invoices.sql"),
    ),
    (
        "202501011000_company_key.sql",
        include_str!("../migrations/202501011000_company_key.sql"),
    ),
];

static ADD_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)").expect("static regex")
});

fn strip_comments(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, column],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Bring the invoice schema up to date. Already-applied files are verified
/// against their recorded checksum and skipped.
pub fn apply_migrations(conn: &mut Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )?;

    let applied: HashMap<String, String> = {
        let mut stmt = conn.prepare("SELECT version, checksum FROM schema_migrations")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = strip_comments(raw_sql);
        let sum = checksum(&cleaned);

        if let Some(stored) = applied.get(*filename) {
            if stored != &sum {
                return Err(AppError::new(
                    "MIGRATION/CHECKSUM_MISMATCH",
                    format!("migration {filename} edited after application"),
                )
                .with_context("file", *filename));
            }
            info!(target: "invoice_ledger", event = "migration_skip_file", file = %filename);
            continue;
        }

        let tx = conn.transaction()?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            let upper = s.to_ascii_uppercase();
            if upper == "BEGIN" || upper == "COMMIT" {
                continue;
            }
            if let Some(caps) = ADD_COLUMN_RE.captures(s) {
                let table = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let col = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                if column_exists(&tx, table, col)? {
                    info!(target: "invoice_ledger", event = "migration_stmt_skip", file = %filename, sql = %preview(s));
                    continue;
                }
            }
            info!(target: "invoice_ledger", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = tx.execute_batch(s) {
                error!(target: "invoice_ledger", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(AppError::from(e).with_context("file", *filename));
            }
        }

        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?1, ?2, ?3)",
            params![filename, now_ms(), sum],
        )?;
        tx.commit()?;
        info!(target: "invoice_ledger", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}

/// Latest applied migration, if any.
pub fn current_version(conn: &Connection) -> AppResult<Option<String>> {
    let version = conn
        .query_row(
            "SELECT version FROM schema_migrations ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}
