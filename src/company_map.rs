use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::db::write_atomic;
use crate::dedupe::issuer_key;
use crate::{AppError, AppResult};

const LEGAL_SUFFIXES: [&str; 10] = [
    " gmbh", " ag", " kg", " ohg", " gbr", " ug", " e.k.", " ltd", " inc", " corp",
];

/// Lookup key for a company: issuer key minus one trailing legal form.
pub fn normalize_company(name: &str) -> String {
    let key = issuer_key(name);
    for suffix in LEGAL_SUFFIXES {
        if let Some(stripped) = key.strip_suffix(suffix) {
            return stripped.trim().to_string();
        }
    }
    key
}

/// Remembered company -> account assignments.
#[derive(Debug, Clone, Default)]
pub struct CompanyAccountMap {
    path: PathBuf,
    entries: BTreeMap<String, i64>,
}

impl CompanyAccountMap {
    /// Load from `path`; a missing file is an empty map.
    pub fn load(path: &Path) -> AppResult<Self> {
        let entries = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| AppError::from(err).at("parse_company_map", path))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(AppError::from(err).at("read_company_map", path)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, company: &str) -> Option<i64> {
        self.entries.get(&normalize_company(company)).copied()
    }

    pub fn set(&mut self, company: &str, account: i64) {
        self.entries.insert(normalize_company(company), account);
    }

    /// Remembered account, or `default` with `false`.
    pub fn suggest(&self, company: &str, default: i64) -> (i64, bool) {
        match self.get(company) {
            Some(account) => (account, true),
            None => (default, false),
        }
    }

    /// Rewrite the whole file.
    pub fn save(&self) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| AppError::from(err).at("create_config_dir", parent))?;
        }
        let json = serde_json::to_vec_pretty(&self.entries)?;
        write_atomic(&self.path, &json).map_err(|err| AppError::from(err).at("write_company_map", &self.path))?;
        info!(
            target: "invoice_ledger",
            event = "company_map_saved",
            entries = self.entries.len(),
            path = %self.path.display()
        );
        Ok(())
    }
}
