use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::cell::Cell;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::tabular::TABULAR_FILENAME;
use crate::{AppError, AppResult};

#[cfg(test)]
thread_local! {
    static FORCE_COPY_FALLBACK: Cell<bool> = const { Cell::new(false) };
}

#[cfg(test)]
pub fn __force_copy_fallback(value: bool) {
    FORCE_COPY_FALLBACK.with(|flag| flag.set(value));
}

fn staging_path_for(dir: &Path, final_name: &str) -> PathBuf {
    dir.join(format!(".{final_name}.partial"))
}

/// A document moved next to its final location under a hidden name,
/// waiting for the store row to commit.
#[derive(Debug)]
pub enum StagedFile {
    Renamed { source: PathBuf, staging: PathBuf },
    Copied { source: PathBuf, staging: PathBuf },
}

impl StagedFile {
    pub fn staging_path(&self) -> &Path {
        match self {
            StagedFile::Renamed { staging, .. } | StagedFile::Copied { staging, .. } => staging,
        }
    }

    /// Undo staging: the source is back where it was.
    pub fn rollback(self) -> AppResult<()> {
        match self {
            StagedFile::Renamed { source, staging } => {
                if staging.exists() {
                    fs::rename(&staging, &source)
                        .map_err(|err| AppError::from(err).at("file_stage_rollback_rename", &staging))?;
                }
            }
            StagedFile::Copied { staging, .. } => {
                if staging.exists() {
                    fs::remove_file(&staging)
                        .map_err(|err| AppError::from(err).at("file_stage_rollback_copy", &staging))?;
                }
            }
        }
        Ok(())
    }

    /// Give the staged file its final name. A leftover source after a copy
    /// is logged, the document itself is already in place. On failure the
    /// file is still staged and can be rolled back.
    pub fn finalize(&self, target: &Path) -> AppResult<()> {
        fs::rename(self.staging_path(), target)
            .map_err(|err| AppError::from(err).at("file_finalize", target))?;
        if let StagedFile::Copied { source, .. } = self {
            if let Err(err) = fs::remove_file(source) {
                warn!(
                    target: "invoice_ledger",
                    event = "file_source_left_behind",
                    path = %source.display(),
                    error = %err
                );
            }
        }
        Ok(())
    }
}

/// Move `source` into `dir` under a hidden staging name for `final_name`.
pub fn stage_file(source: &Path, dir: &Path, final_name: &str) -> AppResult<StagedFile> {
    fs::create_dir_all(dir).map_err(|err| AppError::from(err).at("create_partition_dir", dir))?;
    let staging = staging_path_for(dir, final_name);

    #[cfg(test)]
    if FORCE_COPY_FALLBACK.with(Cell::get) {
        return copy_stage(source, &staging, None);
    }

    match fs::rename(source, &staging) {
        Ok(()) => Ok(StagedFile::Renamed {
            source: source.to_path_buf(),
            staging,
        }),
        Err(rename_err) => copy_stage(source, &staging, Some(rename_err)),
    }
}

fn copy_stage(source: &Path, staging: &Path, rename_err: Option<io::Error>) -> AppResult<StagedFile> {
    if let Err(copy_err) = fs::copy(source, staging) {
        let err = match rename_err {
            Some(rename_err) => AppError::from(rename_err)
                .at("stage_file", source)
                .with_context("fallback_copy_error", copy_err.to_string()),
            None => AppError::from(copy_err).at("stage_file", source),
        };
        return Err(err);
    }
    verify_same_size(source, staging)?;
    debug!(
        target: "invoice_ledger",
        event = "file_stage_copied",
        source = %source.display(),
        staging = %staging.display()
    );
    Ok(StagedFile::Copied {
        source: source.to_path_buf(),
        staging: staging.to_path_buf(),
    })
}

fn verify_same_size(source: &Path, copy: &Path) -> AppResult<()> {
    let source_len = fs::metadata(source)
        .map_err(|err| AppError::from(err).at("metadata_source", source))?
        .len();
    let copy_len = fs::metadata(copy)
        .map_err(|err| AppError::from(err).at("metadata_stage", copy))?
        .len();
    if source_len != copy_len {
        let _ = fs::remove_file(copy);
        return Err(AppError::new(
            "IO/COPY_VERIFICATION_FAILED",
            "Cross-volume copy verification failed due to size mismatch.",
        )
        .with_context("path", copy.display().to_string()));
    }
    Ok(())
}

/// Rename, falling back to copy and remove across devices.
pub fn move_file(source: &Path, target: &Path) -> AppResult<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            fs::copy(source, target).map_err(|copy_err| {
                AppError::from(rename_err)
                    .at("move_file", source)
                    .with_context("fallback_copy_error", copy_err.to_string())
            })?;
            verify_same_size(source, target)?;
            fs::remove_file(source).map_err(|err| AppError::from(err).at("move_file_cleanup", source))
        }
    }
}

/// Copy `source` to `target` and check the sizes agree.
pub fn copy_file(source: &Path, target: &Path) -> AppResult<()> {
    fs::copy(source, target).map_err(|err| AppError::from(err).at("copy_file", source))?;
    verify_same_size(source, target)
}

/// `Ok(false)` when there was nothing to remove.
pub fn remove_if_present(path: &Path) -> AppResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(AppError::from(err).at("remove_file", path)),
    }
}

/// Every tabular file below `root`, matched case-insensitively. Unreadable
/// directories are logged and skipped.
pub fn find_tabular_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    target: "invoice_ledger",
                    event = "scan_entry_skipped",
                    error = %err
                );
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .file_name()
            .to_str()
            .map(|name| name.eq_ignore_ascii_case(TABULAR_FILENAME))
            .unwrap_or(false);
        if matches {
            found.push(entry.into_path());
        }
    }
    found.sort();
    found
}

/// Folder name of a file's parent directory, if any.
pub fn parent_folder_name(path: &Path) -> Option<&str> {
    path.parent()?.file_name().and_then(OsStr::to_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stage_then_finalize_moves_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("scan.pdf");
        fs::write(&source, b"pdf").unwrap();
        let target_dir = dir.path().join("2025-03");

        let staged = stage_file(&source, &target_dir, "a.pdf").unwrap();
        assert!(staged.staging_path().ends_with(".a.pdf.partial"));
        assert!(!source.exists());
        staged.finalize(&target_dir.join("a.pdf")).unwrap();
        assert_eq!(fs::read(target_dir.join("a.pdf")).unwrap(), b"pdf");
    }

    #[test]
    fn rollback_restores_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("scan.pdf");
        fs::write(&source, b"pdf").unwrap();
        let staged = stage_file(&source, &dir.path().join("2025-03"), "a.pdf").unwrap();
        staged.rollback().unwrap();
        assert_eq!(fs::read(&source).unwrap(), b"pdf");
    }

    #[test]
    fn copy_fallback_stages_and_cleans_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("scan.pdf");
        fs::write(&source, b"pdf").unwrap();
        let target_dir = dir.path().join("out");

        __force_copy_fallback(true);
        let staged = stage_file(&source, &target_dir, "a.pdf");
        __force_copy_fallback(false);
        let staged = staged.unwrap();

        assert!(matches!(staged, StagedFile::Copied { .. }));
        assert!(source.exists());
        staged.finalize(&target_dir.join("a.pdf")).unwrap();
        assert!(!source.exists());
        assert!(target_dir.join("a.pdf").exists());
    }

    #[test]
    fn finds_tabular_files_case_insensitively() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2024-12")).unwrap();
        fs::create_dir_all(dir.path().join("2025-01/nested")).unwrap();
        fs::write(dir.path().join("2024-12/invoices.csv"), b"").unwrap();
        fs::write(dir.path().join("2025-01/nested/INVOICES.CSV"), b"").unwrap();
        fs::write(dir.path().join("2025-01/other.csv"), b"").unwrap();

        let found = find_tabular_files(dir.path());
        assert_eq!(found.len(), 2);
        assert_eq!(parent_folder_name(&found[0]), Some("2024-12"));
    }

    #[test]
    fn copy_file_leaves_source_in_place() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.pdf");
        fs::write(&source, b"pdf").unwrap();
        copy_file(&source, &dir.path().join("b.pdf")).unwrap();
        assert_eq!(fs::read(&source).unwrap(), b"pdf");
        assert_eq!(fs::read(dir.path().join("b.pdf")).unwrap(), b"pdf");
    }

    #[test]
    fn remove_if_present_reports_absence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.pdf");
        assert!(!remove_if_present(&path).unwrap());
        fs::write(&path, b"x").unwrap();
        assert!(remove_if_present(&path).unwrap());
    }
}
