use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::{AppError, AppResult};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (creating if needed) a store file and apply the connection pragmas.
pub fn open_connection(path: &Path) -> AppResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            tracing::error!(
                target: "invoice_ledger",
                event = "store_dir_create_failed",
                error = %err,
                path = %parent.display()
            );
            AppError::from(err).at("create_store_dir", parent)
        })?;
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )
    .map_err(|err| AppError::from(err).at("open_store", path))?;
    configure(&conn).map_err(|err| err.at("configure_store", path))?;
    log_effective_pragmas(&conn, path);
    Ok(conn)
}

/// In-memory store used by tests and dry runs.
pub fn open_in_memory() -> AppResult<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> AppResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

fn log_effective_pragmas(conn: &Connection, path: &Path) {
    let sqlite_ver: String = conn
        .query_row("select sqlite_version()", [], |row| row.get(0))
        .unwrap_or_else(|_| String::from("unknown"));
    let jm: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap_or_else(|_| String::from("unknown"));

    info!(
        target: "invoice_ledger",
        event = "store_open",
        path = %path.display(),
        sqlite_version = %sqlite_ver,
        journal_mode = %jm
    );

    if !jm.eq_ignore_ascii_case("wal") {
        warn!(
            target: "invoice_ledger",
            event = "store_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so
/// readers never observe a half-written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn sidecar(base: &Path, suffix: &str) -> PathBuf {
    let mut os = OsString::from(base.as_os_str());
    os.push(suffix);
    PathBuf::from(os)
}

/// Remove a store file together with its WAL sidecars. Missing files are fine.
pub fn remove_store_files(path: &Path) -> io::Result<()> {
    for candidate in [
        path.to_path_buf(),
        sidecar(path, "-wal"),
        sidecar(path, "-shm"),
    ] {
        match fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
