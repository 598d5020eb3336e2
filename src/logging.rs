use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use once_cell::sync::{Lazy, OnceCell};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{AppError, AppResult};

pub const ENV_FILTER: &str = "INVOICE_LEDGER_LOG";
pub const ENV_JSON: &str = "INVOICE_LEDGER_LOG_JSON";
pub const ENV_MAX_SIZE_BYTES: &str = "INVOICE_LEDGER_LOG_MAX_SIZE_BYTES";
pub const ENV_MAX_FILES: &str = "INVOICE_LEDGER_LOG_MAX_FILES";

pub const LOG_FILENAME: &str = "invoice-ledger.log";
const DEFAULT_FILTER: &str = "invoice_ledger=info";
const DEFAULT_MAX_SIZE_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 5;

static INIT: OnceCell<()> = OnceCell::new();
static FILE_SINK: Lazy<Mutex<Option<(NonBlocking, WorkerGuard)>>> = Lazy::new(|| Mutex::new(None));

/// Writer handed to the file layer. Discards output until a sink is
/// attached with [`init_file_logging`].
#[derive(Clone, Copy)]
struct FileSink;

enum SinkWriter {
    Active(NonBlocking),
    Idle,
}

impl io::Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SinkWriter::Active(writer) => writer.write(buf),
            SinkWriter::Idle => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SinkWriter::Active(writer) => writer.flush(),
            SinkWriter::Idle => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for FileSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FILE_SINK
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|(writer, _)| SinkWriter::Active(writer.clone())))
            .unwrap_or(SinkWriter::Idle)
    }
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).ok().as_deref(),
        Some("1" | "true" | "TRUE" | "yes" | "YES")
    )
}

/// Install the global subscriber: env filter, stdout layer and the (initially
/// idle) JSON file layer. Safe to call more than once.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_env(ENV_FILTER)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let (stdout_json, stdout_plain) = if env_flag(ENV_JSON) {
            (Some(fmt::layer().json().with_target(true)), None)
        } else {
            (None, Some(fmt::layer().with_target(true)))
        };
        let file_layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_current_span(false)
            .with_writer(FileSink);

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(stdout_json)
            .with(stdout_plain)
            .with(file_layer);

        let _ = tracing_log::LogTracer::init();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Attach a size-rotated file sink under `dir`. Returns the active log path.
pub fn init_file_logging(dir: &Path) -> AppResult<PathBuf> {
    fs::create_dir_all(dir).map_err(|err| AppError::from(err).at("create_log_dir", dir))?;

    let max_bytes = env::var(ENV_MAX_SIZE_BYTES)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_SIZE_BYTES);
    let max_files = env::var(ENV_MAX_FILES)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_FILES);

    let path = dir.join(LOG_FILENAME);
    let rotating = FileRotate::new(
        &path,
        AppendCount::new(max_files),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    let (writer, guard) = tracing_appender::non_blocking(rotating);

    let mut slot = FILE_SINK
        .lock()
        .map_err(|_| AppError::new("LOGGING/POISONED", "File log sink lock poisoned."))?;
    *slot = Some((writer, guard));
    drop(slot);

    tracing::info!(
        target: "invoice_ledger",
        event = "file_logging_ready",
        path = %path.display(),
        max_bytes,
        max_files
    );
    Ok(path)
}

/// Flush pending lines and detach the file sink.
pub fn flush_file_logs() {
    let taken = FILE_SINK.lock().ok().and_then(|mut slot| slot.take());
    drop(taken);
}
