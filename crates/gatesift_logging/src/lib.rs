//! Shared logging setup for gatesift binaries.
//!
//! Tracing output goes to a size-capped rolling file under the gatesift
//! home directory and, filtered, to stderr. The event stream a scan
//! emits for its consumer is separate from this; tracing is operator
//! telemetry only.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "gatesift=info,gatesift_protocol=info";
const MAX_LOG_FILES: usize = 4;
const MAX_LOG_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// Logging options for a gatesift binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
}

/// Initialize tracing with a rolling file writer and a stderr layer.
///
/// `RUST_LOG` overrides the file filter; the stderr layer shows only
/// warnings unless `verbose` is set, so scan event output on stdout
/// stays uncluttered.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("failed to ensure log directory")?;
    let file_writer = RollingWriter::open(log_dir, config.app_name)
        .with_context(|| format!("failed to open log file for {}", config.app_name))?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let stderr_filter = if config.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(stderr_filter),
        )
        .init();

    Ok(())
}

/// The gatesift home directory, `~/.gatesift` unless `GATESIFT_HOME` is set.
pub fn gatesift_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("GATESIFT_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gatesift")
}

/// The logs directory, `~/.gatesift/logs`.
pub fn logs_dir() -> PathBuf {
    gatesift_home().join("logs")
}

fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Appends to `<app>.log`, rotating to `<app>.log.1..N` past the size cap.
struct RollingAppender {
    dir: PathBuf,
    base_name: String,
    file: File,
    written: u64,
}

impl RollingAppender {
    fn open(dir: PathBuf, base_name: String) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{base_name}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        let mut appender = Self {
            dir,
            base_name,
            file,
            written,
        };
        if appender.written > MAX_LOG_FILE_SIZE {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{index}", self.base_name))
    }

    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let oldest = self.rotated_path(MAX_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..MAX_LOG_FILES - 1).rev() {
            let src = self.rotated_path(index);
            if src.exists() {
                fs::rename(&src, self.rotated_path(index + 1))?;
            }
        }
        let current = self.current_path();
        if current.exists() {
            fs::rename(&current, self.rotated_path(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct RollingWriter {
    inner: Arc<Mutex<RollingAppender>>,
}

impl RollingWriter {
    fn open(dir: PathBuf, base_name: &str) -> io::Result<Self> {
        let appender = RollingAppender::open(dir, sanitize_name(base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

struct RollingWriterGuard {
    inner: Arc<Mutex<RollingAppender>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for RollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
