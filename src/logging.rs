//! Log sink: stderr plus an optional size-rotating file.
//!
//! Each record is one line, `<timestamp> <pid> <LEVEL> <message>`. The pid is
//! read per record since it changes when the process detaches.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::dispatcher::DefaultGuard;
use tracing::level_filters::LevelFilter;
use tracing::{debug, Dispatch, Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use crate::error::{DaemonError, DaemonResult};

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Log file; `None` logs to the console only.
    pub file: Option<PathBuf>,
    /// Rotate once a record would bring the file to this many bytes; 0 never
    /// rotates.
    pub max_bytes: u64,
    /// Number of rotated files kept as `<file>.1` ... `<file>.N`.
    pub backups: u32,
    pub level: LevelFilter,
}

impl Default for LogOptions {
    fn default() -> Self {
        LogOptions {
            file: None,
            max_bytes: 0,
            backups: 0,
            level: LevelFilter::INFO,
        }
    }
}

/// Parses a level name or a numeric level.
///
/// Numbers follow the common 10/20/30/40/50 scale (debug, info, warning,
/// error, critical); anything below 10 enables trace.
pub fn parse_level(value: &str) -> Option<LevelFilter> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return Some(match n {
            i64::MIN..=9 => LevelFilter::TRACE,
            10..=19 => LevelFilter::DEBUG,
            20..=29 => LevelFilter::INFO,
            30..=39 => LevelFilter::WARN,
            _ => LevelFilter::ERROR,
        });
    }
    match value.to_ascii_lowercase().as_str() {
        "trace" | "notset" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "error" | "critical" | "fatal" => Some(LevelFilter::ERROR),
        "off" => Some(LevelFilter::OFF),
        _ => None,
    }
}

// =========================================================================
// Sink
// =========================================================================

/// A built log pipeline, ready to be installed.
pub struct LogSink {
    dispatch: Dispatch,
    file: Option<PathBuf>,
}

impl LogSink {
    /// Opens the log file (creating it) and builds the subscriber.
    pub fn open(options: &LogOptions) -> DaemonResult<Self> {
        let writer = match &options.file {
            Some(path) => {
                let file = RotatingFileWriter::new(path.clone(), options.max_bytes, options.backups)
                    .map_err(|e| {
                        DaemonError::Logging(format!("cannot open {}: {e}", path.display()))
                    })?;
                BoxMakeWriter::new(io::stderr.and(file))
            }
            None => BoxMakeWriter::new(io::stderr),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(options.level)
            .with_ansi(false)
            .event_format(RecordFormat)
            .with_writer(writer)
            .finish();

        Ok(LogSink {
            dispatch: Dispatch::new(subscriber),
            file: options.file.clone(),
        })
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

/// Owns the daemon's single log sink.
///
/// [`LogContext::init`] builds and installs the sink on the first call and
/// returns the same sink on later calls; it never rebuilds. The sink becomes
/// the default for the installing thread until the context is dropped, and is
/// offered as the process-wide default when none exists yet.
#[derive(Default)]
pub struct LogContext {
    sink: Option<LogSink>,
    _guard: Option<DefaultGuard>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, options: &LogOptions) -> DaemonResult<&LogSink> {
        if self.sink.is_none() {
            let sink = LogSink::open(options)?;
            let global = tracing::dispatcher::set_global_default(sink.dispatch.clone()).is_ok();
            self._guard = Some(tracing::dispatcher::set_default(&sink.dispatch));
            debug!(global, "logging initialized");
            self.sink = Some(sink);
        }
        self.sink
            .as_ref()
            .ok_or_else(|| DaemonError::Logging("log sink missing after init".into()))
    }

    pub fn is_initialized(&self) -> bool {
        self.sink.is_some()
    }

    pub fn sink(&self) -> Option<&LogSink> {
        self.sink.as_ref()
    }
}

// =========================================================================
// Record format
// =========================================================================

struct RecordFormat;

impl<S, N> FormatEvent<S, N> for RecordFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        SystemTime.format_time(&mut writer)?;
        write!(writer, " {} {} ", std::process::id(), event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// =========================================================================
// Rotating file
// =========================================================================

struct RotatingFileWriterInner {
    file: File,
    path: PathBuf,
    max_bytes: u64,
    backups: u32,
    size: u64,
}

/// Appends to a file, shifting it to `<file>.1` once `max_bytes` is reached.
#[derive(Clone)]
pub(crate) struct RotatingFileWriter {
    inner: Arc<Mutex<RotatingFileWriterInner>>,
}

impl RotatingFileWriter {
    pub(crate) fn new(path: PathBuf, max_bytes: u64, backups: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingFileWriterInner {
                file,
                path,
                max_bytes,
                backups,
                size,
            })),
        })
    }

    fn rotate_locked(inner: &mut RotatingFileWriterInner) -> io::Result<()> {
        for idx in (1..=inner.backups).rev() {
            let from = Self::rotated_path(&inner.path, idx - 1);
            let to = Self::rotated_path(&inner.path, idx);
            if from.exists() {
                let _ = std::fs::remove_file(&to);
                std::fs::rename(&from, &to)?;
            }
        }
        inner.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.path)?;
        inner.size = 0;
        Ok(())
    }

    fn rotated_path(path: &Path, idx: u32) -> PathBuf {
        if idx == 0 {
            return path.to_path_buf();
        }
        PathBuf::from(format!("{}.{}", path.display(), idx))
    }
}

pub(crate) struct RotatingFileWriterGuard {
    inner: Arc<Mutex<RotatingFileWriterInner>>,
}

// Each buffer handed over by the formatter is one whole record, so the
// rollover decision is made once per buffer and the buffer is never split
// across two files.
impl Write for RotatingFileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("rotating log writer mutex poisoned"))?;

        let rotates = inner.max_bytes > 0 && inner.backups > 0 && inner.size > 0;
        if rotates && inner.size.saturating_add(buf.len() as u64) >= inner.max_bytes {
            RotatingFileWriter::rotate_locked(&mut inner)?;
        }

        inner.file.write_all(buf)?;
        inner.size = inner.size.saturating_add(buf.len() as u64);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("rotating log writer mutex poisoned"))?;
        inner.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingFileWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};

    #[test]
    fn level_names_and_numbers() {
        assert_eq!(parse_level("info"), Some(LevelFilter::INFO));
        assert_eq!(parse_level("WARNING"), Some(LevelFilter::WARN));
        assert_eq!(parse_level("critical"), Some(LevelFilter::ERROR));
        assert_eq!(parse_level("10"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level("30"), Some(LevelFilter::WARN));
        assert_eq!(parse_level("50"), Some(LevelFilter::ERROR));
        assert_eq!(parse_level("5"), Some(LevelFilter::TRACE));
        assert_eq!(parse_level("verbose"), None);
    }

    #[test]
    fn records_carry_timestamp_pid_and_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.log");
        let sink = LogSink::open(&LogOptions {
            file: Some(path.clone()),
            ..LogOptions::default()
        })
        .unwrap();

        tracing::dispatcher::with_default(sink.dispatch(), || {
            info!("started");
            tracing::debug!("filtered out");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);

        let fields: Vec<&str> = lines[0].splitn(4, ' ').collect();
        assert_eq!(fields[1], std::process::id().to_string());
        assert_eq!(fields[2], "INFO");
        assert_eq!(fields[3], "started");
    }

    #[test]
    fn file_rotates_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.log");
        let writer = RotatingFileWriter::new(path.clone(), 10, 2).unwrap();

        for chunk in ["0123456789", "abcdefghij", "ABCDEFGHIJ", "zz"] {
            writer.make_writer().write_all(chunk.as_bytes()).unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "zz");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("d.log.1")).unwrap(),
            "ABCDEFGHIJ"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("d.log.2")).unwrap(),
            "abcdefghij"
        );
        assert!(!dir.path().join("d.log.3").exists());
    }

    #[test]
    fn file_rotates_when_record_reaches_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.log");
        let writer = RotatingFileWriter::new(path.clone(), 10, 1).unwrap();

        writer.make_writer().write_all(b"01234").unwrap();
        writer.make_writer().write_all(b"56789").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "56789");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("d.log.1")).unwrap(),
            "01234"
        );
    }

    #[test]
    fn oversized_record_stays_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.log");
        let writer = RotatingFileWriter::new(path.clone(), 4, 1).unwrap();

        writer.make_writer().write_all(b"ab").unwrap();
        writer.make_writer().write_all(b"0123456789").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0123456789");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("d.log.1")).unwrap(),
            "ab"
        );
    }

    #[test]
    fn file_records_are_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.log");
        let sink = LogSink::open(&LogOptions {
            file: Some(path.clone()),
            ..LogOptions::default()
        })
        .unwrap();

        tracing::dispatcher::with_default(sink.dispatch(), || {
            info!(pid = 42, "removing stale pidfile");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains('\x1b'), "escape codes in {contents:?}");
        assert!(contents.ends_with(" INFO removing stale pidfile pid=42\n"));
    }

    #[test]
    fn zero_size_never_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.log");
        let writer = RotatingFileWriter::new(path.clone(), 0, 5).unwrap();
        for _ in 0..4 {
            writer.make_writer().write_all(b"0123456789").unwrap();
        }
        assert_eq!(std::fs::read(&path).unwrap().len(), 40);
        assert!(!dir.path().join("d.log.1").exists());
    }

    #[test]
    fn context_initializes_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = LogOptions {
            file: Some(dir.path().join("first.log")),
            ..LogOptions::default()
        };
        let second = LogOptions {
            file: Some(dir.path().join("second.log")),
            ..LogOptions::default()
        };

        let mut ctx = LogContext::new();
        assert!(!ctx.is_initialized());
        ctx.init(&first).unwrap();
        let sink = ctx.init(&second).unwrap();
        assert_eq!(sink.file(), first.file.as_deref());
        assert!(!dir.path().join("second.log").exists());

        warn!("through the context");
        drop(ctx);
        let contents = std::fs::read_to_string(dir.path().join("first.log")).unwrap();
        assert!(contents.contains("WARN through the context"));
    }
}
