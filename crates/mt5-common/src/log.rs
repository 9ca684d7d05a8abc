//! Status log: one append-only stream written to a file and to stdout.
//!
//! Every line has the shape
//! `<YYYY-MM-DD HH:MM:SS> [<LEVEL>] [<originator>] <message>`.
//! There is no filtering; every call produces a line. The file is never
//! rotated or truncated here.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Severity tag of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// A step has started.
    Running,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Running => "RUNNING",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local wall-clock timestamp used as the line prefix.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render one status line (without the trailing newline).
pub fn format_line(timestamp: &str, level: Level, originator: &str, message: &str) -> String {
    format!("{timestamp} [{level}] [{originator}] {message}")
}

/// Sink for status lines.
///
/// Cheap to share by reference; writes are serialized through a mutex so
/// lines from concurrent callers never interleave.
pub struct Logger {
    file: Option<Mutex<File>>,
    stdout: bool,
}

impl Logger {
    /// Open (or create) `path` in append mode, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
            stdout: true,
        })
    }

    /// Like [`Logger::open`], but degrades to stdout-only when the file
    /// cannot be opened. The degradation itself is reported as a `WARN` line.
    pub fn open_or_stdout(path: &Path, originator: &str) -> Self {
        match Self::open(path) {
            Ok(logger) => logger,
            Err(e) => {
                let logger = Self::stdout();
                logger.log(
                    Level::Warn,
                    originator,
                    &format!("Log file {} unavailable, using stdout only: {e}", path.display()),
                );
                logger
            }
        }
    }

    /// A logger that only writes to stdout.
    pub fn stdout() -> Self {
        Self {
            file: None,
            stdout: true,
        }
    }

    /// Enable or disable the stdout copy (the file copy is unaffected).
    pub fn echo_stdout(mut self, enabled: bool) -> Self {
        self.stdout = enabled;
        self
    }

    /// Append one line to the file and stdout.
    ///
    /// Write failures are swallowed: losing a status line must never take
    /// the supervisor down.
    pub fn log(&self, level: Level, originator: &str, message: &str) {
        let line = format_line(&timestamp(), level, originator, message);

        if let Some(file) = &self.file
            && let Ok(mut f) = file.lock()
        {
            let _ = writeln!(f, "{line}");
        }

        if self.stdout {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{line}");
        }
    }
}

#[macro_export]
macro_rules! log_running {
    ($logger:expr, $tag:expr, $($arg:tt)*) => {
        $logger.log($crate::log::Level::Running, $tag, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $tag:expr, $($arg:tt)*) => {
        $logger.log($crate::log::Level::Info, $tag, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $tag:expr, $($arg:tt)*) => {
        $logger.log($crate::log::Level::Warn, $tag, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $tag:expr, $($arg:tt)*) => {
        $logger.log($crate::log::Level::Error, $tag, &format!($($arg)*))
    };
}
