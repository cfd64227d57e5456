//! File logger for orchestration diagnostics.
//!
//! Sessions run headless and print a JSON summary on stdout, so log lines
//! go to `~/.hive/hive.log` instead of stderr. Four levels: ERROR, WARN,
//! INFO, DEBUG. DEBUG is off unless the `--debug` flag or `HIVE_DEBUG=1`
//! is set.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Severity of one log line. Lower values are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        };
        f.write_str(tag)
    }
}

/// Point the logger at `~/.hive/hive.log`, truncating any previous run.
///
/// `debug` (the `--debug` flag) or `HIVE_DEBUG=1` raises the level from
/// INFO to DEBUG. Without a home directory, logging is a no-op.
pub fn init_with_debug(debug: bool) {
    let env_debug = std::env::var("HIVE_DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let level = if debug || env_debug {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if let Some(home) = dirs::home_dir() {
        let hive_dir = home.join(".hive");
        let _ = std::fs::create_dir_all(&hive_dir);
        let path = hive_dir.join("hive.log");
        let _ = std::fs::write(&path, "");
        LOG_PATH.set(path).ok();
    }
}

fn write_line(level: LogLevel, msg: &str) {
    if (level as u8) > LOG_LEVEL.load(Ordering::Relaxed) {
        return;
    }
    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level, msg);
        }
    }
}

/// Log at ERROR level.
pub fn error(msg: &str) {
    write_line(LogLevel::Error, msg);
}

/// Log at WARN level.
pub fn warn(msg: &str) {
    write_line(LogLevel::Warn, msg);
}

/// Log at INFO level.
pub fn log(msg: &str) {
    write_line(LogLevel::Info, msg);
}

/// Log at DEBUG level; dropped unless debug mode is on.
pub fn debug(msg: &str) {
    write_line(LogLevel::Debug, msg);
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! hlog {
    ($($arg:tt)*) => {
        $crate::log::log(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! hlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! hlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level.
#[macro_export]
macro_rules! hlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}
