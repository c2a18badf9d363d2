//! File-backed logging for the scheduling engine.
//!
//! Messages append to `~/.stepflow/stepflow.log` once `init` has run; before
//! that they are dropped. The filter defaults to INFO, and `STEPFLOW_DEBUG=1`
//! lowers it to DEBUG at init time. Three levels cover what the engine emits:
//! WARN for step failures and recoverable trouble, INFO for workflow and step
//! lifecycle, DEBUG for dispatch traces.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Log levels for filtering messages. A message passes the filter when its
/// level is at or above the configured one (WARN is never filtered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Warn = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Initialize the log sink at `~/.stepflow/stepflow.log`.
///
/// The file is truncated on first init; subsequent calls are no-ops, so
/// embedders can call this from any entry point without clobbering the log.
pub fn init() {
    if LOG_PATH.get().is_some() {
        return;
    }

    let debug = std::env::var("STEPFLOW_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);
    let level = if debug { LogLevel::Debug } else { LogLevel::Info };
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if let Some(stepflow_dir) = dirs::home_dir().map(|h| h.join(".stepflow")) {
        let _ = std::fs::create_dir_all(&stepflow_dir);
        let path = stepflow_dir.join("stepflow.log");
        let _ = std::fs::write(&path, "");
        LOG_PATH.set(path).ok();
    }
}

fn log_at(level: LogLevel, msg: &str) {
    if (level as u8) > LOG_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

/// Log a message at INFO level.
pub fn log(msg: &str) {
    log_at(LogLevel::Info, msg);
}

/// Log a message at WARN level.
pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

/// Log a message at DEBUG level (dropped unless debug mode is enabled).
pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

/// Log macro for INFO level (convenience).
#[macro_export]
macro_rules! sflog {
    ($($arg:tt)*) => {
        $crate::log::log(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! sflog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level.
#[macro_export]
macro_rules! sflog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}
