use std::sync::OnceLock;

use crate::error::EditError;

/// Receives every log record as a JSON value.
pub type LogListener = Box<dyn Fn(&serde_json::Value) + Send + Sync>;

static LISTENER: OnceLock<LogListener> = OnceLock::new();

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Registers the listener that receives edit and bake log records.
///
/// Returns false when a listener was already registered.
pub fn init_logging(listener: LogListener) -> bool {
    if LISTENER.set(listener).is_err() {
        log::warn!("Logging system already initialized");
        return false;
    }
    true
}

/// Builds the JSON record delivered to the listener.
pub fn log_record(level: LogLevel, message: &str) -> serde_json::Value {
    serde_json::json!({
        "level": level.as_str(),
        "message": message,
        "timestamp": jiff::Zoned::now().to_string()
    })
}

/// Forwards an edit or bake message to the `log` facade under the `bonekit`
/// target, then to the registered listener.
pub fn send_log(level: LogLevel, message: &str) {
    log::log!(target: "bonekit", level.to_log(), "{message}");
    if let Some(listener) = LISTENER.get() {
        listener(&log_record(level, message));
    }
}

/// Logs a failed bone operation at error level, prefixed with the operation
/// name when one is given.
pub fn log_edit_error(error: &EditError, context: Option<&str>) {
    let message = match context {
        Some(ctx) => format!("{}: {}", ctx, error),
        None => error.to_string(),
    };

    send_log(LogLevel::Error, &message);
}

/// Debug record, used for per-bone detail such as renames.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Debug, &format!($($arg)*))
    };
}

/// Info record for command runs, bakes and scene saves.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Info, &format!($($arg)*))
    };
}

/// Warning record, such as a zero-length bone dropped on commit.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Warn, &format!($($arg)*))
    };
}

/// Error record for an operation that was cancelled.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Error, &format!($($arg)*))
    };
}

/// Logs the error of an edit operation result and passes the result through
/// unchanged.
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T> ResultExt<T, EditError> for Result<T, EditError> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_edit_error(error, context);
        }
        self
    }
}
