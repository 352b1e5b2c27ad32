use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset, Local};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

utils::configurable_constants! {

    /// Where logs go. Unset or empty logs to the console.
    ///
    /// If this path exists as a directory or ends with a path separator, a new log file named
    /// `<LOG_PREFIX>_<timestamp>_<pid>.log` is created inside it; otherwise it is the log file.
    ref LOG_DEST : Option<String> = None;

    /// "json" for json lines, anything else for text. Files default to json, the console to text.
    ref LOG_FORMAT : Option<String> = None;

    /// The base name of log files written into a log directory.
    ref LOG_PREFIX : String = "uploader".to_owned();
}

/// Default log levels. Override using the `RUST_LOG` env variable.
const DEFAULT_LOG_LEVEL_FILE: &str = "info";
const DEFAULT_LOG_LEVEL_CONSOLE: &str = "warn";

#[derive(Clone, Debug, PartialEq)]
pub enum LoggingMode {
    Directory(PathBuf),
    File(PathBuf),
    Console,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub logging_mode: LoggingMode,
    pub use_json: bool,
    pub version: String,
}

impl LoggingConfig {
    pub fn new(version: impl Into<String>) -> LoggingConfig {
        Self::from_values(LOG_DEST.as_deref(), LOG_FORMAT.as_deref(), version.into())
    }

    fn from_values(log_dest: Option<&str>, log_format: Option<&str>, version: String) -> LoggingConfig {
        let logging_mode = match log_dest.map(str::trim) {
            None | Some("") => LoggingMode::Console,
            Some(dest) => {
                let path = PathBuf::from(dest);
                if dest.ends_with('/') || dest.ends_with('\\') || path.is_dir() {
                    LoggingMode::Directory(path)
                } else {
                    LoggingMode::File(path)
                }
            },
        };

        let use_json = match log_format {
            Some(format) => format.trim().eq_ignore_ascii_case("json"),
            None => logging_mode != LoggingMode::Console,
        };

        Self {
            logging_mode,
            use_json,
            version,
        }
    }
}

/// Sets up the global subscriber. Should only be called once per process.
pub fn init_logging(cfg: LoggingConfig) {
    let maybe_log_file = match &cfg.logging_mode {
        LoggingMode::Directory(log_dir) => Some(log_file_in_dir(log_dir)),
        LoggingMode::File(path) => Some(path.clone()),
        LoggingMode::Console => None,
    };

    if let Some(log_file) = maybe_log_file {
        if let Err(e) = init_logging_to_file(&log_file, cfg.use_json) {
            init_logging_to_console(&cfg);
            error!("Error logging to file {log_file:?} ({e}); falling back to console logging.");
        }
    } else {
        init_logging_to_console(&cfg);
    }

    info!("{}, uploader {}", cfg.version, env!("CARGO_PKG_VERSION"));
}

fn init_logging_to_console(cfg: &LoggingConfig) {
    let fmt_layer_base = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .with_writer(std::io::stderr);
    let fmt_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL_CONSOLE))
        .unwrap_or_default();

    let registry = tracing_subscriber::registry();
    if cfg.use_json {
        registry.with(fmt_layer_base.json().with_filter(fmt_filter)).init();
    } else {
        registry.with(fmt_layer_base.pretty().with_filter(fmt_filter)).init();
    }
}

fn init_logging_to_file(path: &Path, use_json: bool) -> Result<(), std::io::Error> {
    use tracing_appender::{non_blocking, rolling};

    let (path, file_name) = match path.file_name() {
        Some(name) => (path.to_path_buf(), name.to_owned()),
        None => (path.join("uploader.log"), OsStr::new("uploader.log").to_owned()),
    };

    let log_directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            parent.to_path_buf()
        },
        _ => PathBuf::from("."),
    };

    // Fail here, before installing anything, if the location isn't writable.
    std::fs::write(&path, [])?;

    let file_appender = rolling::never(&log_directory, &file_name);
    let (writer, guard) = non_blocking(file_appender);

    // The worker stops flushing once its guard drops.
    static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
    let _ = FILE_GUARD.set(guard);

    let fmt_layer_base = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .with_writer(writer);
    let fmt_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL_FILE))
        .unwrap_or_default();

    let registry = tracing_subscriber::registry();
    if use_json {
        registry.with(fmt_layer_base.json().with_filter(fmt_filter)).init();
    } else {
        registry.with(fmt_layer_base.pretty().with_filter(fmt_filter)).init();
    }

    Ok(())
}

/// `<prefix>_<YYYYMMDD>T<HHMMSS><mmm><+/-HHMM>_<pid>.log` in `dir`, using local time.
pub fn log_file_in_dir(dir: impl AsRef<Path>) -> PathBuf {
    let now_local: DateTime<Local> = Local::now();
    let now_fixed: DateTime<FixedOffset> = now_local.with_timezone(now_local.offset());
    let ts = now_fixed.format("%Y%m%dT%H%M%S%3f%z");

    let filename = format!("{}_{}_{}.log", LOG_PREFIX.as_str(), ts, std::process::id());
    dir.as_ref().join(filename)
}
