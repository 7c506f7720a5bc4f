//! Diagnostic logging setup.
//!
//! stdout carries the status line, so logs only go to a file or to stderr,
//! and only when asked for.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_ENV: &str = "CCSL_LOG_LEVEL";
pub const LOG_FILE_ENV: &str = "CCSL_LOG_FILE";
pub const DEBUG_ENV: &str = "CCSL_DEBUG";

const DEFAULT_LEVEL: &str = "warn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Off,
    Stderr,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// An `EnvFilter` directive string.
    pub level: String,
    pub target: LogTarget,
}

impl LogSettings {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let debug = non_empty(DEBUG_ENV).is_some_and(|v| v.trim() == "1");

        let level = match non_empty(LOG_LEVEL_ENV) {
            Some(level) if debug => at_least_debug(level.trim()),
            Some(level) => level.trim().to_string(),
            None if debug => "debug".to_string(),
            None => DEFAULT_LEVEL.to_string(),
        };

        // A file wins over stderr so `CCSL_DEBUG` can raise the level of file logs too.
        let target = match non_empty(LOG_FILE_ENV) {
            Some(path) => LogTarget::File(PathBuf::from(path)),
            None if debug => LogTarget::Stderr,
            None => LogTarget::Off,
        };

        Self { level, target }
    }
}

/// Raise a directive string so nothing logs below `debug`. Per-target
/// directives stay as given and only the default level is raised.
fn at_least_debug(level: &str) -> String {
    match level.parse::<LevelFilter>() {
        Ok(parsed) if parsed > LevelFilter::DEBUG => level.to_string(),
        Ok(_) => "debug".to_string(),
        Err(_) => format!("debug,{level}"),
    }
}

/// Install the global subscriber. Failures are ignored: logging must never
/// cost the user their status line.
pub fn init(settings: &LogSettings) {
    let filter =
        EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL));

    match &settings.target {
        LogTarget::Off => {}
        LogTarget::Stderr => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init();
        }
        LogTarget::File(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let Ok(file) = OpenOptions::new().create(true).append(true).open(path) else {
                return;
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
    }
}
