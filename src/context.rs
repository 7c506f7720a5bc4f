use crate::config::OutputFormat;
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default bound for a single git query.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound for a single port-listing invocation.
pub const PORT_TIMEOUT: Duration = Duration::from_secs(2);

/// Source of the snapshot timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

/// The environment variables the pipeline reads, captured once.
#[derive(Debug, Clone, Default)]
pub struct HostEnv {
    /// `CCSL_CONFIG_DIR`
    pub config_dir: Option<PathBuf>,
    /// `XDG_CONFIG_HOME`
    pub xdg_config_home: Option<PathBuf>,
    pub home_dir: Option<PathBuf>,
    /// Platform application-data directory (used on Windows).
    pub app_data_dir: Option<PathBuf>,
    /// `NO_COLOR` is set to a non-empty value.
    pub no_color: bool,
}

impl HostEnv {
    pub fn from_process() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            config_dir: non_empty("CCSL_CONFIG_DIR").map(PathBuf::from),
            xdg_config_home: non_empty("XDG_CONFIG_HOME").map(PathBuf::from),
            home_dir: dirs::home_dir(),
            app_data_dir: dirs::config_dir(),
            no_color: non_empty("NO_COLOR").is_some(),
        }
    }
}

/// Everything a single run needs, built once in `main` and passed down.
#[derive(Clone)]
pub struct RunContext {
    pub config_root: PathBuf,
    pub no_color: bool,
    pub clock: Arc<dyn Clock>,
    pub git_timeout: Duration,
    pub port_timeout: Duration,
}

impl RunContext {
    pub fn new(config_root: PathBuf, env: &HostEnv) -> Self {
        Self {
            config_root,
            no_color: env.no_color,
            clock: Arc::new(SystemClock),
            git_timeout: GIT_TIMEOUT,
            port_timeout: PORT_TIMEOUT,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_git_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = timeout;
        self
    }

    /// Colors are used only when the config asks for them and `NO_COLOR` is unset.
    pub fn colors_enabled(&self, format: &OutputFormat) -> bool {
        format.colors && !self.no_color
    }
}
