//! `taskwatch.toml` loading, defaults and validation.

use crate::schedule::{ActionDecision, ScheduleEntry};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from taskwatch.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WatchConfig {
    pub processes: ProcessesConfig,
    pub tasks: TasksConfig,
    pub timing: TimingConfig,
    pub launcher: LauncherConfig,
    pub completion: CompletionConfig,
    pub shutdown: ShutdownConfig,
    pub status: StatusConfig,
}

/// Process-table names of the two monitored targets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessesConfig {
    pub primary: String,
    pub companion: String,
}

/// Scheduled-task names used to relaunch each target.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub primary: String,
    pub companion: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub check_interval_secs: u64,
    pub crash_timeout_secs: u64,
    pub action_wait_secs: u64,
}

/// Command used to trigger a scheduled task. `{task}` in `args` is replaced
/// with the task name.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CompletionConfig {
    pub default_action: ActionDecision,
    pub dry_run: bool,
    pub schedule: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub stop_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub path: PathBuf,
}

// --- Default implementations ---

impl Default for ProcessesConfig {
    fn default() -> Self {
        Self {
            primary: "BAAH.exe".to_string(),
            companion: "MuMuNxDevice.exe".to_string(),
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            primary: "Start BAAH".to_string(),
            companion: "Start MuMu".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 5,
            crash_timeout_secs: 600,
            action_wait_secs: 10,
        }
    }
}

impl Default for LauncherConfig {
    #[cfg(windows)]
    fn default() -> Self {
        Self {
            command: "schtasks".to_string(),
            args: vec!["/run".to_string(), "/tn".to_string(), "{task}".to_string()],
        }
    }

    #[cfg(target_os = "macos")]
    fn default() -> Self {
        Self {
            command: "launchctl".to_string(),
            args: vec!["start".to_string(), "{task}".to_string()],
        }
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    fn default() -> Self {
        Self {
            command: "systemctl".to_string(),
            args: vec![
                "--user".to_string(),
                "start".to_string(),
                "{task}".to_string(),
            ],
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_file: PathBuf::from("STOP"),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("taskwatch.status"),
        }
    }
}

impl TimingConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn crash_timeout(&self) -> Duration {
        Duration::from_secs(self.crash_timeout_secs)
    }

    pub fn action_wait(&self) -> Duration {
        Duration::from_secs(self.action_wait_secs)
    }
}

impl WatchConfig {
    /// Human-readable problems that would make a monitor run meaningless.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.processes.primary.trim().is_empty() {
            problems.push("processes.primary must not be empty".to_string());
        }
        if self.processes.companion.trim().is_empty() {
            problems.push("processes.companion must not be empty".to_string());
        }
        if !self.processes.primary.is_empty()
            && self
                .processes
                .primary
                .eq_ignore_ascii_case(&self.processes.companion)
        {
            problems.push("processes.primary and processes.companion must differ".to_string());
        }
        if self.timing.check_interval_secs == 0 {
            problems.push("timing.check_interval_secs must be at least 1".to_string());
        }
        if self.launcher.command.trim().is_empty() {
            problems.push("launcher.command must not be empty".to_string());
        }
        problems
    }
}

/// Errors that can occur while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load(path: &Path) -> Result<WatchConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(WatchConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}
