//! Status file: writes `taskwatch.status` as JSON on every monitor update.
//!
//! Uses atomic write pattern: write to temp file then rename.

use crate::monitor::{MonitorSnapshot, MonitorState};
use crate::schedule::ActionDecision;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// States written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Starting,
    Protective,
    Completion,
    Completed,
    Interrupted,
    ActionPending,
    ActionDone,
}

impl From<MonitorState> for WatchState {
    fn from(state: MonitorState) -> Self {
        match state {
            MonitorState::Starting => WatchState::Starting,
            MonitorState::Protective => WatchState::Protective,
            MonitorState::Completion => WatchState::Completion,
            MonitorState::Completed => WatchState::Completed,
            MonitorState::Interrupted => WatchState::Interrupted,
        }
    }
}

/// The JSON payload written to `taskwatch.status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: WatchState,
    pub elapsed_secs: u64,
    pub primary_running: bool,
    pub companion_running: bool,
    pub resets: u32,
    pub action: Option<ActionDecision>,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// so readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".taskwatch.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builds StatusData from monitor snapshots and completion progress.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    started_at: DateTime<Utc>,
    last: MonitorSnapshot,
    action: Option<ActionDecision>,
}

impl StatusTracker {
    pub fn new(status_path: PathBuf) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            started_at: Utc::now(),
            last: MonitorSnapshot::default(),
            action: None,
        }
    }

    /// Record a snapshot from the monitor loop and write it out.
    pub fn record(&mut self, snapshot: MonitorSnapshot) {
        self.last = snapshot;
        self.update(snapshot.state.into());
    }

    /// Record the resolved completion action.
    pub fn set_action(&mut self, action: ActionDecision) {
        self.action = Some(action);
    }

    /// Write the status file with the given state and the last snapshot.
    pub fn update(&self, state: WatchState) {
        let data = StatusData {
            pid: self.pid,
            state,
            elapsed_secs: self.last.elapsed.as_secs(),
            primary_running: self.last.running.primary,
            companion_running: self.last.running.companion,
            resets: self.last.resets,
            action: self.action,
            started_at: self.started_at,
            last_update: Utc::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, path = %self.file.path().display(), "failed to write status file");
        }
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}
