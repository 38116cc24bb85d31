//! Scheduled-task relaunch: asks the OS scheduler to (re)start a named task
//! by running the configured launcher command.

use crate::config::LauncherConfig;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Best-effort trigger of a named scheduled task.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    /// Returns true iff the scheduler accepted the request.
    async fn launch(&self, task_name: &str) -> bool;
}

/// Errors that can occur when running the launcher command.
#[derive(Debug)]
pub enum LaunchError {
    /// No task name configured for the target.
    EmptyTask,
    /// Failed to spawn the launcher command.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// The launcher ran but reported failure.
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::EmptyTask => write!(f, "task name is empty"),
            LaunchError::Spawn { command, source } => {
                write!(f, "failed to spawn launcher {command}: {source}")
            }
            LaunchError::Failed {
                command,
                code,
                stderr,
            } => {
                write!(f, "launcher {command} exited with {code:?}")?;
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Runs `command args...` with `{task}` substituted in each argument.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    config: LauncherConfig,
}

impl CommandLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Run the launcher for `task_name`, reporting why it failed. Dropping
    /// the returned future kills the launcher process.
    pub async fn try_launch(&self, task_name: &str) -> Result<(), LaunchError> {
        if task_name.trim().is_empty() {
            return Err(LaunchError::EmptyTask);
        }
        let args = build_args(&self.config, task_name);
        tracing::info!(command = %self.config.command, args = ?args, "triggering scheduled task");

        let output = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LaunchError::Spawn {
                command: self.config.command.clone(),
                source: e,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(LaunchError::Failed {
                command: self.config.command.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl TaskLauncher for CommandLauncher {
    async fn launch(&self, task_name: &str) -> bool {
        match self.try_launch(task_name).await {
            Ok(()) => {
                tracing::info!(task = task_name, "scheduled task started");
                true
            }
            Err(e) => {
                tracing::warn!(task = task_name, error = %e, "failed to start scheduled task");
                false
            }
        }
    }
}

/// Build the command arguments, replacing `{task}` placeholders with the task name.
fn build_args(config: &LauncherConfig, task_name: &str) -> Vec<String> {
    config
        .args
        .iter()
        .map(|arg| arg.replace("{task}", task_name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(command: &str, args: &[&str]) -> CommandLauncher {
        CommandLauncher::new(LauncherConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        })
    }

    #[test]
    fn test_build_args_replaces_task_placeholder() {
        let config = LauncherConfig {
            command: "schtasks".to_string(),
            args: vec!["/run".to_string(), "/tn".to_string(), "{task}".to_string()],
        };
        let args = build_args(&config, "Start BAAH");
        assert_eq!(args, vec!["/run", "/tn", "Start BAAH"]);
    }

    #[test]
    fn test_build_args_no_placeholder() {
        let config = LauncherConfig {
            command: "true".to_string(),
            args: vec!["fixed".to_string()],
        };
        assert_eq!(build_args(&config, "anything"), vec!["fixed"]);
    }

    #[tokio::test]
    async fn test_empty_task_fails_without_running() {
        let l = launcher("nonexistent-binary-xyz", &["{task}"]);
        assert!(matches!(
            l.try_launch("  ").await,
            Err(LaunchError::EmptyTask)
        ));
        assert!(!l.launch("").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let l = launcher("sh", &["-c", "test \"$0\" = 'my task'", "{task}"]);
        assert!(l.launch("my task").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let l = launcher("sh", &["-c", "echo nope >&2; exit 3"]);
        let err = l.try_launch("task").await.unwrap_err();
        match &err {
            LaunchError::Failed { code, stderr, .. } => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!l.launch("task").await);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_failure() {
        let l = launcher("nonexistent-binary-xyz", &["{task}"]);
        let err = l.try_launch("task").await.unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(err.to_string().contains("failed to spawn"));
        assert!(!l.launch("task").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_launch_does_not_block_runtime() {
        let l = launcher("sh", &["-c", "sleep 5"]);
        let start = std::time::Instant::now();

        let launch = tokio::spawn(async move { l.launch("task").await });
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
        assert!(!launch.is_finished());

        launch.abort();
        assert!(launch.await.unwrap_err().is_cancelled());
    }
}
