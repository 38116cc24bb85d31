//! OS-level completion actions: log out, shut down or restart the host.

use crate::schedule::ActionDecision;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Performs a completion action on the host.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, decision: ActionDecision) -> Result<(), ActionError>;
}

/// Errors from running a completion action.
#[derive(Debug)]
pub enum ActionError {
    Spawn {
        program: String,
        source: std::io::Error,
    },
    Failed {
        program: String,
        code: Option<i32>,
    },
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::Spawn { program, source } => {
                write!(f, "failed to run {program}: {source}")
            }
            ActionError::Failed { program, code } => {
                write!(f, "{program} exited with {code:?}")
            }
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ActionError::Spawn { source, .. } => Some(source),
            ActionError::Failed { .. } => None,
        }
    }
}

/// Program and arguments for `decision` on this platform; `None` for no-op.
pub fn command_for(decision: ActionDecision) -> Option<(&'static str, &'static [&'static str])> {
    #[cfg(windows)]
    {
        match decision {
            ActionDecision::None => None,
            ActionDecision::Logout => Some(("shutdown", &["/l", "/f"][..])),
            ActionDecision::Shutdown => Some(("shutdown", &["/s", "/f", "/t", "0"][..])),
            ActionDecision::Restart => Some(("shutdown", &["/r", "/f", "/t", "0"][..])),
        }
    }

    #[cfg(target_os = "macos")]
    {
        match decision {
            ActionDecision::None => None,
            ActionDecision::Logout => Some(("pkill", &["loginwindow"][..])),
            ActionDecision::Shutdown => Some(("sudo", &["shutdown", "-h", "now"][..])),
            ActionDecision::Restart => Some(("sudo", &["shutdown", "-r", "now"][..])),
        }
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    {
        match decision {
            ActionDecision::None => None,
            ActionDecision::Logout => Some(("gnome-session-quit", &["--force", "--logout"][..])),
            ActionDecision::Shutdown => Some(("sudo", &["shutdown", "-h", "now"][..])),
            ActionDecision::Restart => Some(("sudo", &["shutdown", "-r", "now"][..])),
        }
    }
}

/// Runs the platform command for each decision. With `dry_run` the command
/// is only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemActionExecutor {
    dry_run: bool,
}

impl SystemActionExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

#[async_trait]
impl ActionExecutor for SystemActionExecutor {
    async fn execute(&self, decision: ActionDecision) -> Result<(), ActionError> {
        let Some((program, args)) = command_for(decision) else {
            tracing::info!("completion action is none, nothing to do");
            return Ok(());
        };

        if self.dry_run {
            tracing::info!(%decision, program, ?args, "dry run, not executing completion action");
            return Ok(());
        }

        tracing::info!(%decision, program, ?args, "executing completion action");
        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| ActionError::Spawn {
                program: program.to_string(),
                source: e,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ActionError::Failed {
                program: program.to_string(),
                code: status.code(),
            })
        }
    }
}

/// Wait `delay` then execute `decision`. Returns `Ok(false)` if `cancel`
/// fired during the wait, in which case nothing is executed.
pub async fn run_completion_action<E: ActionExecutor>(
    executor: &E,
    decision: ActionDecision,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<bool, ActionError> {
    tracing::info!(
        %decision,
        description = decision.describe(),
        delay_secs = delay.as_secs(),
        "completion action scheduled"
    );
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::info!("completion action cancelled");
            return Ok(false);
        }
        _ = tokio::time::sleep(delay) => {}
    }
    executor.execute(decision).await?;
    Ok(true)
}
