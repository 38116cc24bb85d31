//! Signal handling for cooperative shutdown.
//!
//! Ctrl-C, SIGTERM and the appearance of the STOP file all cancel the shared
//! token, which interrupts the monitor at its current wait.

use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STOP_FILE_POLL: Duration = Duration::from_secs(1);

/// Owns the listener tasks; they are aborted on drop.
pub struct SignalHandler {
    tasks: Vec<JoinHandle<()>>,
}

impl SignalHandler {
    /// Spawn listeners that cancel `cancel` on Ctrl-C, SIGTERM or `stop_file`.
    pub fn install(cancel: CancellationToken, stop_file: PathBuf) -> SignalHandler {
        let mut tasks = Vec::new();

        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("interrupt received, stopping");
                    token.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "failed to listen for Ctrl-C"),
            }
        }));

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            tracing::info!("SIGTERM received, stopping");
                            token.cancel();
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to listen for SIGTERM"),
                }
            }));
        }

        tasks.push(tokio::spawn(watch_stop_file(stop_file, cancel)));

        SignalHandler { tasks }
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Poll for `stop_file`; when it appears, remove it and cancel `cancel`.
/// Returns once the token is cancelled by anyone.
pub async fn watch_stop_file(stop_file: PathBuf, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(STOP_FILE_POLL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        if stop_file.exists() {
            tracing::info!(path = %stop_file.display(), "stop file found, stopping");
            if let Err(e) = std::fs::remove_file(&stop_file) {
                tracing::warn!(error = %e, "failed to remove stop file");
            }
            cancel.cancel();
            return;
        }
    }
}
