mod action;
mod config;
mod launcher;
mod monitor;
mod process;
mod schedule;
mod signals;
mod status;

use action::{run_completion_action, SystemActionExecutor};
use clap::Parser;
use config::WatchConfig;
use launcher::CommandLauncher;
use monitor::{CrashRecoveryController, MonitorOutcome, MonitorSettings};
use process::ProcessTable;
use schedule::MinuteOfDay;
use signals::SignalHandler;
use status::{StatusTracker, WatchState};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const EXIT_INTERRUPTED: u8 = 130;

/// Waits for an unattended workload to finish: relaunches its processes if
/// they crash early, detects completion once the protective window has
/// passed, then logs out, shuts down or restarts according to the
/// time-of-day schedule.
#[derive(Parser, Debug)]
#[command(name = "taskwatch", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "taskwatch.toml")]
    config: PathBuf,

    /// Only monitor; skip the completion action
    #[arg(long)]
    only: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print the completion schedule and the action that applies now
    #[arg(long)]
    preview: bool,

    /// Extra logging (every poll cycle)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let problems = config.validate();

    if cli.dry_run {
        print_resolved(&cli, &config, &problems);
        return if problems.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("config error: {problem}");
        }
        return ExitCode::FAILURE;
    }

    if cli.preview {
        print!(
            "{}",
            schedule::preview(
                &config.completion.schedule,
                config.completion.default_action,
                MinuteOfDay::now_local(),
            )
        );
        return ExitCode::SUCCESS;
    }

    run(&config, cli.only).await
}

/// Monitor until completion, then apply the scheduled completion action.
async fn run(config: &WatchConfig, only: bool) -> ExitCode {
    let table = ProcessTable::new();
    let controller = CrashRecoveryController::new(
        MonitorSettings::from_config(config),
        table,
        CommandLauncher::new(config.launcher.clone()),
        table,
        CancellationToken::new(),
    );
    let cancel = controller.cancel_token();
    let _signals = SignalHandler::install(cancel.clone(), config.shutdown.stop_file.clone());

    let status = StatusTracker::new(config.status.path.clone());
    status.update(WatchState::Starting);

    let handle = monitor::spawn(controller);

    let mut snapshots = handle.snapshots();
    let status_task = tokio::spawn(async move {
        let mut status = status;
        while snapshots.changed().await.is_ok() {
            let snapshot = *snapshots.borrow_and_update();
            status.record(snapshot);
        }
        status
    });

    let outcome = handle.join().await;
    let mut status = match status_task.await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(error = %e, "status writer ended abnormally");
            StatusTracker::new(config.status.path.clone())
        }
    };

    if outcome == MonitorOutcome::Interrupted {
        status.update(WatchState::Interrupted);
        return ExitCode::from(EXIT_INTERRUPTED);
    }

    if only {
        tracing::info!("--only set, skipping completion action");
        return ExitCode::SUCCESS;
    }

    let now = MinuteOfDay::now_local();
    let decision = schedule::resolve(
        &config.completion.schedule,
        config.completion.default_action,
        now,
    );
    tracing::info!(%now, %decision, "resolved completion action");
    status.set_action(decision);
    status.update(WatchState::ActionPending);

    let executor = SystemActionExecutor::new(config.completion.dry_run);
    match run_completion_action(&executor, decision, config.timing.action_wait(), &cancel).await {
        Ok(true) => {
            status.update(WatchState::ActionDone);
            ExitCode::SUCCESS
        }
        Ok(false) => {
            status.update(WatchState::Interrupted);
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            tracing::error!(error = %e, %decision, "completion action failed");
            ExitCode::FAILURE
        }
    }
}

fn print_resolved(cli: &Cli, config: &WatchConfig, problems: &[String]) {
    println!("taskwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("Config file:      {}", cli.config.display());
    println!(
        "Primary:          {} (task: {:?})",
        config.processes.primary, config.tasks.primary
    );
    println!(
        "Companion:        {} (task: {:?})",
        config.processes.companion, config.tasks.companion
    );
    println!("Check interval:   {}s", config.timing.check_interval_secs);
    println!("Crash timeout:    {}s", config.timing.crash_timeout_secs);
    println!("Action wait:      {}s", config.timing.action_wait_secs);
    println!(
        "Launcher:         {} {}",
        config.launcher.command,
        config.launcher.args.join(" ")
    );
    println!(
        "Default action:   {}{}",
        config.completion.default_action,
        if config.completion.dry_run { " (dry run)" } else { "" }
    );
    println!("Schedule entries: {}", config.completion.schedule.len());
    println!("Stop file:        {}", config.shutdown.stop_file.display());
    println!("Status file:      {}", config.status.path.display());

    if problems.is_empty() {
        println!("Dry run mode: config validated, not running.");
    } else {
        for problem in problems {
            println!("config error: {problem}");
        }
    }
}
