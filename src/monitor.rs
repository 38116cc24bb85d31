//! Crash-recovery polling loop.
//!
//! Watches two named processes until the workload they make up is done.
//! While the protective window is open, a missing process counts as a crash
//! and is relaunched through its scheduled task; every successful relaunch
//! re-arms the window. Once the window has elapsed, a missing process means
//! the workload finished: survivors are terminated and the loop completes.

use crate::config::WatchConfig;
use crate::launcher::TaskLauncher;
use crate::process::{ProcessTerminator, ProcessWatcher};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wait before confirming a suspected crash.
pub const CRASH_DEBOUNCE: Duration = Duration::from_secs(5);
/// Wait before relaunching targets found missing in the protective phase.
pub const LIVENESS_GRACE: Duration = Duration::from_secs(10);
/// Wait before declaring the workload finished in the completion phase.
pub const COMPLETION_GRACE: Duration = Duration::from_secs(20);

/// One of the two monitored processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Primary,
    Companion,
}

impl Target {
    /// Evaluation order within a cycle.
    pub const ALL: [Target; 2] = [Target::Primary, Target::Companion];
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Primary => f.write_str("primary"),
            Target::Companion => f.write_str("companion"),
        }
    }
}

/// Process name plus the scheduled task that (re)starts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub process: String,
    pub task: String,
}

impl TargetSpec {
    pub fn new(process: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            process: process.into(),
            task: task.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredProcessSet {
    pub primary: TargetSpec,
    pub companion: TargetSpec,
}

impl MonitoredProcessSet {
    pub fn get(&self, target: Target) -> &TargetSpec {
        match target {
            Target::Primary => &self.primary,
            Target::Companion => &self.companion,
        }
    }
}

/// Immutable inputs for one monitor run.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub targets: MonitoredProcessSet,
    pub check_interval: Duration,
    pub crash_timeout: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            targets: MonitoredProcessSet {
                primary: TargetSpec::new(&config.processes.primary, &config.tasks.primary),
                companion: TargetSpec::new(&config.processes.companion, &config.tasks.companion),
            },
            check_interval: config.timing.check_interval(),
            crash_timeout: config.timing.crash_timeout(),
        }
    }
}

/// Which half of the run the elapsed time falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Absence is treated as a crash.
    Protective,
    /// Absence means the workload finished.
    Completion,
}

impl Phase {
    pub fn at(elapsed: Duration, crash_timeout: Duration) -> Self {
        if elapsed < crash_timeout {
            Phase::Protective
        } else {
            Phase::Completion
        }
    }
}

/// Monotonic time since the monitor started or was last reset.
#[derive(Debug)]
pub struct ElapsedTimer {
    started: Instant,
    resets: u32,
}

impl ElapsedTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            resets: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Re-arm the protective window from this instant.
    pub fn reset(&mut self) {
        self.started = Instant::now();
        self.resets += 1;
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn phase(&self, crash_timeout: Duration) -> Phase {
        Phase::at(self.elapsed(), crash_timeout)
    }
}

/// Running flags for both targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStates {
    pub primary: bool,
    pub companion: bool,
}

impl TargetStates {
    pub fn get(&self, target: Target) -> bool {
        match target {
            Target::Primary => self.primary,
            Target::Companion => self.companion,
        }
    }

    pub fn set(&mut self, target: Target, running: bool) {
        match target {
            Target::Primary => self.primary = running,
            Target::Companion => self.companion = running,
        }
    }

    pub fn any_down(&self) -> bool {
        !self.primary || !self.companion
    }
}

/// Terminal result of [`CrashRecoveryController::monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed,
    Interrupted,
}

/// Externally visible state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Protective,
    Completion,
    Completed,
    Interrupted,
}

impl From<Phase> for MonitorState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Protective => MonitorState::Protective,
            Phase::Completion => MonitorState::Completion,
        }
    }
}

impl From<MonitorOutcome> for MonitorState {
    fn from(outcome: MonitorOutcome) -> Self {
        match outcome {
            MonitorOutcome::Completed => MonitorState::Completed,
            MonitorOutcome::Interrupted => MonitorState::Interrupted,
        }
    }
}

/// Published after every cycle and at the terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub state: MonitorState,
    pub elapsed: Duration,
    pub running: TargetStates,
    pub resets: u32,
}

impl Default for MonitorSnapshot {
    fn default() -> Self {
        Self {
            state: MonitorState::Starting,
            elapsed: Duration::ZERO,
            running: TargetStates::default(),
            resets: 0,
        }
    }
}

/// Stop was requested while waiting.
#[derive(Debug)]
struct Interrupted;

enum CycleOutcome {
    Continue,
    Completed,
}

/// Sleep for `duration` unless `cancel` fires first.
async fn wait(cancel: &CancellationToken, duration: Duration) -> Result<(), Interrupted> {
    guarded(cancel, tokio::time::sleep(duration)).await
}

/// Drive `fut` to completion unless `cancel` fires first; the future is
/// dropped on cancellation.
async fn guarded<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Interrupted> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted),
        out = fut => Ok(out),
    }
}

/// The polling state machine. Owns the elapsed timer and last-known states.
pub struct CrashRecoveryController<W, L, T> {
    settings: MonitorSettings,
    watcher: W,
    launcher: L,
    terminator: T,
    cancel: CancellationToken,
    timer: ElapsedTimer,
    last_known: TargetStates,
    snapshots: watch::Sender<MonitorSnapshot>,
}

impl<W, L, T> CrashRecoveryController<W, L, T>
where
    W: ProcessWatcher,
    L: TaskLauncher,
    T: ProcessTerminator,
{
    pub fn new(
        settings: MonitorSettings,
        watcher: W,
        launcher: L,
        terminator: T,
        cancel: CancellationToken,
    ) -> Self {
        let (snapshots, _) = watch::channel(MonitorSnapshot::default());
        Self {
            settings,
            watcher,
            launcher,
            terminator,
            cancel,
            timer: ElapsedTimer::start(),
            last_known: TargetStates::default(),
            snapshots,
        }
    }

    /// Receiver for per-cycle snapshots.
    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.subscribe()
    }

    /// Cancelling this token stops the loop at its current wait.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Poll until the workload completes or a stop is requested.
    pub async fn monitor(&mut self) -> MonitorOutcome {
        self.timer = ElapsedTimer::start();
        self.last_known = TargetStates::default();
        info!(
            primary = %self.settings.targets.primary.process,
            companion = %self.settings.targets.companion.process,
            crash_timeout_secs = self.settings.crash_timeout.as_secs(),
            check_interval_secs = self.settings.check_interval.as_secs(),
            "process monitor started"
        );

        let outcome = match self.run().await {
            Ok(()) => MonitorOutcome::Completed,
            Err(Interrupted) => MonitorOutcome::Interrupted,
        };
        match outcome {
            MonitorOutcome::Completed => info!(
                resets = self.timer.resets(),
                "monitored workload completed"
            ),
            MonitorOutcome::Interrupted => info!("process monitor interrupted"),
        }
        self.publish(outcome.into());
        outcome
    }

    async fn run(&mut self) -> Result<(), Interrupted> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Interrupted);
            }
            if let CycleOutcome::Completed = self.cycle().await? {
                return Ok(());
            }
            let phase = self.timer.phase(self.settings.crash_timeout);
            self.publish(phase.into());
            wait(&self.cancel, self.settings.check_interval).await?;
        }
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, Interrupted> {
        let elapsed = self.timer.elapsed();
        let current = self.observe().await?;
        let phase = Phase::at(elapsed, self.settings.crash_timeout);
        debug!(
            elapsed_secs = elapsed.as_secs(),
            ?phase,
            primary_running = current.primary,
            companion_running = current.companion,
            "poll"
        );

        match phase {
            Phase::Protective => {
                self.protect(current).await?;
                Ok(CycleOutcome::Continue)
            }
            Phase::Completion => self.finish(current).await,
        }
    }

    /// Protective phase: crash-transition check, then the unconditional
    /// liveness check, then record what was last seen.
    async fn protect(&mut self, mut current: TargetStates) -> Result<(), Interrupted> {
        let mut relaunched = false;
        for target in Target::ALL {
            if !(self.last_known.get(target) && !current.get(target)) {
                continue;
            }
            warn!(
                %target,
                process = %self.settings.targets.get(target).process,
                "process disappeared, suspected crash"
            );
            wait(&self.cancel, CRASH_DEBOUNCE).await?;
            if self.is_running(target).await? {
                debug!(%target, "process back after debounce");
                current.set(target, true);
                continue;
            }
            relaunched |= self.relaunch(target).await?;
        }
        if relaunched {
            current = self.observe().await?;
        }

        if current.any_down() {
            wait(&self.cancel, LIVENESS_GRACE).await?;
            current = self.observe().await?;
            for target in Target::ALL {
                if !current.get(target) {
                    info!(
                        %target,
                        process = %self.settings.targets.get(target).process,
                        "process not running, starting it"
                    );
                    self.relaunch(target).await?;
                }
            }
        }

        self.last_known = current;
        Ok(())
    }

    /// Completion phase: a missing target means the workload is done.
    async fn finish(&mut self, current: TargetStates) -> Result<CycleOutcome, Interrupted> {
        if !current.any_down() {
            return Ok(CycleOutcome::Continue);
        }

        info!(
            grace_secs = COMPLETION_GRACE.as_secs(),
            "protective window elapsed and a process has exited, waiting before completing"
        );
        wait(&self.cancel, COMPLETION_GRACE).await?;

        let after = self.observe().await?;
        let survivors: Vec<&str> = Target::ALL
            .into_iter()
            .filter(|t| after.get(*t))
            .map(|t| self.settings.targets.get(t).process.as_str())
            .collect();
        if !survivors.is_empty() {
            warn!(?survivors, "processes still running after grace period, terminating");
            let count = guarded(&self.cancel, self.terminator.terminate(&survivors)).await?;
            debug!(count, "termination finished");
        }
        Ok(CycleOutcome::Completed)
    }

    async fn is_running(&self, target: Target) -> Result<bool, Interrupted> {
        let process = &self.settings.targets.get(target).process;
        guarded(&self.cancel, self.watcher.is_running(process)).await
    }

    async fn observe(&self) -> Result<TargetStates, Interrupted> {
        Ok(TargetStates {
            primary: self.is_running(Target::Primary).await?,
            companion: self.is_running(Target::Companion).await?,
        })
    }

    /// Trigger the target's scheduled task; success re-arms the protective
    /// window. A stop request abandons the launch in flight.
    async fn relaunch(&mut self, target: Target) -> Result<bool, Interrupted> {
        let task = &self.settings.targets.get(target).task;
        if !guarded(&self.cancel, self.launcher.launch(task)).await? {
            return Ok(false);
        }
        self.timer.reset();
        info!(
            %target,
            task = %task,
            protective_secs = self.settings.crash_timeout.as_secs(),
            "relaunched, protective window restarted"
        );
        Ok(true)
    }

    fn publish(&self, state: MonitorState) {
        self.snapshots.send_replace(MonitorSnapshot {
            state,
            elapsed: self.timer.elapsed(),
            running: self.last_known,
            resets: self.timer.resets(),
        });
    }
}

/// A monitor running on its own tokio task. Stop it through the
/// controller's cancellation token.
pub struct MonitorHandle {
    snapshots: watch::Receiver<MonitorSnapshot>,
    task: JoinHandle<MonitorOutcome>,
}

impl MonitorHandle {
    pub fn snapshots(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for the loop to end. A task that panicked counts as interrupted.
    pub async fn join(self) -> MonitorOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "monitor task ended abnormally");
                MonitorOutcome::Interrupted
            }
        }
    }
}

/// Run `controller.monitor()` on a background task.
pub fn spawn<W, L, T>(mut controller: CrashRecoveryController<W, L, T>) -> MonitorHandle
where
    W: ProcessWatcher + Send + 'static,
    L: TaskLauncher + Send + 'static,
    T: ProcessTerminator + Send + 'static,
{
    let snapshots = controller.subscribe();
    let task = tokio::spawn(async move { controller.monitor().await });
    MonitorHandle { snapshots, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    const PRIMARY: &str = "worker";
    const COMPANION: &str = "emulator";

    /// Scripted process table shared by the fake collaborators.
    struct World {
        started: Instant,
        running: HashMap<String, bool>,
        /// (offset from start, process, running) applied once due.
        events: Vec<(Duration, String, bool)>,
        launch_ok: bool,
        launches: Vec<String>,
        terminated: Vec<Vec<String>>,
    }

    #[derive(Clone)]
    struct Fake(Arc<Mutex<World>>);

    impl Fake {
        fn new(primary: bool, companion: bool) -> Self {
            let mut running = HashMap::new();
            running.insert(PRIMARY.to_string(), primary);
            running.insert(COMPANION.to_string(), companion);
            Fake(Arc::new(Mutex::new(World {
                started: Instant::now(),
                running,
                events: Vec::new(),
                launch_ok: true,
                launches: Vec::new(),
                terminated: Vec::new(),
            })))
        }

        fn at(self, secs: u64, process: &str, running: bool) -> Self {
            self.0
                .lock()
                .unwrap()
                .events
                .push((Duration::from_secs(secs), process.to_string(), running));
            self
        }

        fn failing_launches(self) -> Self {
            self.0.lock().unwrap().launch_ok = false;
            self
        }

        fn launches(&self) -> Vec<String> {
            self.0.lock().unwrap().launches.clone()
        }

        fn terminated(&self) -> Vec<Vec<String>> {
            self.0.lock().unwrap().terminated.clone()
        }
    }

    #[async_trait]
    impl ProcessWatcher for Fake {
        async fn is_running(&self, name: &str) -> bool {
            let mut world = self.0.lock().unwrap();
            let now = world.started.elapsed();
            let due: Vec<_> = world
                .events
                .iter()
                .filter(|(at, _, _)| *at <= now)
                .cloned()
                .collect();
            world.events.retain(|(at, _, _)| *at > now);
            for (_, process, running) in due {
                world.running.insert(process, running);
            }
            world.running.get(name).copied().unwrap_or(false)
        }
    }

    #[async_trait]
    impl TaskLauncher for Fake {
        async fn launch(&self, task_name: &str) -> bool {
            let mut world = self.0.lock().unwrap();
            world.launches.push(task_name.to_string());
            if !world.launch_ok {
                return false;
            }
            let process = task_name.trim_start_matches("start-").to_string();
            world.running.insert(process, true);
            true
        }
    }

    #[async_trait]
    impl ProcessTerminator for Fake {
        async fn terminate(&self, names: &[&str]) -> usize {
            let mut world = self.0.lock().unwrap();
            world
                .terminated
                .push(names.iter().map(|n| n.to_string()).collect());
            for name in names {
                world.running.insert(name.to_string(), false);
            }
            names.len()
        }
    }

    fn settings(crash_timeout_secs: u64) -> MonitorSettings {
        MonitorSettings {
            targets: MonitoredProcessSet {
                primary: TargetSpec::new(PRIMARY, format!("start-{PRIMARY}")),
                companion: TargetSpec::new(COMPANION, format!("start-{COMPANION}")),
            },
            check_interval: Duration::from_secs(5),
            crash_timeout: Duration::from_secs(crash_timeout_secs),
        }
    }

    fn controller(fake: &Fake, crash_timeout_secs: u64) -> CrashRecoveryController<Fake, Fake, Fake> {
        CrashRecoveryController::new(
            settings(crash_timeout_secs),
            fake.clone(),
            fake.clone(),
            fake.clone(),
            CancellationToken::new(),
        )
    }

    /// Spawn a fake-backed monitor, returning its handle and stop token.
    fn start(fake: &Fake, crash_timeout_secs: u64) -> (MonitorHandle, CancellationToken) {
        let ctl = controller(fake, crash_timeout_secs);
        let stop = ctl.cancel_token();
        (spawn(ctl), stop)
    }

    /// Launcher whose launches take an hour; records each attempt.
    #[derive(Clone, Default)]
    struct SlowLauncher {
        started: Arc<Notify>,
        attempts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TaskLauncher for SlowLauncher {
        async fn launch(&self, task_name: &str) -> bool {
            self.attempts.lock().unwrap().push(task_name.to_string());
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
            true
        }
    }

    #[test]
    fn test_phase_boundary() {
        let timeout = Duration::from_secs(600);
        assert_eq!(Phase::at(Duration::ZERO, timeout), Phase::Protective);
        assert_eq!(Phase::at(Duration::from_secs(599), timeout), Phase::Protective);
        assert_eq!(Phase::at(Duration::from_secs(600), timeout), Phase::Completion);
        assert_eq!(Phase::at(Duration::ZERO, Duration::ZERO), Phase::Completion);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_reset_returns_to_protective() {
        let mut timer = ElapsedTimer::start();
        let timeout = Duration::from_secs(60);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(timer.phase(timeout), Phase::Completion);

        timer.reset();
        assert_eq!(timer.resets(), 1);
        assert!(timer.elapsed() < Duration::from_secs(1));
        assert_eq!(timer.phase(timeout), Phase::Protective);
    }

    #[test]
    fn test_target_states_any_down() {
        let mut states = TargetStates {
            primary: true,
            companion: true,
        };
        assert!(!states.any_down());
        states.set(Target::Companion, false);
        assert!(states.any_down());
        assert!(states.get(Target::Primary));
        assert!(!states.get(Target::Companion));
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_running_never_completes() {
        let fake = Fake::new(true, true);
        let (handle, stop) = start(&fake, 60);

        tokio::time::sleep(Duration::from_secs(3 * 60 * 60)).await;
        assert_eq!(handle.snapshots().borrow().state, MonitorState::Completion);

        stop.cancel();
        assert_eq!(handle.join().await, MonitorOutcome::Interrupted);
        assert!(fake.launches().is_empty());
        assert!(fake.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_relaunch_success_resets_window() {
        let fake = Fake::new(true, true)
            .at(20, PRIMARY, false)
            .at(200, PRIMARY, false)
            .at(200, COMPANION, false);
        let mut ctl = controller(&fake, 60);
        let snapshots = ctl.subscribe();
        let start = Instant::now();

        let outcome = ctl.monitor().await;

        assert_eq!(outcome, MonitorOutcome::Completed);
        // One relaunch for the single running -> stopped transition.
        assert_eq!(fake.launches(), vec!["start-worker"]);
        assert!(fake.terminated().is_empty());
        let snap = *snapshots.borrow();
        assert_eq!(snap.state, MonitorState::Completed);
        assert_eq!(snap.resets, 1);
        // Crash seen at 20s, confirmed and relaunched at 25s, both gone at
        // 200s, completed after the 20s grace.
        assert_eq!(start.elapsed().as_secs(), 220);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_relaunch_keeps_window_and_terminates_survivor() {
        let fake = Fake::new(true, true)
            .at(20, PRIMARY, false)
            .failing_launches();
        let mut ctl = controller(&fake, 60);
        let snapshots = ctl.subscribe();
        let start = Instant::now();

        let outcome = ctl.monitor().await;

        assert_eq!(outcome, MonitorOutcome::Completed);
        assert_eq!(snapshots.borrow().resets, 0);
        // Crash check at 25s, liveness retries at 35s, 50s and 65s.
        assert_eq!(fake.launches().len(), 4);
        assert!(fake.launches().iter().all(|t| t == "start-worker"));
        // Window never re-armed: completion phase from the 70s cycle.
        assert_eq!(start.elapsed().as_secs(), 90);
        assert_eq!(fake.terminated(), vec![vec!["emulator".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_down_at_threshold_completes_without_terminating() {
        let fake = Fake::new(true, true)
            .at(28, PRIMARY, false)
            .at(28, COMPANION, false);
        let mut ctl = controller(&fake, 30);
        let start = Instant::now();

        assert_eq!(ctl.monitor().await, MonitorOutcome::Completed);
        assert!(fake.launches().is_empty());
        assert!(fake.terminated().is_empty());
        assert_eq!(start.elapsed().as_secs(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_starts_in_completion_phase() {
        let fake = Fake::new(false, true);
        let mut ctl = controller(&fake, 0);
        let start = Instant::now();

        assert_eq!(ctl.monitor().await, MonitorOutcome::Completed);
        assert!(fake.launches().is_empty());
        assert_eq!(fake.terminated(), vec![vec!["emulator".to_string()]]);
        assert_eq!(start.elapsed().as_secs(), COMPLETION_GRACE.as_secs());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_at_start_is_launched() {
        let fake = Fake::new(false, false);
        let (handle, stop) = start(&fake, 600);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let snap = *handle.snapshots().borrow();
        assert_eq!(snap.state, MonitorState::Protective);
        assert_eq!(snap.resets, 2);
        assert_eq!(fake.launches(), vec!["start-worker", "start-emulator"]);

        stop.cancel();
        assert_eq!(handle.join().await, MonitorOutcome::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blip_within_debounce_is_not_relaunched() {
        let fake = Fake::new(true, true)
            .at(20, PRIMARY, false)
            .at(22, PRIMARY, true);
        let (handle, stop) = start(&fake, 600);

        tokio::time::sleep(Duration::from_secs(120)).await;
        stop.cancel();
        assert_eq!(handle.join().await, MonitorOutcome::Interrupted);
        assert!(fake.launches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_grace_wait_interrupts() {
        let fake = Fake::new(false, true);
        let (handle, stop) = start(&fake, 0);
        let start = Instant::now();

        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.cancel();

        assert_eq!(handle.join().await, MonitorOutcome::Interrupted);
        assert!(start.elapsed() < COMPLETION_GRACE);
        assert!(fake.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_crash_debounce_interrupts() {
        let fake = Fake::new(true, true).at(20, PRIMARY, false);
        let (handle, stop) = start(&fake, 600);
        let begin = Instant::now();

        // Crash seen on the 20s cycle; debounce runs until 25s.
        tokio::time::sleep(Duration::from_secs(22)).await;
        stop.cancel();

        assert_eq!(handle.join().await, MonitorOutcome::Interrupted);
        assert!(begin.elapsed() < Duration::from_secs(20) + CRASH_DEBOUNCE);
        assert!(fake.launches().is_empty());
        assert!(fake.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_liveness_grace_interrupts() {
        let fake = Fake::new(true, false);
        let (handle, stop) = start(&fake, 600);
        let begin = Instant::now();

        tokio::time::sleep(Duration::from_secs(3)).await;
        stop.cancel();

        assert_eq!(handle.join().await, MonitorOutcome::Interrupted);
        assert!(begin.elapsed() < LIVENESS_GRACE);
        assert!(fake.launches().is_empty());
        assert!(fake.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_check_interval_interrupts() {
        let fake = Fake::new(true, true);
        let (handle, stop) = start(&fake, 600);
        let snapshots = handle.snapshots();
        let begin = Instant::now();

        tokio::time::sleep(Duration::from_secs(2)).await;
        stop.cancel();

        assert_eq!(handle.join().await, MonitorOutcome::Interrupted);
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert_eq!(snapshots.borrow().state, MonitorState::Interrupted);
        assert!(fake.launches().is_empty());
        assert!(fake.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_slow_relaunch_interrupts() {
        let fake = Fake::new(false, false);
        let launcher = SlowLauncher::default();
        let ctl = CrashRecoveryController::new(
            settings(600),
            fake.clone(),
            launcher.clone(),
            fake.clone(),
            CancellationToken::new(),
        );
        let stop = ctl.cancel_token();
        let handle = spawn(ctl);
        let snapshots = handle.snapshots();

        // Liveness grace passes, then the primary relaunch hangs.
        launcher.started.notified().await;
        let stopped_at = Instant::now();
        stop.cancel();

        assert_eq!(handle.join().await, MonitorOutcome::Interrupted);
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
        assert_eq!(*launcher.attempts.lock().unwrap(), vec!["start-worker"]);
        assert_eq!(snapshots.borrow().resets, 0);
        assert!(fake.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_interrupts_immediately() {
        let fake = Fake::new(true, true);
        let mut ctl = controller(&fake, 60);
        let snapshots = ctl.subscribe();
        ctl.cancel_token().cancel();

        assert_eq!(ctl.monitor().await, MonitorOutcome::Interrupted);
        assert_eq!(snapshots.borrow().state, MonitorState::Interrupted);
    }

    #[test]
    fn test_settings_from_config() {
        let config = WatchConfig::default();
        let settings = MonitorSettings::from_config(&config);
        assert_eq!(settings.targets.get(Target::Primary).process, "BAAH.exe");
        assert_eq!(settings.targets.get(Target::Companion).task, "Start MuMu");
        assert_eq!(settings.check_interval, Duration::from_secs(5));
        assert_eq!(settings.crash_timeout, Duration::from_secs(600));
    }
}
