//! Time-window completion scheduler.
//!
//! Maps an ordered list of schedule entries plus a global default onto the
//! action to take once the monitored workload has finished. First enabled
//! entry whose window contains `now` wins; list order is the tie-break.

use chrono::Timelike;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// What the host should do after the workload completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionDecision {
    #[default]
    None,
    Logout,
    Shutdown,
    Restart,
}

impl ActionDecision {
    /// Human-readable description used in logs and the preview table.
    pub fn describe(self) -> &'static str {
        match self {
            ActionDecision::None => "no action",
            ActionDecision::Logout => "log out",
            ActionDecision::Shutdown => "shut down",
            ActionDecision::Restart => "restart",
        }
    }
}

impl fmt::Display for ActionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionDecision::None => "none",
            ActionDecision::Logout => "logout",
            ActionDecision::Shutdown => "shutdown",
            ActionDecision::Restart => "restart",
        };
        f.write_str(s)
    }
}

/// Error parsing an action name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseActionError {
    input: String,
}

impl fmt::Display for ParseActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown action {:?}, expected none, logout, shutdown or restart",
            self.input
        )
    }
}

impl std::error::Error for ParseActionError {}

impl std::str::FromStr for ActionDecision {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ActionDecision::None),
            "logout" => Ok(ActionDecision::Logout),
            "shutdown" => Ok(ActionDecision::Shutdown),
            "restart" => Ok(ActionDecision::Restart),
            _ => Err(ParseActionError {
                input: s.to_string(),
            }),
        }
    }
}

/// A minute within a day, 0 (`00:00`) through 1439 (`23:59`).
///
/// Serialized as an `"HH:MM"` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const MIDNIGHT: MinuteOfDay = MinuteOfDay(0);
    pub const LAST: MinuteOfDay = MinuteOfDay(23 * 60 + 59);

    /// Build from hour and minute, rejecting out-of-range values.
    pub fn new(hour: u16, minute: u16) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(MinuteOfDay(hour * 60 + minute))
        } else {
            None
        }
    }

    /// Minute-of-day for any chrono time value (seconds are truncated).
    pub fn from_time<T: Timelike>(time: &T) -> Self {
        // hour() < 24 and minute() < 60 always hold for chrono times.
        MinuteOfDay((time.hour() * 60 + time.minute()) as u16)
    }

    /// Current local wall-clock minute.
    pub fn now_local() -> Self {
        Self::from_time(&chrono::Local::now())
    }

    pub fn hour(self) -> u16 {
        self.0 / 60
    }

    pub fn minute(self) -> u16 {
        self.0 % 60
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Error parsing an `"HH:MM"` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMinuteError {
    input: String,
}

impl fmt::Display for ParseMinuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day {:?}, expected HH:MM", self.input)
    }
}

impl std::error::Error for ParseMinuteError {}

impl std::str::FromStr for MinuteOfDay {
    type Err = ParseMinuteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMinuteError {
            input: s.to_string(),
        };
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        let hour: u16 = h.parse().map_err(|_| err())?;
        let minute: u16 = m.parse().map_err(|_| err())?;
        MinuteOfDay::new(hour, minute).ok_or_else(err)
    }
}

impl TryFrom<String> for MinuteOfDay {
    type Error = ParseMinuteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MinuteOfDay> for String {
    fn from(value: MinuteOfDay) -> Self {
        value.to_string()
    }
}

/// One named time window and the action that applies inside it.
///
/// Loading never fails on a bad entry: an unknown action becomes `none`,
/// and an unreadable time disables the entry. Both are logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawScheduleEntry")]
pub struct ScheduleEntry {
    pub name: String,
    pub start_time: MinuteOfDay,
    pub end_time: MinuteOfDay,
    pub action: ActionDecision,
    pub enabled: bool,
}

/// A `[[completion.schedule]]` table as written, before checking.
#[derive(Deserialize)]
struct RawScheduleEntry {
    #[serde(default)]
    name: String,
    start_time: Option<String>,
    end_time: Option<String>,
    action: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl From<RawScheduleEntry> for ScheduleEntry {
    fn from(raw: RawScheduleEntry) -> Self {
        let name = raw.name;
        let mut enabled = raw.enabled;

        let mut time = |field: &str, value: Option<String>, default: MinuteOfDay| {
            let Some(text) = value else {
                return default;
            };
            match text.parse::<MinuteOfDay>() {
                Ok(minute) => minute,
                Err(e) => {
                    warn!(entry = %name, field, error = %e, "schedule entry disabled");
                    enabled = false;
                    default
                }
            }
        };
        let start_time = time("start_time", raw.start_time, MinuteOfDay::MIDNIGHT);
        let end_time = time("end_time", raw.end_time, MinuteOfDay::LAST);

        let action = match raw.action.as_deref().map(str::parse::<ActionDecision>) {
            None => ActionDecision::None,
            Some(Ok(action)) => action,
            Some(Err(e)) => {
                warn!(entry = %name, error = %e, "treating schedule entry action as none");
                ActionDecision::None
            }
        };

        ScheduleEntry {
            name,
            start_time,
            end_time,
            action,
            enabled,
        }
    }
}

impl ScheduleEntry {
    /// Window membership. Same-day windows are inclusive at both ends;
    /// an entry whose start is after its end wraps past midnight.
    pub fn contains(&self, now: MinuteOfDay) -> bool {
        if self.start_time <= self.end_time {
            self.start_time <= now && now <= self.end_time
        } else {
            now >= self.start_time || now <= self.end_time
        }
    }

    pub fn is_overnight(&self) -> bool {
        self.start_time > self.end_time
    }
}

/// Pick the action for `now`: first enabled entry containing it, else the default.
pub fn resolve(
    entries: &[ScheduleEntry],
    global_default: ActionDecision,
    now: MinuteOfDay,
) -> ActionDecision {
    entries
        .iter()
        .filter(|entry| entry.enabled)
        .find(|entry| entry.contains(now))
        .map(|entry| entry.action)
        .unwrap_or(global_default)
}

/// Render the schedule as a plain-text table for the `--preview` command.
pub fn preview(
    entries: &[ScheduleEntry],
    global_default: ActionDecision,
    now: MinuteOfDay,
) -> String {
    let current = resolve(entries, global_default, now);
    let rule = "=".repeat(60);
    let mut out = String::new();

    out.push_str(&rule);
    out.push('\n');
    out.push_str("Completion action schedule\n");
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!("Current time:   {now}\n"));
    out.push_str(&format!("Action now:     {current} ({})\n", current.describe()));
    out.push_str(&format!("Global default: {global_default}\n"));
    out.push_str(&"-".repeat(60));
    out.push('\n');

    if entries.is_empty() {
        out.push_str("No time windows configured, the global default always applies.\n");
    } else {
        for (i, entry) in entries.iter().enumerate() {
            let name = if entry.name.is_empty() {
                format!("window {}", i + 1)
            } else {
                entry.name.clone()
            };
            let state = if entry.enabled { "enabled" } else { "disabled" };
            let overnight = if entry.is_overnight() { " (overnight)" } else { "" };
            out.push_str(&format!("  {}. {name} [{state}]\n", i + 1));
            out.push_str(&format!(
                "     window: {} - {}{overnight}\n",
                entry.start_time, entry.end_time
            ));
            out.push_str(&format!("     action: {}\n", entry.action));
        }
    }

    out.push_str(&rule);
    out.push('\n');
    out
}
