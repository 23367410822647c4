//! Task definitions, the persistent data model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::Payload;
use crate::context::ContextBundle;
use crate::error::SchedulerError;
use crate::failure::FailureRecord;
use crate::purge::AutoPurge;
use crate::trigger::Plan;

/// Store-assigned task identifier.
pub type TaskId = i64;

/// Recognized task property keys.
pub mod keys {
    pub const IDENTITY_NAME: &str = "task.identity-name";
    pub const AUTO_PURGE: &str = "task.auto-purge";
    pub const TRANSACTION_TIMEOUT: &str = "task.transaction-timeout";
    pub const TRANSACTION_SUSPEND: &str = "task.transaction-suspend";
    pub const LONG_RUNNING: &str = "task.long-running";
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting for its next execution.
    Scheduled,
    /// An attempt holds an unexpired claim.
    Running,
    Successful,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCHEDULED" => Ok(Self::Scheduled),
            "RUNNING" => Ok(Self::Running),
            "SUCCESSFUL" => Ok(Self::Successful),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown task state '{other}'")),
        }
    }
}

/// Unit of a delay or period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Whole milliseconds in `amount` of this unit. Sub-millisecond remainders
    /// round up so a positive delay never becomes zero.
    pub fn to_millis(self, amount: i64) -> i64 {
        let per_milli = match self {
            Self::Nanoseconds => 1_000_000,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1,
            Self::Seconds => return amount.saturating_mul(1_000),
            Self::Minutes => return amount.saturating_mul(60_000),
            Self::Hours => return amount.saturating_mul(3_600_000),
            Self::Days => return amount.saturating_mul(86_400_000),
        };
        if amount > 0 {
            (amount - 1) / per_milli + 1
        } else {
            amount / per_milli
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ns" | "nanoseconds" => Ok(Self::Nanoseconds),
            "us" | "microseconds" => Ok(Self::Microseconds),
            "ms" | "milliseconds" => Ok(Self::Milliseconds),
            "s" | "seconds" => Ok(Self::Seconds),
            "m" | "minutes" => Ok(Self::Minutes),
            "h" | "hours" => Ok(Self::Hours),
            "d" | "days" => Ok(Self::Days),
            other => Err(format!("unknown time unit '{other}'")),
        }
    }
}

/// Parsed task properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProperties {
    #[serde(default)]
    pub identity_name: Option<String>,
    #[serde(default)]
    pub auto_purge: AutoPurge,
    /// Seconds; 0 means the engine default.
    #[serde(default)]
    pub transaction_timeout_secs: u64,
    #[serde(default)]
    pub suspend_transaction: bool,
    #[serde(default)]
    pub long_running: bool,
    /// Unrecognized keys, kept as given.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl TaskProperties {
    pub fn parse(props: &BTreeMap<String, String>) -> Result<Self, SchedulerError> {
        let mut parsed = Self::default();
        for (key, value) in props {
            match key.as_str() {
                keys::IDENTITY_NAME => parsed.identity_name = Some(value.clone()),
                keys::AUTO_PURGE => {
                    parsed.auto_purge = value
                        .parse()
                        .map_err(|_| SchedulerError::invalid(format!("{key}: {value}")))?;
                }
                keys::TRANSACTION_TIMEOUT => {
                    parsed.transaction_timeout_secs = value
                        .parse::<i32>()
                        .ok()
                        .and_then(|secs| u64::try_from(secs).ok())
                        .ok_or_else(|| SchedulerError::invalid(format!("{key}: {value}")))?;
                }
                keys::TRANSACTION_SUSPEND => parsed.suspend_transaction = is_true(value),
                keys::LONG_RUNNING => parsed.long_running = is_true(value),
                _ => {
                    parsed.extra.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(parsed)
    }

    pub fn name(&self) -> &str {
        self.identity_name.as_deref().unwrap_or("")
    }
}

fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// What a trigger sees of earlier executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    executions: u32,
    skips: u32,
    last: Option<LastExecution>,
}

impl ExecutionHistory {
    /// Completed executions, skips included.
    pub fn executions(&self) -> u32 {
        self.executions
    }

    pub fn skips(&self) -> u32 {
        self.skips
    }

    /// Executions that actually ran the workload.
    pub fn runs(&self) -> u32 {
        self.executions - self.skips
    }

    pub fn last(&self) -> Option<&LastExecution> {
        self.last.as_ref()
    }

    pub(crate) fn record(&mut self, last: LastExecution) {
        self.executions += 1;
        if last.skipped {
            self.skips += 1;
        }
        self.last = Some(last);
    }
}

/// The most recent completed execution, as passed to triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastExecution {
    pub identity_name: String,
    pub scheduled_start: DateTime<Utc>,
    pub run_start: Option<DateTime<Utc>>,
    pub run_end: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub skipped: bool,
}

/// Stored form of a successful attempt's return value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredResult {
    Value { value: Option<Value> },
    NotEncodable { type_name: String, cause: FailureRecord },
}

impl StoredResult {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value { value } => value.as_ref(),
            Self::NotEncodable { .. } => None,
        }
    }
}

/// Terminal outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success { result: StoredResult },
    Failure { cause: FailureRecord, aborted: bool, attempts: u32 },
    Skipped { cause: Option<FailureRecord> },
}

impl Outcome {
    pub fn state(&self) -> TaskState {
        match self {
            Self::Success { .. } => TaskState::Successful,
            Self::Failure { .. } => TaskState::Failed,
            Self::Skipped { .. } => TaskState::Skipped,
        }
    }
}

/// One completed execution of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Attempt number of the final attempt (0 for a skip).
    pub attempt: u32,
    pub scheduled: DateTime<Utc>,
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
    pub outcome: Outcome,
}

/// A task as kept by the store.
///
/// Everything except the lifecycle fields is fixed at submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub workload: Payload,
    pub trigger: Option<Payload>,
    pub plan: Plan,
    pub properties: TaskProperties,
    pub predetermined_result: Option<Value>,
    pub context: ContextBundle,
    pub submitted: DateTime<Utc>,

    // Lifecycle
    pub state: TaskState,
    /// `None` once the task has ended.
    pub next_run: Option<DateTime<Utc>>,
    /// Workload invocations so far, across all executions.
    pub attempts: u32,
    pub consecutive_failures: u32,
    pub history: ExecutionHistory,
    pub last_execution: Option<ExecutionRecord>,
    pub claimed_until: Option<DateTime<Utc>>,
    pub version: u64,
}

impl TaskRecord {
    pub fn is_ended(&self) -> bool {
        self.next_run.is_none()
    }

    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_time_unit_rounds_up() {
        assert_eq!(TimeUnit::Nanoseconds.to_millis(1), 1);
        assert_eq!(TimeUnit::Microseconds.to_millis(1_500), 2);
        assert_eq!(TimeUnit::Microseconds.to_millis(2_000), 2);
        assert_eq!(TimeUnit::Seconds.to_millis(3), 3_000);
        assert_eq!(TimeUnit::Nanoseconds.to_millis(0), 0);
        assert_eq!(TimeUnit::Days.to_millis(i64::MAX), i64::MAX);
    }

    #[test]
    fn test_parse_properties() {
        let parsed = TaskProperties::parse(&props(&[
            (keys::IDENTITY_NAME, "nightly"),
            (keys::AUTO_PURGE, "NEVER"),
            (keys::TRANSACTION_TIMEOUT, "5"),
            (keys::TRANSACTION_SUSPEND, "TRUE"),
            ("custom", "x"),
        ]))
        .unwrap();
        assert_eq!(parsed.name(), "nightly");
        assert_eq!(parsed.auto_purge, AutoPurge::Never);
        assert_eq!(parsed.transaction_timeout_secs, 5);
        assert!(parsed.suspend_transaction);
        assert_eq!(parsed.extra.get("custom").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_bad_timeout_names_key_and_value() {
        let err = TaskProperties::parse(&props(&[(keys::TRANSACTION_TIMEOUT, "-3")])).unwrap_err();
        assert_eq!(err.to_string(), "task.transaction-timeout: -3");
    }

    #[test]
    fn test_timeout_must_be_plain_int() {
        for value in ["18446744073709551615", "2147483648", " 5 ", "5s", ""] {
            let err = TaskProperties::parse(&props(&[(keys::TRANSACTION_TIMEOUT, value)])).unwrap_err();
            assert_eq!(err.to_string(), format!("task.transaction-timeout: {value}"));
        }
        let parsed = TaskProperties::parse(&props(&[(keys::TRANSACTION_TIMEOUT, "2147483647")])).unwrap();
        assert_eq!(parsed.transaction_timeout_secs, 2_147_483_647);
    }

    #[test]
    fn test_bad_auto_purge() {
        let err = TaskProperties::parse(&props(&[(keys::AUTO_PURGE, "sometimes")])).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument { .. }));
    }

    #[test]
    fn test_history_counts() {
        let mut history = ExecutionHistory::default();
        let now = Utc::now();
        let last = |skipped| LastExecution {
            identity_name: String::new(),
            scheduled_start: now,
            run_start: None,
            run_end: None,
            result: None,
            skipped,
        };
        history.record(last(false));
        history.record(last(true));
        assert_eq!(history.executions(), 2);
        assert_eq!(history.skips(), 1);
        assert_eq!(history.runs(), 1);
        assert!(history.last().unwrap().skipped);
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("successful".parse::<TaskState>().unwrap(), TaskState::Successful);
        assert!("done".parse::<TaskState>().is_err());
    }
}
