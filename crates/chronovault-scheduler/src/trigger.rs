//! Trigger engine: when a task runs next, and whether a run is skipped.
//!
//! ```text
//! submit ──first_run──▶ SCHEDULED ──skip?──▶ SKIPPED ──next_run──▶ SCHEDULED | ended
//!                           │
//!                           └──attempt──▶ SUCCESSFUL ──next_run──▶ SCHEDULED | ended
//!                                     └─▶ failure ──retry (same time) | FAILED
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::Durable;
use crate::error::SchedulerError;
use crate::failure::{Failure, FailureRecord};
use crate::tasks::{ExecutionHistory, TimeUnit};

/// User-supplied schedule.
pub trait Trigger: Send + Sync + 'static {
    /// Next run after the execution scheduled at `scheduled`, or `None` when
    /// no more executions are wanted. At submission `history` is empty and
    /// `scheduled` is the submit time.
    fn next_run_time(
        &self,
        history: &ExecutionHistory,
        scheduled: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, Failure>;

    /// Whether the execution due at `scheduled` should be skipped.
    fn skip_run(&self, history: &ExecutionHistory, scheduled: DateTime<Utc>) -> Result<bool, Failure> {
        let _ = (history, scheduled);
        Ok(false)
    }

    fn durable(&self) -> Option<&dyn Durable> {
        None
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// How a task's executions are timed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Plan {
    OneShot { delay_ms: i64 },
    /// Each execution is due one period after the previous one was due.
    FixedRate { initial_delay_ms: i64, period_ms: i64 },
    /// Each execution is due one delay after the previous one ended.
    FixedDelay { initial_delay_ms: i64, delay_ms: i64 },
    Triggered,
}

/// Skip decision for a due execution.
#[derive(Debug)]
pub enum SkipDecision {
    Run,
    /// Skipped; carries the failure when the trigger's skip check failed.
    Skip(Option<Failure>),
}

impl Plan {
    pub fn one_shot(delay: i64, unit: TimeUnit) -> Self {
        Self::OneShot { delay_ms: unit.to_millis(delay).max(0) }
    }

    pub fn fixed_rate(initial_delay: i64, period: i64, unit: TimeUnit) -> Result<Self, SchedulerError> {
        if period <= 0 {
            return Err(SchedulerError::invalid(period.to_string()));
        }
        Ok(Self::FixedRate {
            initial_delay_ms: unit.to_millis(initial_delay).max(0),
            period_ms: unit.to_millis(period),
        })
    }

    pub fn fixed_delay(initial_delay: i64, delay: i64, unit: TimeUnit) -> Result<Self, SchedulerError> {
        if delay <= 0 {
            return Err(SchedulerError::invalid(delay.to_string()));
        }
        Ok(Self::FixedDelay {
            initial_delay_ms: unit.to_millis(initial_delay).max(0),
            delay_ms: unit.to_millis(delay),
        })
    }

    /// First execution time, computed at submission.
    pub(crate) fn first_run(
        &self,
        trigger: Option<&dyn Trigger>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, SchedulerError> {
        match self {
            Self::OneShot { delay_ms: ms }
            | Self::FixedRate { initial_delay_ms: ms, .. }
            | Self::FixedDelay { initial_delay_ms: ms, .. } => {
                offset(now, *ms).ok_or_else(|| SchedulerError::invalid(ms.to_string()))
            }
            Self::Triggered => {
                let trigger = trigger.ok_or(SchedulerError::NullArgument("trigger"))?;
                match trigger.next_run_time(&ExecutionHistory::default(), now) {
                    Ok(Some(at)) => Ok(at),
                    Ok(None) => Err(SchedulerError::rejected(format!(
                        "{}.next_run_time: None",
                        trigger.type_name()
                    ))),
                    Err(failure) => Err(SchedulerError::RejectedExecution {
                        message: failure.to_string(),
                        cause: Some(FailureRecord::capture(&failure)),
                    }),
                }
            }
        }
    }

    /// Skip check before an execution. Only triggers skip.
    pub(crate) fn skip(
        &self,
        trigger: Option<&dyn Trigger>,
        history: &ExecutionHistory,
        scheduled: DateTime<Utc>,
    ) -> SkipDecision {
        let Some(trigger) = trigger else {
            return SkipDecision::Run;
        };
        match trigger.skip_run(history, scheduled) {
            Ok(false) => SkipDecision::Run,
            Ok(true) => SkipDecision::Skip(None),
            Err(failure) => SkipDecision::Skip(Some(failure)),
        }
    }

    /// Next execution after one that was due at `scheduled` and ended at
    /// `ended`. `history` already includes that execution.
    pub(crate) fn next_run(
        &self,
        trigger: Option<&dyn Trigger>,
        history: &ExecutionHistory,
        scheduled: DateTime<Utc>,
        ended: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, Failure> {
        match self {
            Self::OneShot { .. } => Ok(None),
            Self::FixedRate { period_ms, .. } => offset_or_fail(scheduled, *period_ms).map(Some),
            Self::FixedDelay { delay_ms, .. } => offset_or_fail(ended, *delay_ms).map(Some),
            Self::Triggered => {
                let trigger =
                    trigger.ok_or_else(|| Failure::new("IllegalState", "trigger is not available"))?;
                trigger.next_run_time(history, scheduled)
            }
        }
    }
}

/// `at` plus `ms` milliseconds, `None` past the representable range.
fn offset(at: DateTime<Utc>, ms: i64) -> Option<DateTime<Utc>> {
    Duration::try_milliseconds(ms).and_then(|delta| at.checked_add_signed(delta))
}

fn offset_or_fail(at: DateTime<Utc>, ms: i64) -> Result<DateTime<Utc>, Failure> {
    offset(at, ms).ok_or_else(|| Failure::new("ArithmeticException", format!("{at} + {ms}ms is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Never;

    impl Trigger for Never {
        fn next_run_time(&self, _: &ExecutionHistory, _: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, Failure> {
            Ok(None)
        }
    }

    struct Broken;

    impl Trigger for Broken {
        fn next_run_time(&self, _: &ExecutionHistory, _: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, Failure> {
            Err(Failure::new("ArithmeticException", "divide by zero"))
        }

        fn skip_run(&self, _: &ExecutionHistory, _: DateTime<Utc>) -> Result<bool, Failure> {
            Err(Failure::msg("cannot decide"))
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_negative_delay_runs_now() {
        let plan = Plan::one_shot(-5, TimeUnit::Seconds);
        assert_eq!(plan.first_run(None, t0()).unwrap(), t0());
    }

    #[test]
    fn test_zero_period_rejected() {
        let err = Plan::fixed_rate(0, 0, TimeUnit::Seconds).unwrap_err();
        assert_eq!(err.to_string(), "0");
        let err = Plan::fixed_delay(0, -2, TimeUnit::Minutes).unwrap_err();
        assert_eq!(err.to_string(), "-2");
    }

    #[test]
    fn test_fixed_rate_vs_fixed_delay() {
        let history = ExecutionHistory::default();
        let ended = t0() + Duration::seconds(3);
        let rate = Plan::fixed_rate(0, 10, TimeUnit::Seconds).unwrap();
        let delay = Plan::fixed_delay(0, 10, TimeUnit::Seconds).unwrap();
        assert_eq!(rate.next_run(None, &history, t0(), ended).unwrap(), Some(t0() + Duration::seconds(10)));
        assert_eq!(delay.next_run(None, &history, t0(), ended).unwrap(), Some(ended + Duration::seconds(10)));
        assert!(Plan::one_shot(0, TimeUnit::Seconds).next_run(None, &history, t0(), ended).unwrap().is_none());
    }

    #[test]
    fn test_unrepresentable_times_do_not_panic() {
        let far = Plan::one_shot(i64::MAX, TimeUnit::Days);
        let err = far.first_run(None, t0()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument { .. }));
        assert_eq!(err.to_string(), i64::MAX.to_string());
        assert!(Plan::fixed_rate(i64::MAX, 1, TimeUnit::Hours).unwrap().first_run(None, t0()).is_err());

        let history = ExecutionHistory::default();
        let rate = Plan::fixed_rate(0, i64::MAX, TimeUnit::Milliseconds).unwrap();
        let failure = rate.next_run(None, &history, t0(), t0()).unwrap_err();
        assert_eq!(failure.type_name(), "ArithmeticException");
        let delay = Plan::fixed_delay(0, i64::MAX / 2, TimeUnit::Seconds).unwrap();
        assert!(delay.next_run(None, &history, t0(), t0()).is_err());
    }

    #[test]
    fn test_trigger_without_first_run_is_rejected() {
        let err = Plan::Triggered.first_run(Some(&Never), t0()).unwrap_err();
        assert!(matches!(err, SchedulerError::RejectedExecution { .. }));
        assert!(err.to_string().ends_with("next_run_time: None"));
    }

    #[test]
    fn test_trigger_failure_is_rejected_with_cause() {
        let err = Plan::Triggered.first_run(Some(&Broken), t0()).unwrap_err();
        assert_eq!(err.cause().map(|c| c.type_name.as_str()), Some("ArithmeticException"));
    }

    #[test]
    fn test_missing_trigger() {
        let err = Plan::Triggered.first_run(None, t0()).unwrap_err();
        assert!(matches!(err, SchedulerError::NullArgument("trigger")));
    }

    #[test]
    fn test_skip_failure_is_a_skip() {
        let decision = Plan::Triggered.skip(Some(&Broken), &ExecutionHistory::default(), t0());
        assert!(matches!(decision, SkipDecision::Skip(Some(_))));
        assert!(matches!(Plan::Triggered.skip(Some(&Never), &ExecutionHistory::default(), t0()), SkipDecision::Run));
    }
}
