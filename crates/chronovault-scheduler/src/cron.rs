//! Lightweight cron expression parser and a durable cron trigger.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Field syntax: *, */N, N, A-B, A-B/N and comma lists of those.
//! Example: "0 8 * * 1-5" = weekdays at 8:00 UTC

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{Durable, Tagged};
use crate::failure::Failure;
use crate::tasks::ExecutionHistory;
use crate::trigger::Trigger;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    any_dom: bool,
    any_dow: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid cron expression '{expression}': {reason}")]
pub struct CronError {
    expression: String,
    reason: String,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let err = |reason: &str| CronError { expression: expression.to_string(), reason: reason.to_string() };
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(err("need 5 fields: MIN HOUR DOM MON DOW"));
        }

        let minutes = parse_field(parts[0], 0, 59).ok_or_else(|| err("bad minute field"))?;
        let hours = parse_field(parts[1], 0, 23).ok_or_else(|| err("bad hour field"))?;
        let days_of_month = parse_field(parts[2], 1, 31).ok_or_else(|| err("bad day-of-month field"))?;
        let months = parse_field(parts[3], 1, 12).ok_or_else(|| err("bad month field"))?;
        // 7 is an alias for Sunday.
        let mut days_of_week = parse_field(parts[4], 0, 7).ok_or_else(|| err("bad day-of-week field"))?;
        if days_of_week.contains(&7) {
            days_of_week.retain(|d| *d != 7);
            if !days_of_week.contains(&0) {
                days_of_week.insert(0, 0);
            }
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            any_dom: parts[2] == "*",
            any_dow: parts[4] == "*",
        })
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        if !self.months.contains(&t.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(&t.day());
        let dow = self.days_of_week.contains(&t.weekday().num_days_from_sunday());
        // Classic cron: when both day fields are restricted, either may match.
        match (self.any_dom, self.any_dow) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }

    /// First matching minute strictly after `after`, searching up to 5 years ahead.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1)).with_second(0)?.with_nanosecond(0)?;
        let limit = after + Duration::days(5 * 366);

        while candidate <= limit {
            if !self.day_matches(&candidate) {
                // Jump to the start of the next day.
                candidate = (candidate + Duration::days(1)).with_hour(0)?.with_minute(0)?;
                continue;
            }
            if !self.hours.contains(&candidate.hour()) {
                candidate = (candidate + Duration::hours(1)).with_minute(0)?;
                continue;
            }
            if self.minutes.contains(&candidate.minute()) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }

        None
    }
}

/// Parse a cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        let part = part.trim();
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let n: u32 = step.parse().ok()?;
                if n == 0 {
                    return None;
                }
                (range, n as usize)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse().ok()?, b.parse().ok()?)
        } else {
            let n: u32 = range.parse().ok()?;
            // "N/S" means N through max in steps of S.
            if step > 1 { (n, max) } else { (n, n) }
        };

        if lo < min || hi > max || lo > hi {
            return None;
        }
        values.extend((lo..=hi).step_by(step));
    }
    values.sort_unstable();
    values.dedup();
    Some(values)
}

/// Durable trigger that fires on a cron schedule, optionally a bounded number of times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronTrigger {
    pub expression: String,
    #[serde(default)]
    pub max_runs: Option<u32>,
}

impl CronTrigger {
    pub fn new(expression: impl Into<String>) -> Result<Self, CronError> {
        let expression = expression.into();
        CronSchedule::parse(&expression)?;
        Ok(Self { expression, max_runs: None })
    }

    pub fn limit(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }
}

impl Tagged for CronTrigger {
    const TAG: &'static str = "chronovault.cron";
}

impl Trigger for CronTrigger {
    fn next_run_time(
        &self,
        history: &ExecutionHistory,
        scheduled: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, Failure> {
        if self.max_runs.is_some_and(|max| history.executions() >= max) {
            return Ok(None);
        }
        let schedule = CronSchedule::parse(&self.expression)?;
        // Runs missed while no scheduler was up are not replayed.
        Ok(schedule.next_after(scheduled.max(Utc::now())))
    }

    fn durable(&self) -> Option<&dyn Durable> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn next_run(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        CronSchedule::parse(expression).ok()?.next_after(after)
    }

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_run("0 * * * *", after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_run("0 8 * * *", after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_run("*/15 * * * *", after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_weekdays_only() {
        // 2026-02-21 is a Saturday
        let after = Utc.with_ymd_and_hms(2026, 2, 21, 9, 0, 0).unwrap();
        let next = next_run("0 8 * * 1-5", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 2, 23, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_month_and_day() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 0, 0, 0).unwrap();
        let next = next_run("30 6 1 6 *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 6, 1, 6, 30, 0).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let after = Utc::now();
        assert!(next_run("bad", after).is_none());
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
    }

    #[test]
    fn test_trigger_run_limit() {
        let trigger = CronTrigger::new("* * * * *").unwrap().limit(0);
        assert_eq!(trigger.next_run_time(&ExecutionHistory::default(), Utc::now()).unwrap(), None);
        let open = CronTrigger::new("* * * * *").unwrap();
        assert!(open.next_run_time(&ExecutionHistory::default(), Utc::now()).unwrap().is_some());
        assert!(open.durable().is_some());
    }
}
