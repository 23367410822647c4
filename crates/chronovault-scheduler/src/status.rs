//! Task status snapshots and status queries.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::store::TaskFilter;
use crate::tasks::{Outcome, StoredResult, TaskId, TaskRecord, TaskState};

/// Point-in-time view of a task.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    id: TaskId,
    name: String,
    state: TaskState,
    next_run: Option<DateTime<Utc>>,
    submitted: DateTime<Utc>,
    attempts: u32,
    outcome: Option<Outcome>,
}

impl TaskStatus {
    pub(crate) fn project(record: &TaskRecord, now: DateTime<Utc>) -> Self {
        let state = if record.state != TaskState::Cancelled && !record.is_ended() && record.is_claimed(now) {
            TaskState::Running
        } else {
            record.state
        };
        Self {
            id: record.id,
            name: record.name.clone(),
            state,
            next_run: record.next_run,
            submitted: record.submitted,
            attempts: record.attempts,
            outcome: record.last_execution.as_ref().map(|e| e.outcome.clone()),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn next_execution_time(&self) -> Option<DateTime<Utc>> {
        self.next_run
    }

    pub fn submitted(&self) -> DateTime<Utc> {
        self.submitted
    }

    /// Workload invocations so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether an execution has reached a terminal outcome.
    pub fn has_result(&self) -> bool {
        self.outcome.is_some()
    }

    /// No further executions will happen.
    pub fn is_done(&self) -> bool {
        self.next_run.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == TaskState::Cancelled
    }

    /// Result of the most recent execution, even if more are planned.
    pub fn result(&self) -> Result<Option<Value>> {
        if self.is_cancelled() {
            return Err(SchedulerError::Cancelled(self.id));
        }
        match &self.outcome {
            None => Err(SchedulerError::IllegalState(format!("task {} has no result yet", self.id))),
            Some(Outcome::Success { result: StoredResult::Value { value } }) => Ok(value.clone()),
            Some(Outcome::Success { result: StoredResult::NotEncodable { type_name, cause } }) => {
                Err(SchedulerError::ResultNotEncodable {
                    task_id: self.id,
                    type_name: type_name.clone(),
                    cause: cause.clone(),
                })
            }
            Some(Outcome::Failure { cause, aborted: true, attempts }) => Err(SchedulerError::Aborted {
                task_id: self.id,
                attempts: *attempts,
                cause: cause.clone(),
            }),
            Some(Outcome::Failure { cause, aborted: false, attempts }) => Err(SchedulerError::Execution {
                task_id: self.id,
                attempts: *attempts,
                cause: cause.clone(),
            }),
            Some(Outcome::Skipped { cause }) => {
                Err(SchedulerError::Skipped { task_id: self.id, cause: cause.clone() })
            }
        }
    }

    /// Final result. Refused while further executions are planned.
    pub fn get(&self) -> Result<Option<Value>> {
        if !self.is_done() {
            return Err(SchedulerError::IllegalState(format!(
                "task {} has executions remaining; use result() for the latest one",
                self.id
            )));
        }
        self.result()
    }

    pub fn result_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        decode(self.result()?)
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        decode(self.get()?)
    }
}

fn decode<T: DeserializeOwned>(value: Option<Value>) -> Result<Option<T>> {
    value.map(serde_json::from_value).transpose().map_err(SchedulerError::ResultDecode)
}

/// State criterion of a [`StatusQuery`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    #[default]
    Any,
    /// No executions remain.
    Ended,
    State(TaskState),
}

impl StateFilter {
    fn matches(&self, status: &TaskStatus) -> bool {
        match self {
            Self::Any => true,
            Self::Ended => status.is_done(),
            Self::State(state) => status.state == *state,
        }
    }
}

/// Selection of tasks by name pattern, state and submit time.
#[derive(Debug, Clone)]
pub struct StatusQuery {
    pub pattern: Option<String>,
    pub escape: Option<char>,
    pub state: StateFilter,
    /// Select tasks in `state` when true, outside it when false.
    pub include: bool,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_id: Option<TaskId>,
    pub limit: Option<usize>,
}

impl Default for StatusQuery {
    fn default() -> Self {
        Self {
            pattern: None,
            escape: None,
            state: StateFilter::Any,
            include: true,
            since: None,
            until: None,
            min_id: None,
            limit: None,
        }
    }
}

impl StatusQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// Tasks whose identity name matches a `LIKE` pattern.
    pub fn named(pattern: impl Into<String>) -> Self {
        Self { pattern: Some(pattern.into()), ..Self::default() }
    }

    pub fn escape(mut self, escape: char) -> Self {
        self.escape = Some(escape);
        self
    }

    pub fn in_state(mut self, state: StateFilter) -> Self {
        self.state = state;
        self.include = true;
        self
    }

    pub fn not_in_state(mut self, state: StateFilter) -> Self {
        self.state = state;
        self.include = false;
        self
    }

    pub fn submitted_between(mut self, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn to_filter(&self) -> TaskFilter {
        TaskFilter {
            pattern: self.pattern.clone(),
            escape: self.escape,
            submitted_since: self.since,
            submitted_until: self.until,
            min_id: self.min_id,
        }
    }

    pub(crate) fn admits(&self, status: &TaskStatus) -> bool {
        self.state.matches(status) == self.include
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureRecord;
    use crate::store::tests::record;
    use crate::tasks::ExecutionRecord;

    fn finished(outcome: Outcome) -> TaskRecord {
        let mut rec = record("t");
        let now = Utc::now();
        rec.id = 7;
        rec.state = outcome.state();
        rec.next_run = None;
        rec.last_execution =
            Some(ExecutionRecord { attempt: 1, scheduled: now, started: now, ended: now, outcome });
        rec
    }

    #[test]
    fn test_pending_has_no_result() {
        let status = TaskStatus::project(&record("t"), Utc::now());
        assert!(!status.has_result());
        assert!(!status.is_done());
        assert!(matches!(status.get(), Err(SchedulerError::IllegalState(_))));
        assert!(matches!(status.result(), Err(SchedulerError::IllegalState(_))));
    }

    #[test]
    fn test_success_value() {
        let outcome = Outcome::Success { result: StoredResult::Value { value: Some(serde_json::json!(42)) } };
        let status = TaskStatus::project(&finished(outcome), Utc::now());
        assert_eq!(status.state(), TaskState::Successful);
        assert_eq!(status.get_as::<u32>().unwrap(), Some(42));
    }

    #[test]
    fn test_aborted_message() {
        let outcome = Outcome::Failure {
            cause: FailureRecord::new("TransactionRolledBack", "x"),
            aborted: true,
            attempts: 2,
        };
        let err = TaskStatus::project(&finished(outcome), Utc::now()).get().unwrap_err();
        assert!(err.to_string().contains("task 7 aborted after 2 "), "{err}");
    }

    #[test]
    fn test_not_encodable_result() {
        let outcome = Outcome::Success {
            result: StoredResult::NotEncodable {
                type_name: "Opaque".into(),
                cause: FailureRecord::new("EncodeError", "nope"),
            },
        };
        let status = TaskStatus::project(&finished(outcome), Utc::now());
        assert!(status.is_done());
        assert!(!status.is_cancelled());
        assert!(matches!(status.get(), Err(SchedulerError::ResultNotEncodable { .. })));
    }

    #[test]
    fn test_claim_projects_running() {
        let mut rec = record("t");
        rec.claimed_until = Some(Utc::now() + chrono::Duration::seconds(30));
        assert_eq!(TaskStatus::project(&rec, Utc::now()).state(), TaskState::Running);
    }

    #[test]
    fn test_query_admits() {
        let status = TaskStatus::project(&record("t"), Utc::now());
        assert!(StatusQuery::all().admits(&status));
        assert!(!StatusQuery::all().in_state(StateFilter::Ended).admits(&status));
        assert!(StatusQuery::all().not_in_state(StateFilter::Ended).admits(&status));
        assert!(StatusQuery::all().in_state(StateFilter::State(TaskState::Scheduled)).admits(&status));
    }
}
