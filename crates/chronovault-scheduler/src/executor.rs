//! Transactional execution coordinator.
//!
//! Runs one due execution of a task:
//!
//! ```text
//! claim ─▶ decode ─▶ skip? ──yes──▶ record skip ─▶ next run
//!                      │
//!                      no
//!                      ▼
//!          begin tx ─▶ workload ─▶ next run ─▶ encode result ─▶ commit (store write is primary)
//!                         │            │                            │
//!                         └── failure ─┴──── rollback ◀─────────────┘
//!                                               │
//!                              retry same time, or terminal after the failure limit
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chronovault_core::SchedulerConfig;

use crate::codec::{Codecs, Payload};
use crate::context::{Directory, TaskContext};
use crate::failure::{Failure, FailureRecord};
use crate::purge::should_purge;
use crate::store::TaskStore;
use crate::tasks::{ExecutionRecord, LastExecution, Outcome, StoredResult, TaskId, TaskRecord, TaskState};
use crate::transaction::{
    Association, ROLLBACK_CAUSE, TIMEOUT_CAUSE, TransactionManager, TxError, TxResource,
};
use crate::trigger::{SkipDecision, Trigger};
use crate::workload::Workload;

/// Failure type recorded when a task record changed under a running attempt.
pub const VERSION_CONFLICT: &str = "ConcurrentModification";

const STORE_BACKOFF: Duration = Duration::from_secs(1);

/// What the driver of a task should do after an execution step.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Reload the record and carry on.
    Continue,
    Wait(Duration),
    /// The task has ended or is gone.
    Finished,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Workloads and triggers that only live in this process.
#[derive(Clone, Default)]
pub(crate) struct TransientParts {
    pub workload: Option<Arc<dyn Workload>>,
    pub trigger: Option<Arc<dyn Trigger>>,
}

#[derive(Default)]
pub(crate) struct Transients(Mutex<HashMap<TaskId, TransientParts>>);

impl Transients {
    pub fn insert(&self, id: TaskId, parts: TransientParts) {
        lock(&self.0).insert(id, parts);
    }

    pub fn get(&self, id: TaskId) -> TransientParts {
        lock(&self.0).get(&id).cloned().unwrap_or_default()
    }

    pub fn remove(&self, id: TaskId) {
        lock(&self.0).remove(&id);
    }
}

/// Interrupt flags of attempts in progress.
#[derive(Default)]
pub(crate) struct Interrupts(Mutex<HashMap<TaskId, Arc<AtomicBool>>>);

impl Interrupts {
    fn register(&self, id: TaskId) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        lock(&self.0).insert(id, flag.clone());
        flag
    }

    fn unregister(&self, id: TaskId) {
        lock(&self.0).remove(&id);
    }

    /// Raise the flag of a running attempt. Returns whether one was running.
    pub fn signal(&self, id: TaskId) -> bool {
        match lock(&self.0).get(&id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// The store write recording an execution, enlisted as primary resource.
struct RecordWrite {
    store: Arc<dyn TaskStore>,
    record: TaskRecord,
    purge: bool,
}

impl TxResource for RecordWrite {
    fn commit(&mut self) -> Result<(), Failure> {
        let written = if self.purge {
            self.store.remove_version(self.record.id, self.record.version)?
        } else {
            self.store.update(&mut self.record)?
        };
        if written {
            Ok(())
        } else {
            Err(Failure::new(
                VERSION_CONFLICT,
                format!("task {} was modified concurrently", self.record.id),
            ))
        }
    }

    fn rollback(&mut self) {}
}

struct Parts {
    workload: Arc<dyn Workload>,
    trigger: Option<Arc<dyn Trigger>>,
}

pub(crate) struct Coordinator {
    pub store: Arc<dyn TaskStore>,
    pub codecs: Codecs,
    pub transactions: Arc<dyn TransactionManager>,
    pub directory: Arc<dyn Directory>,
    pub config: SchedulerConfig,
    pub transients: Transients,
    pub interrupts: Interrupts,
}

impl Coordinator {
    fn timeout_for(&self, record: &TaskRecord) -> Duration {
        match record.properties.transaction_timeout_secs {
            0 => self.config.default_transaction_timeout(),
            secs => Duration::from_secs(secs),
        }
    }

    /// Run the execution of task `id` that is due now, if any.
    pub async fn execute(&self, id: TaskId) -> Step {
        let now = Utc::now();
        let mut record = match self.store.find(id) {
            Ok(Some(record)) => record,
            Ok(None) => return Step::Finished,
            Err(e) => {
                tracing::warn!("⚠️ Task {id}: failed to load record: {e}");
                return Step::Wait(STORE_BACKOFF);
            }
        };
        let Some(scheduled) = record.next_run else {
            return Step::Finished;
        };
        if scheduled > now {
            return Step::Continue;
        }
        if let Some(until) = record.claimed_until.filter(|until| *until > now) {
            return Step::Wait((until - now).to_std().unwrap_or_default());
        }

        let timeout = self.timeout_for(&record);
        let lease = timeout.saturating_add(Duration::from_secs(self.config.claim_margin_secs));
        record.claimed_until = Some(lease_until(now, lease));
        match self.store.update(&mut record) {
            Ok(true) => {}
            Ok(false) => return Step::Continue,
            Err(e) => {
                tracing::warn!("⚠️ Task {id}: failed to claim: {e}");
                return Step::Wait(STORE_BACKOFF);
            }
        }
        tracing::debug!("Task {id} claimed for execution due at {scheduled}");

        let parts = match self.load_parts(&record) {
            Ok(parts) => parts,
            Err(failure) => return self.fail(record, scheduled, FailureRecord::capture(&failure), false),
        };

        match record.plan.skip(parts.trigger.as_deref(), &record.history, scheduled) {
            SkipDecision::Run => self.attempt(record, parts, scheduled, timeout).await,
            SkipDecision::Skip(cause) => self.skip(record, &parts, scheduled, cause),
        }
    }

    fn load_parts(&self, record: &TaskRecord) -> Result<Parts, Failure> {
        let transient = self.transients.get(record.id);
        let unavailable =
            |type_name: &str| Failure::new("ClassNotFoundException", format!("{type_name} is not available in this process"));

        let workload = match &record.workload {
            Payload::Durable { tag, value } => self.codecs.decode_workload(tag, value)?,
            Payload::Transient { type_name } => transient.workload.clone().ok_or_else(|| unavailable(type_name))?,
        };
        let trigger = match &record.trigger {
            None => None,
            Some(Payload::Durable { tag, value }) => Some(self.codecs.decode_trigger(tag, value)?),
            Some(Payload::Transient { type_name }) => {
                Some(transient.trigger.clone().ok_or_else(|| unavailable(type_name))?)
            }
        };
        Ok(Parts { workload, trigger })
    }

    fn skip(&self, mut record: TaskRecord, parts: &Parts, scheduled: DateTime<Utc>, cause: Option<Failure>) -> Step {
        let id = record.id;
        let now = Utc::now();
        let cause = cause.as_ref().map(FailureRecord::capture);
        match &cause {
            Some(cause) => tracing::debug!("Task {id} skipped, skip check failed: {cause}"),
            None => tracing::debug!("Task {id} execution due at {scheduled} skipped"),
        }

        let base = record.clone();
        record.history.record(LastExecution {
            identity_name: record.name.clone(),
            scheduled_start: scheduled,
            run_start: None,
            run_end: None,
            result: None,
            skipped: true,
        });
        let next = match record.plan.next_run(parts.trigger.as_deref(), &record.history, scheduled, now) {
            Ok(next) => next,
            Err(failure) => return self.fail(base, scheduled, FailureRecord::capture(&failure), false),
        };

        let outcome = Outcome::Skipped { cause };
        let purge = next.is_none() && should_purge(record.properties.auto_purge, Some(&outcome));
        record.state = if next.is_some() { TaskState::Scheduled } else { outcome.state() };
        record.next_run = next;
        record.consecutive_failures = 0;
        record.claimed_until = None;
        record.last_execution = Some(ExecutionRecord { attempt: 0, scheduled, started: now, ended: now, outcome });

        let mut assoc = Association::default();
        match self.commit_record(&mut assoc, record, purge) {
            Ok(()) => self.committed(id, next, purge),
            Err(e) => self.write_failed(id, e),
        }
    }

    async fn attempt(&self, mut record: TaskRecord, parts: Parts, scheduled: DateTime<Utc>, timeout: Duration) -> Step {
        let id = record.id;
        record.attempts += 1;
        let attempt = record.attempts;
        let base = record.clone();
        let started = Utc::now();

        let mut assoc = Association::default();
        let tx = match self.transactions.begin(&mut assoc, timeout) {
            Ok(tx) => tx,
            Err(e) => return self.fail(base, scheduled, e.to_record(), false),
        };
        // With suspend set, the workload gets a transaction of its own.
        let (workload_tx, suspended) = if record.properties.suspend_transaction {
            let outer = self.transactions.suspend(&mut assoc);
            match self.transactions.begin(&mut assoc, timeout) {
                Ok(inner) => (inner, outer),
                Err(e) => {
                    if let Some(outer) = outer {
                        let _ = outer.rollback();
                    }
                    return self.fail(base, scheduled, e.to_record(), false);
                }
            }
        } else {
            (tx, None)
        };

        let interrupted = self.interrupts.register(id);
        let workload_tx_id = workload_tx.id();
        let ctx = TaskContext::new(
            id,
            record.name.clone(),
            attempt,
            scheduled,
            workload_tx,
            record.context.clone(),
            self.directory.clone(),
            interrupted.clone(),
        );
        let workload = parts.workload.clone();
        tracing::debug!("Task {id} attempt {attempt} started");
        let running = tokio::task::spawn_blocking(move || workload.call(&ctx));
        let joined = tokio::time::timeout(timeout, running).await;
        self.interrupts.unregister(id);
        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Failure::new("Panic", e.to_string())),
            Err(_) => {
                // The worker thread cannot be stopped; it is only told to give up.
                interrupted.store(true, Ordering::SeqCst);
                tracing::warn!("⚠️ Task {id} attempt {attempt} still running after {}s, rolling back", timeout.as_secs_f64());
                let _ = self.transactions.rollback(&mut assoc);
                if let Some(outer) = suspended {
                    let _ = outer.rollback();
                }
                let cause = TxError::RolledBack {
                    id: workload_tx_id,
                    cause: Some(FailureRecord::new(
                        TIMEOUT_CAUSE,
                        format!("transaction {workload_tx_id} timed out after {}s", timeout.as_secs_f64()),
                    )),
                };
                return self.fail(base, scheduled, cause.to_record(), true);
            }
        };
        let ended = Utc::now();

        if let Some(outer) = suspended {
            let finished = match &result {
                Ok(_) => self.transactions.commit(&mut assoc),
                Err(_) => self.transactions.rollback(&mut assoc),
            };
            if let Err(e) = self.transactions.resume(&mut assoc, outer) {
                return self.fail(base, scheduled, e.to_record(), false);
            }
            if let Err(e) = finished {
                let _ = self.transactions.rollback(&mut assoc);
                let aborted = rolled_back_by_transaction(&e);
                return self.fail(base, scheduled, e.to_record(), aborted);
            }
        }

        let output = match result {
            Ok(output) => output,
            Err(failure) => {
                tracing::debug!("Task {id} attempt {attempt} failed: {failure}");
                let _ = self.transactions.rollback(&mut assoc);
                return self.fail(base, scheduled, FailureRecord::capture(&failure), false);
            }
        };

        let stored = match &record.predetermined_result {
            Some(value) => StoredResult::Value { value: Some(value.clone()) },
            None => match output.encode() {
                Ok(value) => StoredResult::Value { value },
                Err(e) => {
                    let type_name = output.type_name().unwrap_or("()").to_string();
                    tracing::debug!("Task {id} result {type_name} is not encodable: {e}");
                    StoredResult::NotEncodable { type_name, cause: FailureRecord::capture(&Failure::from(e)) }
                }
            },
        };

        record.history.record(LastExecution {
            identity_name: record.name.clone(),
            scheduled_start: scheduled,
            run_start: Some(started),
            run_end: Some(ended),
            result: stored.value().cloned(),
            skipped: false,
        });
        let next = match record.plan.next_run(parts.trigger.as_deref(), &record.history, scheduled, ended) {
            Ok(next) => next,
            Err(failure) => {
                tracing::debug!("Task {id} trigger failed after attempt {attempt}: {failure}");
                let _ = self.transactions.rollback(&mut assoc);
                return self.fail(base, scheduled, FailureRecord::capture(&failure), false);
            }
        };

        let outcome = Outcome::Success { result: stored };
        let purge = next.is_none() && should_purge(record.properties.auto_purge, Some(&outcome));
        record.state = if next.is_some() { TaskState::Scheduled } else { outcome.state() };
        record.next_run = next;
        record.consecutive_failures = 0;
        record.claimed_until = None;
        record.last_execution = Some(ExecutionRecord { attempt, scheduled, started, ended, outcome });

        match self.commit_record(&mut assoc, record, purge) {
            Ok(()) => {
                tracing::info!("✅ Task {id} attempt {attempt} succeeded");
                self.committed(id, next, purge)
            }
            Err(e) if e.caused_by(VERSION_CONFLICT) => {
                tracing::debug!("Task {id} changed during attempt {attempt}; outcome discarded");
                Step::Continue
            }
            Err(e @ TxError::Heuristic { .. }) => {
                tracing::warn!("⚠️ Task {id}: {e}");
                self.committed(id, next, purge)
            }
            Err(e) => {
                tracing::debug!("Task {id} attempt {attempt} rolled back: {e}");
                let aborted = rolled_back_by_transaction(&e);
                self.fail(base, scheduled, e.to_record(), aborted)
            }
        }
    }

    /// Record a failed attempt: retry the same execution or end the task.
    fn fail(&self, mut record: TaskRecord, scheduled: DateTime<Utc>, cause: FailureRecord, aborted: bool) -> Step {
        let id = record.id;
        let limit = self.config.failure_limit;
        record.consecutive_failures += 1;
        record.claimed_until = None;
        let failures = record.consecutive_failures;

        if failures < limit {
            tracing::warn!("⚠️ Task {id} failed ({failures}/{limit}), will retry: {cause}");
            let mut assoc = Association::default();
            return match self.commit_record(&mut assoc, record, false) {
                Ok(()) => Step::Wait(self.config.retry_interval()),
                Err(e) => self.write_failed(id, e),
            };
        }

        tracing::warn!("⚠️ Task {id} failed after {failures} consecutive attempts: {cause}");
        let now = Utc::now();
        let outcome = Outcome::Failure { cause, aborted, attempts: failures };
        let purge = should_purge(record.properties.auto_purge, Some(&outcome));
        record.state = TaskState::Failed;
        record.next_run = None;
        record.last_execution = Some(ExecutionRecord {
            attempt: record.attempts,
            scheduled,
            started: now,
            ended: now,
            outcome,
        });

        let mut assoc = Association::default();
        match self.commit_record(&mut assoc, record, purge) {
            Ok(()) => self.committed(id, None, purge),
            Err(e) => self.write_failed(id, e),
        }
    }

    /// Enlist the record write in the associated transaction (or a new one) and commit.
    fn commit_record(&self, assoc: &mut Association, record: TaskRecord, purge: bool) -> Result<(), TxError> {
        let tx = match assoc.current() {
            Some(tx) => tx.clone(),
            None => self.transactions.begin(assoc, self.config.default_transaction_timeout())?,
        };
        tx.enlist_primary(Box::new(RecordWrite { store: self.store.clone(), record, purge }))?;
        self.transactions.commit(assoc)
    }

    fn committed(&self, id: TaskId, next: Option<DateTime<Utc>>, purged: bool) -> Step {
        if purged {
            tracing::info!("🗑️ Task {id} ended and was purged");
        }
        match next {
            Some(next) => {
                tracing::debug!("Task {id} next run at {next}");
                Step::Continue
            }
            None => Step::Finished,
        }
    }

    fn write_failed(&self, id: TaskId, e: TxError) -> Step {
        if e.caused_by(VERSION_CONFLICT) {
            tracing::debug!("Task {id} changed concurrently; outcome discarded");
        } else {
            // The claim stays until it expires, then the execution is retried.
            tracing::warn!("⚠️ Task {id}: failed to record outcome: {e}");
        }
        Step::Continue
    }
}

/// Claim expiry, saturating at the latest representable time.
fn lease_until(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn rolled_back_by_transaction(e: &TxError) -> bool {
    matches!(e, TxError::RolledBack { .. }) && (e.caused_by(TIMEOUT_CAUSE) || e.caused_by(ROLLBACK_CAUSE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryDirectory;
    use crate::purge::AutoPurge;
    use crate::store::SqliteTaskStore;
    use crate::store::tests::record;
    use crate::transaction::LocalTransactionManager;
    use crate::workload::{Output, from_fn};
    use std::sync::atomic::AtomicU32;

    fn coordinator(store: Arc<dyn TaskStore>) -> Coordinator {
        Coordinator {
            store,
            codecs: Codecs::with_builtins(),
            transactions: Arc::new(LocalTransactionManager::new()),
            directory: Arc::new(MemoryDirectory::new()),
            config: SchedulerConfig::default(),
            transients: Transients::default(),
            interrupts: Interrupts::default(),
        }
    }

    fn submit(c: &Coordinator, workload: Arc<dyn Workload>, purge: AutoPurge) -> TaskId {
        let mut rec = record("unit");
        rec.properties.auto_purge = purge;
        let id = c.store.create(&rec).unwrap();
        c.transients.insert(id, TransientParts { workload: Some(workload), trigger: None });
        id
    }

    #[tokio::test]
    async fn test_success_records_result() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let c = coordinator(store.clone());
        let id = submit(&c, Arc::new(from_fn(|ctx| Ok(Output::of(ctx.attempt())))), AutoPurge::Never);

        assert_eq!(c.execute(id).await, Step::Finished);
        let rec = store.find(id).unwrap().unwrap();
        assert_eq!(rec.state, TaskState::Successful);
        assert_eq!(rec.attempts, 1);
        assert!(rec.claimed_until.is_none());
        let outcome = rec.last_execution.unwrap().outcome;
        assert_eq!(outcome, Outcome::Success { result: StoredResult::Value { value: Some(serde_json::json!(1)) } });
    }

    #[tokio::test]
    async fn test_failure_retries_then_ends() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let c = coordinator(store.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let id = submit(
            &c,
            Arc::new(from_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Failure::new("IllegalStateException", "always"))
            })),
            AutoPurge::Never,
        );

        assert!(matches!(c.execute(id).await, Step::Wait(_)));
        let rec = store.find(id).unwrap().unwrap();
        assert_eq!(rec.consecutive_failures, 1);
        assert!(rec.next_run.is_some());
        assert!(rec.last_execution.is_none());

        assert_eq!(c.execute(id).await, Step::Finished);
        let rec = store.find(id).unwrap().unwrap();
        assert_eq!(rec.state, TaskState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match rec.last_execution.unwrap().outcome {
            Outcome::Failure { cause, aborted, attempts } => {
                assert_eq!(cause.type_name, "IllegalStateException");
                assert!(!aborted);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rollback_only_aborts() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let mut c = coordinator(store.clone());
        c.config.failure_limit = 1;
        let id = submit(
            &c,
            Arc::new(from_fn(|ctx| {
                ctx.set_rollback_only();
                Ok(Output::none())
            })),
            AutoPurge::Never,
        );

        assert_eq!(c.execute(id).await, Step::Finished);
        let rec = store.find(id).unwrap().unwrap();
        assert!(matches!(rec.last_execution.unwrap().outcome, Outcome::Failure { aborted: true, .. }));
    }

    #[tokio::test]
    async fn test_stuck_workload_times_out() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let mut c = coordinator(store.clone());
        c.config.failure_limit = 1;
        let gave_up = Arc::new(AtomicBool::new(false));
        let flag = gave_up.clone();
        let mut rec = record("stuck");
        rec.properties.auto_purge = AutoPurge::Never;
        rec.properties.transaction_timeout_secs = 1;
        let id = store.create(&rec).unwrap();
        let workload = from_fn(move |ctx| {
            for _ in 0..1000 {
                if ctx.is_interrupted() {
                    flag.store(true, Ordering::SeqCst);
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Ok(Output::none())
        });
        c.transients.insert(id, TransientParts { workload: Some(Arc::new(workload)), trigger: None });

        let started = std::time::Instant::now();
        assert_eq!(c.execute(id).await, Step::Finished);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        match store.find(id).unwrap().unwrap().last_execution.unwrap().outcome {
            Outcome::Failure { cause, aborted, .. } => {
                assert!(aborted);
                assert!(cause.contains(TIMEOUT_CAUSE));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(gave_up.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_huge_timeout_does_not_overflow() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let mut c = coordinator(store.clone());
        c.config.default_transaction_timeout_secs = u64::MAX;
        c.config.claim_margin_secs = u64::MAX;
        let id = submit(&c, Arc::new(from_fn(|_| Ok(Output::of("done")))), AutoPurge::Never);

        assert_eq!(c.execute(id).await, Step::Finished);
        assert_eq!(store.find(id).unwrap().unwrap().state, TaskState::Successful);
    }

    #[tokio::test]
    async fn test_missing_transient_workload_fails() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let mut c = coordinator(store.clone());
        c.config.failure_limit = 1;
        let id = store.create(&record("orphan")).unwrap();

        assert_eq!(c.execute(id).await, Step::Finished);
        let rec = store.find(id).unwrap().unwrap();
        assert_eq!(rec.attempts, 0);
        match rec.last_execution.unwrap().outcome {
            Outcome::Failure { cause, .. } => assert_eq!(cause.type_name, "ClassNotFoundException"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_purged_on_success() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let c = coordinator(store.clone());
        let id = submit(&c, Arc::new(from_fn(|_| Ok(Output::none()))), AutoPurge::OnSuccess);
        assert_eq!(c.execute(id).await, Step::Finished);
        assert!(store.find(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_not_yet_due() {
        let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let c = coordinator(store.clone());
        let mut rec = record("later");
        rec.next_run = Some(Utc::now() + chrono::Duration::hours(1));
        let id = store.create(&rec).unwrap();
        assert_eq!(c.execute(id).await, Step::Continue);
        assert_eq!(store.find(id).unwrap().unwrap().attempts, 0);
    }
}
