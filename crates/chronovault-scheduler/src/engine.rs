//! Scheduler engine: the facade tasks are submitted to and the loops that run them.
//!
//! Each task with pending executions gets one driver on the tokio runtime. A
//! driver sleeps until the task is due and hands it to the coordinator, so a
//! task's executions never overlap. A semaphore bounds concurrent attempts.
//! At start, and then every `poll_interval_secs`, the store is scanned for
//! due tasks without a driver (created by another process, or left behind by
//! one that stopped).

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chronovault_core::SchedulerConfig;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::codec::{self, Codecs, Encode, Payload};
use crate::context::{ContextProvider, Directory, MemoryDirectory, StaticContext};
use crate::error::{Result, SchedulerError};
use crate::executor::{Coordinator, Interrupts, Step, TransientParts, Transients};
use crate::purge::should_purge;
use crate::status::{StatusQuery, TaskStatus};
use crate::store::{SqliteTaskStore, TaskStore};
use crate::tasks::{ExecutionHistory, TaskId, TaskProperties, TaskRecord, TaskState, TimeUnit, keys};
use crate::transaction::{LocalTransactionManager, TransactionManager};
use crate::trigger::{Plan, Trigger};
use crate::workload::Workload;

const CANCEL_RETRIES: usize = 10;
const STORE_BACKOFF: Duration = Duration::from_secs(1);

/// When a task runs. A missing unit or trigger is rejected at submission.
#[derive(Clone, Default)]
pub enum Schedule {
    #[default]
    Now,
    After { delay: i64, unit: Option<TimeUnit> },
    Trigger(Option<Arc<dyn Trigger>>),
    FixedRate { initial_delay: i64, period: i64, unit: Option<TimeUnit> },
    FixedDelay { initial_delay: i64, delay: i64, unit: Option<TimeUnit> },
}

/// A task submission.
#[derive(Default)]
pub struct TaskRequest {
    workload: Option<Arc<dyn Workload>>,
    schedule: Schedule,
    properties: BTreeMap<String, String>,
    result: Option<Box<dyn Encode>>,
}

impl TaskRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(workload: impl Workload) -> Self {
        Self::new().workload(workload)
    }

    pub fn workload(mut self, workload: impl Workload) -> Self {
        self.workload = Some(Arc::new(workload));
        self
    }

    pub fn workload_arc(mut self, workload: Option<Arc<dyn Workload>>) -> Self {
        self.workload = workload;
        self
    }

    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn after(self, delay: i64, unit: TimeUnit) -> Self {
        self.schedule(Schedule::After { delay, unit: Some(unit) })
    }

    pub fn trigger(self, trigger: impl Trigger) -> Self {
        self.schedule(Schedule::Trigger(Some(Arc::new(trigger))))
    }

    pub fn at_fixed_rate(self, initial_delay: i64, period: i64, unit: TimeUnit) -> Self {
        self.schedule(Schedule::FixedRate { initial_delay, period, unit: Some(unit) })
    }

    pub fn with_fixed_delay(self, initial_delay: i64, delay: i64, unit: TimeUnit) -> Self {
        self.schedule(Schedule::FixedDelay { initial_delay, delay, unit: Some(unit) })
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn name(self, name: impl Into<String>) -> Self {
        self.property(keys::IDENTITY_NAME, name)
    }

    /// Result reported for every successful execution instead of the workload's own.
    pub fn result<T>(mut self, result: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.result = Some(Box::new(result));
        self
    }
}

struct Shared {
    coordinator: Coordinator,
    context: Arc<dyn ContextProvider>,
    permits: Arc<Semaphore>,
    drivers: Mutex<HashSet<TaskId>>,
    runtime: Option<Handle>,
}

impl Shared {
    fn lock_drivers(&self) -> std::sync::MutexGuard<'_, HashSet<TaskId>> {
        self.drivers.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Start a driver for `id` unless one is already running.
fn spawn_driver(shared: &Arc<Shared>, id: TaskId) {
    let Some(runtime) = &shared.runtime else {
        return;
    };
    if !shared.lock_drivers().insert(id) {
        return;
    }
    let shared = shared.clone();
    runtime.spawn(drive(shared, id));
}

async fn drive(shared: Arc<Shared>, id: TaskId) {
    let coordinator = &shared.coordinator;
    loop {
        let record = match coordinator.store.find(id) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("⚠️ Task {id}: store unavailable: {e}");
                tokio::time::sleep(STORE_BACKOFF).await;
                continue;
            }
        };
        let Some(next) = record.as_ref().and_then(|r| r.next_run) else {
            break;
        };
        let now = Utc::now();
        let wake = match record.as_ref().and_then(|r| r.claimed_until) {
            Some(claim) if claim > now => claim.max(next),
            _ => next,
        };
        if wake > now {
            tokio::time::sleep((wake - now).to_std().unwrap_or_default()).await;
            continue;
        }

        let step = {
            let Ok(_permit) = shared.permits.clone().acquire_owned().await else {
                break;
            };
            coordinator.execute(id).await
        };
        match step {
            Step::Continue => {}
            Step::Wait(delay) => tokio::time::sleep(delay).await,
            Step::Finished => break,
        }
    }
    shared.lock_drivers().remove(&id);
    coordinator.transients.remove(id);
    tracing::debug!("Task {id} driver stopped");
}

/// Periodic scan for due tasks that have no driver in this process.
async fn poll(shared: Weak<Shared>, initial_delay: Duration, every: Duration) {
    tokio::time::sleep(initial_delay).await;
    let mut interval = tokio::time::interval(every);
    let horizon = chrono::Duration::from_std(every).unwrap_or_else(|_| chrono::Duration::zero());
    loop {
        interval.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match shared.coordinator.store.due(Some(Utc::now() + horizon)) {
            Ok(ids) => {
                for id in ids {
                    spawn_driver(&shared, id);
                }
            }
            Err(e) => tracing::warn!("⚠️ Task poll failed: {e}"),
        }
    }
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn TaskStore>>,
    codecs: Codecs,
    transactions: Option<Arc<dyn TransactionManager>>,
    directory: Option<Arc<dyn Directory>>,
    context: Option<Arc<dyn ContextProvider>>,
}

impl SchedulerBuilder {
    /// Defaults to a SQLite store at `config.db_path`.
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn codecs(mut self, codecs: Codecs) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn transaction_manager(mut self, transactions: Arc<dyn TransactionManager>) -> Self {
        self.transactions = Some(transactions);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn context_provider(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = Some(context);
        self
    }

    /// Open the store and, when task execution is enabled, start running tasks.
    /// Execution needs a tokio runtime.
    pub fn start(self) -> Result<Scheduler> {
        let config = self.config;
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteTaskStore::open(&config.resolved_db_path())?),
        };
        let runtime = if config.enable_task_execution {
            let handle = Handle::try_current()
                .map_err(|_| SchedulerError::IllegalState("task execution requires a tokio runtime".into()))?;
            Some(handle)
        } else {
            None
        };

        let poll_every = config.poll_interval();
        let initial_delay = Duration::from_secs(config.initial_poll_delay_secs);
        let shared = Arc::new(Shared {
            permits: Arc::new(Semaphore::new(config.max_workers.max(1))),
            coordinator: Coordinator {
                store,
                codecs: self.codecs,
                transactions: self.transactions.unwrap_or_else(|| Arc::new(LocalTransactionManager::new())),
                directory: self.directory.unwrap_or_else(|| Arc::new(MemoryDirectory::new())),
                config,
                transients: Transients::default(),
                interrupts: Interrupts::default(),
            },
            context: self.context.unwrap_or_else(|| Arc::new(StaticContext::default())),
            drivers: Mutex::new(HashSet::new()),
            runtime,
        });

        if let Some(runtime) = &shared.runtime {
            let pending = shared.coordinator.store.due(None)?;
            tracing::info!("⏰ Scheduler started ({} pending tasks, {} workers)", pending.len(), shared.coordinator.config.max_workers);
            for id in pending {
                spawn_driver(&shared, id);
            }
            if let Some(every) = poll_every {
                runtime.spawn(poll(Arc::downgrade(&shared), initial_delay, every));
            }
        } else {
            tracing::info!("⏰ Scheduler started with task execution disabled");
        }

        Ok(Scheduler { shared })
    }
}

/// Durable task scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn builder(config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            store: None,
            codecs: Codecs::with_builtins(),
            transactions: None,
            directory: None,
            context: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.coordinator.config
    }

    fn store(&self) -> &dyn TaskStore {
        self.shared.coordinator.store.as_ref()
    }

    // ─── Submission ───────────────────────────────────────────

    /// Run a workload once, as soon as possible.
    pub fn submit(&self, workload: impl Workload) -> Result<TaskStatus> {
        self.schedule(TaskRequest::of(workload))
    }

    /// Run a workload once and report `result` instead of its own return value.
    pub fn submit_with_result<T>(&self, workload: impl Workload, result: T) -> Result<TaskStatus>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.schedule(TaskRequest::of(workload).result(result))
    }

    pub fn schedule_after(&self, workload: impl Workload, delay: i64, unit: TimeUnit) -> Result<TaskStatus> {
        self.schedule(TaskRequest::of(workload).after(delay, unit))
    }

    pub fn schedule_with_trigger(&self, workload: impl Workload, trigger: impl Trigger) -> Result<TaskStatus> {
        self.schedule(TaskRequest::of(workload).trigger(trigger))
    }

    pub fn schedule_at_fixed_rate(
        &self,
        workload: impl Workload,
        initial_delay: i64,
        period: i64,
        unit: TimeUnit,
    ) -> Result<TaskStatus> {
        self.schedule(TaskRequest::of(workload).at_fixed_rate(initial_delay, period, unit))
    }

    pub fn schedule_with_fixed_delay(
        &self,
        workload: impl Workload,
        initial_delay: i64,
        delay: i64,
        unit: TimeUnit,
    ) -> Result<TaskStatus> {
        self.schedule(TaskRequest::of(workload).with_fixed_delay(initial_delay, delay, unit))
    }

    /// Validate, persist and start a task.
    pub fn schedule(&self, request: TaskRequest) -> Result<TaskStatus> {
        let TaskRequest { workload, schedule, properties, result } = request;
        let workload = workload.ok_or(SchedulerError::NullArgument("workload"))?;
        let (plan, trigger) = match schedule {
            Schedule::Now => (Ok(Plan::one_shot(0, TimeUnit::Milliseconds)), None),
            Schedule::After { delay, unit } => {
                let unit = unit.ok_or(SchedulerError::NullArgument("unit"))?;
                (Ok(Plan::one_shot(delay, unit)), None)
            }
            Schedule::Trigger(trigger) => {
                let trigger = trigger.ok_or(SchedulerError::NullArgument("trigger"))?;
                (Ok(Plan::Triggered), Some(trigger))
            }
            Schedule::FixedRate { initial_delay, period, unit } => {
                let unit = unit.ok_or(SchedulerError::NullArgument("unit"))?;
                (Plan::fixed_rate(initial_delay, period, unit), None)
            }
            Schedule::FixedDelay { initial_delay, delay, unit } => {
                let unit = unit.ok_or(SchedulerError::NullArgument("unit"))?;
                (Plan::fixed_delay(initial_delay, delay, unit), None)
            }
        };

        let mut merged = workload.execution_properties();
        merged.extend(properties);
        let parsed = TaskProperties::parse(&merged)?;
        if parsed.long_running {
            let value = merged.get(keys::LONG_RUNNING).map(String::as_str).unwrap_or("true");
            return Err(SchedulerError::rejected(format!("{}: {value}", keys::LONG_RUNNING)));
        }
        let plan = plan?;

        let workload_payload = match workload.durable() {
            Some(durable) => codec::admit(codec::identity(workload.type_name(), &*workload), durable)?,
            None => Payload::Transient { type_name: workload.type_name().to_string() },
        };

        let now = Utc::now();
        let first = plan.first_run(trigger.as_deref(), now)?;

        let trigger_payload = match &trigger {
            None => None,
            Some(trigger) => Some(match trigger.durable() {
                Some(durable) => codec::admit(codec::identity(trigger.type_name(), &**trigger), durable)?,
                None => Payload::Transient { type_name: trigger.type_name().to_string() },
            }),
        };
        let predetermined_result = result.as_deref().map(|value| codec::admit_value(value)).transpose()?;

        let config = self.config();
        let context = self.shared.context.capture().filtered(&config.context);
        let name = parsed.name().to_string();
        let transient = TransientParts {
            workload: matches!(workload_payload, Payload::Transient { .. }).then(|| workload.clone()),
            trigger: match (&trigger_payload, &trigger) {
                (Some(Payload::Transient { .. }), Some(trigger)) => Some(trigger.clone()),
                _ => None,
            },
        };

        // Transient parts live only in this process, which never runs them.
        if self.shared.runtime.is_none() {
            let parts = [Some(&workload_payload), trigger_payload.as_ref()];
            if let Some(Payload::Transient { type_name }) =
                parts.into_iter().flatten().find(|p| matches!(p, Payload::Transient { .. }))
            {
                return Err(SchedulerError::rejected(format!(
                    "{type_name} is not durable and task execution is disabled"
                )));
            }
        }

        let mut record = TaskRecord {
            id: 0,
            name,
            workload: workload_payload,
            trigger: trigger_payload,
            plan,
            properties: parsed,
            predetermined_result,
            context,
            submitted: now,
            state: TaskState::Scheduled,
            next_run: Some(first),
            attempts: 0,
            consecutive_failures: 0,
            history: ExecutionHistory::default(),
            last_execution: None,
            claimed_until: None,
            version: 0,
        };
        let id = self.store().create(&record)?;
        record.id = id;
        tracing::info!("📅 Task {id} '{}' scheduled, first run at {first}", record.name);

        if transient.workload.is_some() || transient.trigger.is_some() {
            self.shared.coordinator.transients.insert(id, transient);
        }
        spawn_driver(&self.shared, id);
        Ok(TaskStatus::project(&record, now))
    }

    // ─── Status ───────────────────────────────────────────────

    pub fn status(&self, id: TaskId) -> Result<Option<TaskStatus>> {
        let now = Utc::now();
        Ok(self.store().find(id)?.map(|record| TaskStatus::project(&record, now)))
    }

    pub fn next_execution_time(&self, id: TaskId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store().find(id)?.and_then(|record| record.next_run))
    }

    pub fn find_task_status(&self, query: &StatusQuery) -> Result<Vec<TaskStatus>> {
        let now = Utc::now();
        let mut found: Vec<TaskStatus> = self
            .store()
            .search(&query.to_filter())?
            .iter()
            .map(|record| TaskStatus::project(record, now))
            .filter(|status| query.admits(status))
            .collect();
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    pub fn find_task_ids(&self, query: &StatusQuery) -> Result<Vec<TaskId>> {
        Ok(self.find_task_status(query)?.iter().map(TaskStatus::id).collect())
    }

    // ─── Cancel / remove ──────────────────────────────────────

    /// Cancel a task with pending executions. Returns false if it was not
    /// found or had already ended. An attempt already in progress is not
    /// stopped, but its outcome is discarded.
    pub fn cancel(&self, id: TaskId, may_interrupt: bool) -> Result<bool> {
        let store = self.store();
        for _ in 0..CANCEL_RETRIES {
            let Some(mut record) = store.find(id)? else {
                return Ok(false);
            };
            if record.is_ended() {
                return Ok(false);
            }
            record.state = TaskState::Cancelled;
            record.next_run = None;
            record.claimed_until = None;
            let purge = should_purge(record.properties.auto_purge, None);
            let written = if purge { store.remove_version(id, record.version)? } else { store.update(&mut record)? };
            if written {
                if may_interrupt && self.shared.coordinator.interrupts.signal(id) {
                    tracing::debug!("Task {id} running attempt interrupted");
                }
                tracing::info!("🚫 Task {id} cancelled{}", if purge { " and purged" } else { "" });
                return Ok(true);
            }
        }
        Err(SchedulerError::IllegalState(format!("task {id} kept changing while being cancelled")))
    }

    pub fn cancel_matching(&self, query: &StatusQuery) -> Result<usize> {
        let mut cancelled = 0;
        for id in self.find_task_ids(query)? {
            if self.cancel(id, false)? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Delete a task's record whatever its state.
    pub fn remove(&self, id: TaskId) -> Result<bool> {
        let removed = self.store().remove(id)?;
        if removed {
            tracing::info!("🗑️ Task {id} removed");
        }
        Ok(removed)
    }

    pub fn remove_matching(&self, query: &StatusQuery) -> Result<usize> {
        let mut removed = 0;
        for id in self.find_task_ids(query)? {
            if self.remove(id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ─── Properties ───────────────────────────────────────────

    /// Create a property. Returns false if it already exists.
    pub fn create_property(&self, name: &str, value: &str) -> Result<bool> {
        require("name", name)?;
        require("value", value)?;
        Ok(self.store().create_property(name, value)?)
    }

    pub fn get_property(&self, name: &str) -> Result<Option<String>> {
        require("name", name)?;
        Ok(self.store().get_property(name)?)
    }

    /// Change an existing property. Returns false if it does not exist.
    pub fn set_property(&self, name: &str, value: &str) -> Result<bool> {
        require("name", name)?;
        require("value", value)?;
        Ok(self.store().set_property(name, value)?)
    }

    pub fn remove_property(&self, name: &str) -> Result<bool> {
        require("name", name)?;
        Ok(self.store().remove_property(name)?)
    }

    pub fn find_properties(&self, pattern: &str, escape: Option<char>) -> Result<BTreeMap<String, String>> {
        require("pattern", pattern)?;
        Ok(self.store().find_properties(pattern, escape)?)
    }

    pub fn remove_properties(&self, pattern: &str, escape: Option<char>) -> Result<usize> {
        require("pattern", pattern)?;
        Ok(self.store().remove_properties(pattern, escape)?)
    }

    // ─── Unsupported executor operations ──────────────────────

    pub fn invoke_all(&self, _workloads: Vec<Arc<dyn Workload>>) -> Result<Vec<TaskStatus>> {
        Err(SchedulerError::UnsupportedOperation("invoke_all"))
    }

    pub fn invoke_any(&self, _workloads: Vec<Arc<dyn Workload>>) -> Result<TaskStatus> {
        Err(SchedulerError::UnsupportedOperation("invoke_any"))
    }

    /// The scheduler's lifecycle is not under caller control.
    pub fn shutdown(&self) -> Result<()> {
        Err(lifecycle("shutdown"))
    }

    pub fn shutdown_now(&self) -> Result<Vec<TaskId>> {
        Err(lifecycle("shutdown_now"))
    }

    pub fn await_termination(&self, _timeout: Duration) -> Result<bool> {
        Err(lifecycle("await_termination"))
    }

    pub fn is_shutdown(&self) -> Result<bool> {
        Err(lifecycle("is_shutdown"))
    }

    pub fn is_terminated(&self) -> Result<bool> {
        Err(lifecycle("is_terminated"))
    }
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(SchedulerError::invalid(format!("{what}: must not be empty")));
    }
    Ok(())
}

fn lifecycle(operation: &str) -> SchedulerError {
    SchedulerError::IllegalState(format!("unsupported operation: {operation}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::LogMessage;
    use crate::status::StateFilter;
    use crate::workload::{Output, from_fn};

    fn disabled() -> Scheduler {
        let config = SchedulerConfig { enable_task_execution: false, ..Default::default() };
        Scheduler::builder(config)
            .store(Arc::new(SqliteTaskStore::open_in_memory().unwrap()))
            .start()
            .unwrap()
    }

    #[test]
    fn test_submit_without_execution() {
        let scheduler = disabled();
        let status = scheduler.submit(LogMessage::new("hello")).unwrap();
        assert_eq!(status.state(), TaskState::Scheduled);
        let stored = scheduler.status(status.id()).unwrap().unwrap();
        assert!(!stored.has_result());
        assert!(scheduler.next_execution_time(status.id()).unwrap().is_some());
    }

    #[test]
    fn test_null_arguments() {
        let scheduler = disabled();
        let err = scheduler.schedule(TaskRequest::new()).unwrap_err();
        assert!(matches!(err, SchedulerError::NullArgument("workload")));
        let err = scheduler
            .schedule(TaskRequest::of(LogMessage::new("x")).schedule(Schedule::After { delay: 1, unit: None }))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NullArgument("unit")));
        let err = scheduler
            .schedule(TaskRequest::of(LogMessage::new("x")).schedule(Schedule::Trigger(None)))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NullArgument("trigger")));
    }

    #[test]
    fn test_long_running_rejected() {
        let scheduler = disabled();
        let err = scheduler
            .schedule(TaskRequest::of(LogMessage::new("x")).property(keys::LONG_RUNNING, "true"))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::RejectedExecution { .. }));
        assert_eq!(err.to_string(), "task.long-running: true");
    }

    #[test]
    fn test_bad_period_names_value() {
        let scheduler = disabled();
        let err = scheduler.schedule_at_fixed_rate(LogMessage::new("x"), 0, -1, TimeUnit::Seconds).unwrap_err();
        assert_eq!(err.to_string(), "-1");
        assert!(scheduler.find_task_ids(&StatusQuery::all()).unwrap().is_empty());
    }

    #[test]
    fn test_cancel_pending_task() {
        let scheduler = disabled();
        let status = scheduler
            .schedule(
                TaskRequest::of(LogMessage::new("later"))
                    .after(1, TimeUnit::Hours)
                    .property(keys::AUTO_PURGE, "NEVER"),
            )
            .unwrap();
        assert!(scheduler.cancel(status.id(), false).unwrap());
        assert!(!scheduler.cancel(status.id(), false).unwrap());
        let cancelled = scheduler.status(status.id()).unwrap().unwrap();
        assert!(cancelled.is_cancelled());
        assert!(cancelled.is_done());
        assert!(matches!(cancelled.get(), Err(SchedulerError::Cancelled(_))));
    }

    struct EveryMinute;

    impl Trigger for EveryMinute {
        fn next_run_time(
            &self,
            _: &ExecutionHistory,
            scheduled: DateTime<Utc>,
        ) -> std::result::Result<Option<DateTime<Utc>>, crate::failure::Failure> {
            Ok(Some(scheduled + chrono::Duration::minutes(1)))
        }
    }

    #[test]
    fn test_in_process_parts_need_execution() {
        let scheduler = disabled();
        let err = scheduler.submit(from_fn(|_| Ok(Output::none()))).unwrap_err();
        assert!(matches!(err, SchedulerError::RejectedExecution { .. }));
        assert!(err.to_string().ends_with("is not durable and task execution is disabled"));
        let err = scheduler.schedule(TaskRequest::of(LogMessage::new("x")).trigger(EveryMinute)).unwrap_err();
        assert!(matches!(err, SchedulerError::RejectedExecution { .. }));
        assert!(scheduler.find_task_ids(&StatusQuery::all()).unwrap().is_empty());
        assert!(scheduler.shared.coordinator.transients.get(1).workload.is_none());
    }

    #[test]
    fn test_far_future_delay_is_invalid() {
        let scheduler = disabled();
        let err = scheduler.schedule_after(LogMessage::new("x"), i64::MAX, TimeUnit::Days).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument { .. }));
        assert_eq!(err.to_string(), i64::MAX.to_string());
        assert!(scheduler.find_task_ids(&StatusQuery::all()).unwrap().is_empty());
    }

    #[test]
    fn test_find_by_name_and_state() {
        let scheduler = disabled();
        scheduler.schedule(TaskRequest::of(LogMessage::new("a")).name("report_daily")).unwrap();
        scheduler.schedule(TaskRequest::of(LogMessage::new("b")).name("reportXdaily")).unwrap();
        let third = scheduler.schedule(TaskRequest::of(LogMessage::new("c")).name("cleanup")).unwrap();
        scheduler.remove(third.id()).unwrap();

        let query = StatusQuery::named("report\\_%").escape('\\');
        assert_eq!(scheduler.find_task_ids(&query).unwrap().len(), 1);
        assert_eq!(scheduler.find_task_ids(&StatusQuery::named("report%")).unwrap().len(), 2);
        assert_eq!(scheduler.cancel_matching(&StatusQuery::named("report%")).unwrap(), 2);
        let cancelled = StatusQuery::all().in_state(StateFilter::State(TaskState::Cancelled));
        assert_eq!(scheduler.find_task_ids(&cancelled).unwrap().len(), 2);
        assert_eq!(scheduler.remove_matching(&StatusQuery::all()).unwrap(), 2);
    }

    #[test]
    fn test_unsupported_operations() {
        let scheduler = disabled();
        assert!(matches!(scheduler.invoke_all(Vec::new()), Err(SchedulerError::UnsupportedOperation(_))));
        assert!(matches!(scheduler.invoke_any(Vec::new()), Err(SchedulerError::UnsupportedOperation(_))));
        assert!(matches!(scheduler.shutdown(), Err(SchedulerError::IllegalState(_))));
        assert!(matches!(scheduler.is_terminated(), Err(SchedulerError::IllegalState(_))));
    }

    #[test]
    fn test_property_validation() {
        let scheduler = disabled();
        assert!(matches!(scheduler.create_property("", "v"), Err(SchedulerError::InvalidArgument { .. })));
        assert!(matches!(scheduler.create_property("k", ""), Err(SchedulerError::InvalidArgument { .. })));
        assert!(scheduler.create_property("k", "v").unwrap());
        assert_eq!(scheduler.get_property("k").unwrap().as_deref(), Some("v"));
    }
}
