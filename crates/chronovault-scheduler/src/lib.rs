//! # Chronovault Scheduler
//!
//! Durable task scheduler. Tasks survive restarts, each execution runs inside
//! a transaction together with the store write that records it, and failed
//! executions are retried up to a limit.
//!
//! ## Design Principles
//! - SQLite persistence, one row per task plus a property table
//! - Tokio timers only, one driver per pending task
//! - Optimistic versioning on task rows, so several processes can share a store
//! - Durable workloads and triggers are stored by tag and decoded through [`Codecs`]
//!
//! ## Architecture
//! ```text
//! Scheduler::schedule(TaskRequest)
//!   ├── validate properties, plan, encode gates
//!   ├── TaskStore::create  ──▶ tasks table
//!   └── driver (tokio task)
//!         ├── sleep until next_run
//!         └── Coordinator::execute
//!               ├── claim (versioned update)
//!               ├── Trigger::skip_run ─▶ record skip
//!               └── Transaction
//!                     ├── Workload::call (blocking pool)
//!                     ├── next run / result encode
//!                     └── commit, record write as primary resource
//!
//! Poll loop (every poll_interval_secs)
//!   └── TaskStore::due ─▶ start drivers for tasks this process has not seen
//! ```

pub mod builtin;
pub mod codec;
pub mod context;
pub mod cron;
pub mod engine;
pub mod error;
pub mod executor;
pub mod failure;
pub mod purge;
pub mod status;
pub mod store;
pub mod tasks;
pub mod transaction;
pub mod trigger;
pub mod workload;

pub use builtin::{CommandOutput, LogMessage, RunCommand};
pub use codec::{Codecs, Durable, Encode, EncodeError, Payload, Tagged};
pub use context::{ContextBundle, ContextProvider, Directory, MemoryDirectory, StaticContext, TaskContext};
pub use cron::{CronError, CronSchedule, CronTrigger};
pub use engine::{Schedule, Scheduler, SchedulerBuilder, TaskRequest};
pub use error::{Result, SchedulerError};
pub use failure::{Failure, FailureRecord};
pub use purge::AutoPurge;
pub use status::{StateFilter, StatusQuery, TaskStatus};
pub use store::{SqliteTaskStore, StoreError, TaskFilter, TaskStore};
pub use tasks::{ExecutionHistory, LastExecution, TaskId, TaskRecord, TaskState, TimeUnit, keys};
pub use transaction::{
    Association, LocalTransactionManager, Transaction, TransactionManager, TxError, TxResource, TxStatus,
};
pub use trigger::{Plan, Trigger};
pub use workload::{FnWorkload, Output, Workload, from_fn};
