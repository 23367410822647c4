//! Submitter context captured with a task and the per-attempt task context.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use chronovault_core::{ContextConfig, ContextKind};
use serde::{Deserialize, Serialize};

use crate::failure::Failure;
use crate::tasks::TaskId;
use crate::transaction::{Transaction, TxResource};

/// Context captured at submission and re-established for each attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Owning application.
    #[serde(default)]
    pub application: Option<String>,
    /// Namespace for directory lookups.
    #[serde(default)]
    pub naming: Option<String>,
}

impl ContextBundle {
    pub fn new(application: impl Into<String>, naming: impl Into<String>) -> Self {
        Self { application: Some(application.into()), naming: Some(naming.into()) }
    }

    /// Keep only the kinds the configuration propagates.
    pub(crate) fn filtered(mut self, config: &ContextConfig) -> Self {
        if !config.propagates(ContextKind::Application) {
            self.application = None;
        }
        if !config.propagates(ContextKind::Naming) {
            self.naming = None;
        }
        self
    }
}

/// Supplies the submitter's context at submission time.
pub trait ContextProvider: Send + Sync {
    fn capture(&self) -> ContextBundle;
}

/// A provider that always returns the same bundle.
#[derive(Debug, Clone, Default)]
pub struct StaticContext(pub ContextBundle);

impl ContextProvider for StaticContext {
    fn capture(&self) -> ContextBundle {
        self.0.clone()
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Name lookup service for workloads.
pub trait Directory: Send + Sync {
    fn lookup(&self, namespace: &str, name: &str) -> Option<Entry>;
}

/// In-memory directory.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<HashMap<(String, String), Entry>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<T: Any + Send + Sync>(&self, namespace: &str, name: &str, value: T) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert((namespace.to_string(), name.to_string()), Arc::new(value));
    }
}

impl Directory for MemoryDirectory {
    fn lookup(&self, namespace: &str, name: &str) -> Option<Entry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&(namespace.to_string(), name.to_string())).cloned()
    }
}

/// What a workload sees of the attempt it runs in.
pub struct TaskContext {
    task_id: TaskId,
    name: String,
    attempt: u32,
    scheduled: DateTime<Utc>,
    transaction: Arc<Transaction>,
    bundle: ContextBundle,
    directory: Arc<dyn Directory>,
    interrupted: Arc<AtomicBool>,
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        task_id: TaskId,
        name: String,
        attempt: u32,
        scheduled: DateTime<Utc>,
        transaction: Arc<Transaction>,
        bundle: ContextBundle,
        directory: Arc<dyn Directory>,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self { task_id, name, attempt, scheduled, transaction, bundle, directory, interrupted }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attempt number across the task's lifetime, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        self.scheduled
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Enlist a resource in the attempt's transaction.
    pub fn enlist(&self, resource: impl TxResource + 'static) -> Result<(), Failure> {
        Ok(self.transaction.enlist(Box::new(resource))?)
    }

    /// Force the attempt's transaction to roll back.
    pub fn set_rollback_only(&self) {
        self.transaction.set_rollback_only();
    }

    /// Set when the task was cancelled with interruption.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn application(&self) -> Result<&str, Failure> {
        self.bundle.application.as_deref().ok_or_else(|| {
            Failure::new("ClassNotFoundException", "no application context is available to this task")
        })
    }

    pub fn lookup(&self, name: &str) -> Result<Entry, Failure> {
        let namespace = self.bundle.naming.as_deref().ok_or_else(|| {
            Failure::new("NamingException", format!("{name}: no naming context is available to this task"))
        })?;
        self.directory
            .lookup(namespace, name)
            .ok_or_else(|| Failure::new("NameNotFoundException", format!("{name} not found in {namespace}")))
    }

    pub fn lookup_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, Failure> {
        self.lookup(name)?
            .downcast::<T>()
            .map_err(|_| Failure::new("ClassCastException", format!("{name} is not a {}", std::any::type_name::<T>())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ctx(bundle: ContextBundle, directory: Arc<dyn Directory>) -> TaskContext {
        TaskContext::new(
            1,
            "t".into(),
            1,
            Utc::now(),
            Arc::new(Transaction::new(1, Duration::from_secs(5))),
            bundle,
            directory,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_filtered_bundle() {
        let config = ContextConfig { propagate: vec![ContextKind::Application] };
        let bundle = ContextBundle::new("app", "java:comp").filtered(&config);
        assert_eq!(bundle.application.as_deref(), Some("app"));
        assert!(bundle.naming.is_none());
    }

    #[test]
    fn test_lookup_without_naming_context() {
        let ctx = ctx(ContextBundle::default(), Arc::new(MemoryDirectory::new()));
        let err = ctx.lookup("jdbc/ds").unwrap_err();
        assert_eq!(err.type_name(), "NamingException");
        assert_eq!(ctx.application().unwrap_err().type_name(), "ClassNotFoundException");
    }

    #[test]
    fn test_lookup_binds() {
        let directory = MemoryDirectory::new();
        directory.bind("java:comp", "limit", 5u32);
        let ctx = ctx(ContextBundle::new("app", "java:comp"), Arc::new(directory));
        assert_eq!(*ctx.lookup_as::<u32>("limit").unwrap(), 5);
        assert_eq!(ctx.lookup("missing").unwrap_err().type_name(), "NameNotFoundException");
        assert_eq!(ctx.lookup_as::<String>("limit").unwrap_err().type_name(), "ClassCastException");
    }
}
