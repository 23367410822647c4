//! The unit of work a task runs.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::codec::{Durable, Encode, EncodeError};
use crate::context::TaskContext;
use crate::failure::Failure;

/// Work submitted to the scheduler.
///
/// A workload that returns `Some` from [`Workload::durable`] is persisted by
/// value and survives restarts. Other workloads stay in process memory and are
/// lost when the process exits.
pub trait Workload: Send + Sync + 'static {
    /// Run one attempt. Called on a blocking worker thread.
    fn call(&self, ctx: &TaskContext) -> Result<Output, Failure>;

    fn durable(&self) -> Option<&dyn Durable> {
        None
    }

    /// Task properties the workload declares for itself. Properties given on
    /// the request take precedence.
    fn execution_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Value returned by a workload attempt.
pub struct Output(Option<Box<dyn Encode>>);

impl Output {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn of<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self(Some(Box::new(value)))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn type_name(&self) -> Option<&'static str> {
        self.0.as_ref().map(|v| v.type_name())
    }

    pub(crate) fn encode(&self) -> Result<Option<Value>, EncodeError> {
        self.0.as_ref().map(|v| v.encode()).transpose()
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(v) => write!(f, "Output({})", v.type_name()),
            None => f.write_str("Output(none)"),
        }
    }
}

/// Transient workload backed by a closure.
pub struct FnWorkload<F> {
    f: F,
    properties: BTreeMap<String, String>,
}

impl<F> FnWorkload<F> {
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Wrap a closure as a transient workload.
pub fn from_fn<F>(f: F) -> FnWorkload<F>
where
    F: Fn(&TaskContext) -> Result<Output, Failure> + Send + Sync + 'static,
{
    FnWorkload { f, properties: BTreeMap::new() }
}

impl<F> Workload for FnWorkload<F>
where
    F: Fn(&TaskContext) -> Result<Output, Failure> + Send + Sync + 'static,
{
    fn call(&self, ctx: &TaskContext) -> Result<Output, Failure> {
        (self.f)(ctx)
    }

    fn execution_properties(&self) -> BTreeMap<String, String> {
        self.properties.clone()
    }
}
