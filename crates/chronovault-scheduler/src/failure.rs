//! Failures raised by workloads and triggers, and their durable form.
//!
//! A [`Failure`] is what user code returns. It may carry an arbitrary detail
//! value that is not guaranteed to serialize. Before a failure is written to
//! the store it is converted into a [`FailureRecord`], which always encodes.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::Encode;

/// A failure raised by a workload, a trigger, or a resource.
///
/// Like `anyhow::Error` it does not implement `std::error::Error` itself, so
/// any error type converts into it with `?` and keeps its source chain.
pub struct Failure {
    type_name: Cow<'static, str>,
    message: String,
    detail: Option<Box<dyn Encode>>,
    cause: Option<Box<Failure>>,
}

impl Failure {
    pub fn new(type_name: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            detail: None,
            cause: None,
        }
    }

    /// A failure with a generic type name.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("Failure", message)
    }

    /// Attach a detail value. It is stored with the failure if it encodes.
    pub fn with_detail<T>(mut self, detail: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.detail = Some(Box::new(detail));
        self
    }

    pub fn caused_by(mut self, cause: impl Into<Failure>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_deref()
    }

    /// This failure followed by its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Failure> {
        std::iter::successors(Some(self), |f| f.cause())
    }

    fn from_source(err: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(record) = err.downcast_ref::<FailureRecord>() {
            return Self::from_record(record);
        }
        Self {
            type_name: Cow::Borrowed("Error"),
            message: err.to_string(),
            detail: None,
            cause: err.source().map(|s| Box::new(Self::from_source(s))),
        }
    }
}

impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        let err: &(dyn std::error::Error + 'static) = &err;
        if let Some(record) = err.downcast_ref::<FailureRecord>() {
            return Self::from_record(record);
        }
        Self {
            type_name: Cow::Borrowed(short_type_name(std::any::type_name::<E>())),
            message: err.to_string(),
            detail: None,
            cause: err.source().map(|s| Box::new(Self::from_source(s))),
        }
    }
}

impl Failure {
    /// Rebuild a live failure from a stored record.
    pub fn from_record(record: &FailureRecord) -> Self {
        let mut failure = Self::new(record.type_name.clone(), record.message.clone());
        if let Some(detail) = &record.detail {
            failure.detail = Some(Box::new(detail.clone()));
        }
        failure.cause = record.cause.as_deref().map(|c| Box::new(Self::from_record(c)));
        failure
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("type_name", &self.type_name)
            .field("message", &self.message)
            .field("has_detail", &self.detail.is_some())
            .field("cause", &self.cause)
            .finish()
    }
}

/// Strip the module path from a type name, keeping generic arguments intact.
fn short_type_name(full: &'static str) -> &'static str {
    let head = full.split('<').next().unwrap_or(full);
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

/// Durable form of a [`Failure`].
///
/// Built by [`FailureRecord::capture`], which keeps type names and messages
/// of the whole cause chain and drops any detail that does not encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub type_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    /// Set when the original detail could not be encoded and was dropped.
    #[serde(default)]
    pub substituted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<FailureRecord>>,
}

impl FailureRecord {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            detail: None,
            substituted: false,
            cause: None,
        }
    }

    pub fn caused_by(mut self, cause: FailureRecord) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Make a failure encodable, recursively through its causes.
    pub fn capture(failure: &Failure) -> Self {
        let (detail, substituted) = match &failure.detail {
            None => (None, false),
            Some(detail) => match detail.encode() {
                Ok(value) => (Some(value), false),
                Err(e) => {
                    tracing::debug!(
                        "Dropping non-encodable detail {} of {}: {e}",
                        detail.type_name(),
                        failure.type_name
                    );
                    (None, true)
                }
            },
        };
        Self {
            type_name: failure.type_name.to_string(),
            message: failure.message.clone(),
            detail,
            substituted,
            cause: failure.cause.as_deref().map(|c| Box::new(Self::capture(c))),
        }
    }

    pub fn chain(&self) -> impl Iterator<Item = &FailureRecord> {
        std::iter::successors(Some(self), |r| r.cause.as_deref())
    }

    /// Whether any record in the chain has the given type name.
    pub fn contains(&self, type_name: &str) -> bool {
        self.chain().any(|r| r.type_name == type_name)
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for FailureRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
