//! Serialization gate.
//!
//! Everything the store keeps by value passes through here: workloads and
//! triggers declared durable, predetermined results, and results returned by
//! workloads. Durable components are test-encoded at submission so that a
//! task that could never be persisted is rejected before it is accepted.
//! At execution time the [`Codecs`] registry turns stored payloads back into
//! live objects.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchedulerError;
use crate::failure::Failure;
use crate::trigger::Trigger;
use crate::workload::Workload;

/// Anything that can be encoded into the store's value format.
pub trait Encode: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn encode(&self) -> Result<Value, EncodeError>;
}

impl<T> Encode for T
where
    T: Serialize + Send + Sync,
{
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn encode(&self) -> Result<Value, EncodeError> {
        serde_json::to_value(self).map_err(EncodeError::from)
    }
}

/// Registry tag of a durable type.
pub trait Tagged {
    const TAG: &'static str;
}

/// A value persisted by tag and encoded form.
pub trait Durable: Encode {
    fn tag(&self) -> &'static str;
}

impl<T> Durable for T
where
    T: Tagged + Serialize + Send + Sync,
{
    fn tag(&self) -> &'static str {
        T::TAG
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EncodeError {
    message: String,
    #[source]
    source: Option<serde_json::Error>,
}

impl EncodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None }
    }
}

impl From<serde_json::Error> for EncodeError {
    fn from(e: serde_json::Error) -> Self {
        Self { message: format!("encoding failed: {e}"), source: Some(e) }
    }
}

/// `type@address`, the identity used in rejection messages.
pub fn identity<T: ?Sized>(type_name: &str, obj: &T) -> String {
    format!("{type_name}@{:x}", obj as *const T as *const () as usize)
}

/// How a workload or trigger is kept in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum Payload {
    Durable { tag: String, value: Value },
    /// Only held in memory by the submitting process.
    Transient { type_name: String },
}

/// Test-encode a durable component. Failure rejects the submission with the
/// component's identity as message and the encoding failure as source.
pub(crate) fn admit(identity: String, durable: &dyn Durable) -> Result<Payload, SchedulerError> {
    match durable.encode() {
        Ok(value) => Ok(Payload::Durable { tag: durable.tag().to_string(), value }),
        Err(source) => {
            tracing::debug!("Rejecting {identity}: {source}");
            Err(SchedulerError::InvalidArgument { message: identity, source: Some(source) })
        }
    }
}

/// Test-encode a predetermined result.
pub(crate) fn admit_value(value: &dyn Encode) -> Result<Value, SchedulerError> {
    value.encode().map_err(|source| {
        let identity = identity(value.type_name(), value);
        tracing::debug!("Rejecting result {identity}: {source}");
        SchedulerError::InvalidArgument { message: identity, source: Some(source) }
    })
}

type WorkloadDecoder = dyn Fn(Value) -> Result<Arc<dyn Workload>, serde_json::Error> + Send + Sync;
type TriggerDecoder = dyn Fn(Value) -> Result<Arc<dyn Trigger>, serde_json::Error> + Send + Sync;

/// Decoders for durable workloads and triggers, keyed by tag.
#[derive(Clone, Default)]
pub struct Codecs {
    workloads: HashMap<&'static str, Arc<WorkloadDecoder>>,
    triggers: HashMap<&'static str, Arc<TriggerDecoder>>,
}

impl Codecs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the stock workloads and the cron trigger.
    pub fn with_builtins() -> Self {
        let mut codecs = Self::new();
        codecs
            .register_workload::<crate::builtin::LogMessage>()
            .register_workload::<crate::builtin::RunCommand>()
            .register_trigger::<crate::cron::CronTrigger>();
        codecs
    }

    pub fn register_workload<T>(&mut self) -> &mut Self
    where
        T: Workload + Tagged + DeserializeOwned,
    {
        let decode = |value: Value| -> Result<Arc<dyn Workload>, serde_json::Error> {
            Ok(Arc::new(serde_json::from_value::<T>(value)?))
        };
        self.workloads.insert(T::TAG, Arc::new(decode));
        self
    }

    pub fn register_trigger<T>(&mut self) -> &mut Self
    where
        T: Trigger + Tagged + DeserializeOwned,
    {
        let decode = |value: Value| -> Result<Arc<dyn Trigger>, serde_json::Error> {
            Ok(Arc::new(serde_json::from_value::<T>(value)?))
        };
        self.triggers.insert(T::TAG, Arc::new(decode));
        self
    }

    pub fn decode_workload(&self, tag: &str, value: &Value) -> Result<Arc<dyn Workload>, Failure> {
        let decode = self
            .workloads
            .get(tag)
            .ok_or_else(|| Failure::new("UnknownTag", format!("no workload decoder for '{tag}'")))?;
        decode(value.clone()).map_err(|e| Failure::new("DecodeError", format!("workload '{tag}'")).caused_by(e))
    }

    pub fn decode_trigger(&self, tag: &str, value: &Value) -> Result<Arc<dyn Trigger>, Failure> {
        let decode = self
            .triggers
            .get(tag)
            .ok_or_else(|| Failure::new("UnknownTag", format!("no trigger decoder for '{tag}'")))?;
        decode(value.clone()).map_err(|e| Failure::new("DecodeError", format!("trigger '{tag}'")).caused_by(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::LogMessage;

    struct Opaque;

    impl Serialize for Opaque {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not serializable"))
        }
    }

    #[test]
    fn test_admit_durable_workload() {
        let msg = LogMessage::new("hi");
        let payload = admit(identity("LogMessage", &msg), &msg).unwrap();
        match payload {
            Payload::Durable { tag, value } => {
                assert_eq!(tag, LogMessage::TAG);
                assert_eq!(value["message"], "hi");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_admit_value_rejects_opaque() {
        let err = admit_value(&Opaque).unwrap_err();
        match err {
            SchedulerError::InvalidArgument { message, source } => {
                assert!(message.contains("Opaque@"), "{message}");
                assert!(source.is_some());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        let codecs = Codecs::new();
        let err = codecs.decode_workload("nope", &Value::Null).err().unwrap();
        assert_eq!(err.type_name(), "UnknownTag");
    }

    #[test]
    fn test_builtins_decode() {
        let codecs = Codecs::with_builtins();
        let value = serde_json::json!({ "message": "hello" });
        let workload = codecs.decode_workload(LogMessage::TAG, &value).unwrap();
        assert!(workload.durable().is_some());
    }
}
