//! Scheduler error taxonomy.
//!
//! Submission errors are returned synchronously and never persisted.
//! Execution errors are stored with the task and surface through the
//! result accessors of [`crate::TaskStatus`].

use crate::codec::EncodeError;
use crate::failure::FailureRecord;
use crate::store::StoreError;
use crate::tasks::TaskId;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A malformed argument. For gate rejections the message is the identity
    /// of the offending object and the source is the encoding failure.
    #[error("{message}")]
    InvalidArgument {
        message: String,
        #[source]
        source: Option<EncodeError>,
    },

    #[error("required argument missing: {0}")]
    NullArgument(&'static str),

    #[error("{message}")]
    RejectedExecution {
        message: String,
        #[source]
        cause: Option<FailureRecord>,
    },

    /// Terminal failure caused by a rolled back or timed out transaction.
    #[error("task {task_id} aborted after {attempts} consecutive failed attempts")]
    Aborted {
        task_id: TaskId,
        attempts: u32,
        #[source]
        cause: FailureRecord,
    },

    /// Terminal failure raised by the workload or the trigger.
    #[error("task {task_id} failed after {attempts} consecutive failed attempts")]
    Execution {
        task_id: TaskId,
        attempts: u32,
        #[source]
        cause: FailureRecord,
    },

    #[error("task {task_id} execution was skipped")]
    Skipped {
        task_id: TaskId,
        #[source]
        cause: Option<FailureRecord>,
    },

    #[error("result of task {task_id} ({type_name}) could not be stored")]
    ResultNotEncodable {
        task_id: TaskId,
        type_name: String,
        #[source]
        cause: FailureRecord,
    },

    #[error("task {0} was cancelled")]
    Cancelled(TaskId),

    #[error("stored result cannot be decoded: {0}")]
    ResultDecode(#[source] serde_json::Error),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedulerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into(), source: None }
    }

    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        Self::RejectedExecution { message: message.into(), cause: None }
    }

    /// Failure record carried by execution-time errors.
    pub fn cause(&self) -> Option<&FailureRecord> {
        match self {
            Self::Aborted { cause, .. }
            | Self::Execution { cause, .. }
            | Self::ResultNotEncodable { cause, .. } => Some(cause),
            Self::Skipped { cause, .. } | Self::RejectedExecution { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }
}
