//! Transactions around task attempts.
//!
//! Every attempt runs inside a [`Transaction`]. Resources the workload
//! enlists commit or roll back together with the store write that records
//! the attempt's outcome, which is enlisted last as the primary resource.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::failure::{Failure, FailureRecord};

/// Cause type recorded when a transaction outlives its timeout.
pub const TIMEOUT_CAUSE: &str = "TransactionTimeout";

/// Cause type recorded when the transaction was marked rollback-only.
pub const ROLLBACK_CAUSE: &str = "TransactionRolledBack";

/// A participant in a transaction.
pub trait TxResource: Send {
    fn prepare(&mut self) -> Result<(), Failure> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Failure>;

    fn rollback(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Active,
    MarkedRollback,
    Committed,
    RolledBack,
}

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("transaction {id} rolled back")]
    RolledBack {
        id: u64,
        #[source]
        cause: Option<FailureRecord>,
    },

    #[error("transaction {id} is {status:?}")]
    IllegalState { id: u64, status: TxStatus },

    /// Primary resource committed, a secondary one did not.
    #[error("transaction {id} committed with a failed resource")]
    Heuristic {
        id: u64,
        #[source]
        cause: FailureRecord,
    },

    #[error("a transaction is already associated")]
    AlreadyAssociated,
}

impl TxError {
    /// Durable description, used as the cause of a failed attempt.
    pub fn to_record(&self) -> FailureRecord {
        let record = FailureRecord::new(ROLLBACK_CAUSE, self.to_string());
        match self {
            Self::RolledBack { cause: Some(cause), .. } | Self::Heuristic { cause, .. } => {
                record.caused_by(cause.clone())
            }
            _ => record,
        }
    }

    /// Whether the cause chain contains the given failure type.
    pub fn caused_by(&self, type_name: &str) -> bool {
        match self {
            Self::RolledBack { cause: Some(cause), .. } | Self::Heuristic { cause, .. } => {
                cause.contains(type_name)
            }
            _ => false,
        }
    }
}

struct TxInner {
    status: TxStatus,
    rollback_cause: Option<FailureRecord>,
    resources: Vec<Box<dyn TxResource>>,
    primary: Option<Box<dyn TxResource>>,
}

/// One unit of work with a deadline.
pub struct Transaction {
    id: u64,
    timeout: Duration,
    /// `None` when the timeout is too large to represent.
    deadline: Option<Instant>,
    inner: Mutex<TxInner>,
}

impl Transaction {
    pub fn new(id: u64, timeout: Duration) -> Self {
        Self {
            id,
            timeout,
            deadline: Instant::now().checked_add(timeout),
            inner: Mutex::new(TxInner {
                status: TxStatus::Active,
                rollback_cause: None,
                resources: Vec::new(),
                primary: None,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the deadline; `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn lock(&self) -> MutexGuard<'_, TxInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> TxStatus {
        let mut inner = self.lock();
        self.check_timeout(&mut inner);
        inner.status
    }

    pub fn is_rollback_only(&self) -> bool {
        self.status() == TxStatus::MarkedRollback
    }

    pub fn enlist(&self, resource: Box<dyn TxResource>) -> Result<(), TxError> {
        let mut inner = self.lock();
        match inner.status {
            TxStatus::Active | TxStatus::MarkedRollback => {
                inner.resources.push(resource);
                Ok(())
            }
            status => Err(TxError::IllegalState { id: self.id, status }),
        }
    }

    /// Enlist the resource that decides the outcome; it commits before all others.
    pub fn enlist_primary(&self, resource: Box<dyn TxResource>) -> Result<(), TxError> {
        let mut inner = self.lock();
        if inner.status != TxStatus::Active && inner.status != TxStatus::MarkedRollback {
            return Err(TxError::IllegalState { id: self.id, status: inner.status });
        }
        if let Some(mut previous) = inner.primary.replace(resource) {
            previous.rollback();
        }
        Ok(())
    }

    pub fn set_rollback_only(&self) {
        self.set_rollback_only_with(FailureRecord::new(
            ROLLBACK_CAUSE,
            format!("transaction {} marked rollback-only", self.id),
        ));
    }

    pub fn set_rollback_only_with(&self, cause: FailureRecord) {
        let mut inner = self.lock();
        if inner.status == TxStatus::Active {
            tracing::debug!("Transaction {} marked rollback-only: {cause}", self.id);
            inner.status = TxStatus::MarkedRollback;
            inner.rollback_cause = Some(cause);
        }
    }

    fn check_timeout(&self, inner: &mut TxInner) {
        if inner.status == TxStatus::Active && self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            inner.status = TxStatus::MarkedRollback;
            inner.rollback_cause = Some(FailureRecord::new(
                TIMEOUT_CAUSE,
                format!("transaction {} timed out after {}s", self.id, self.timeout.as_secs_f64()),
            ));
        }
    }

    fn rollback_resources(inner: &mut TxInner) {
        for resource in inner.resources.iter_mut().rev() {
            resource.rollback();
        }
        if let Some(primary) = inner.primary.as_mut() {
            primary.rollback();
        }
        inner.resources.clear();
        inner.primary = None;
        inner.status = TxStatus::RolledBack;
    }

    pub fn commit(&self) -> Result<(), TxError> {
        let mut inner = self.lock();
        if inner.status != TxStatus::Active && inner.status != TxStatus::MarkedRollback {
            return Err(TxError::IllegalState { id: self.id, status: inner.status });
        }
        self.check_timeout(&mut inner);

        if inner.status == TxStatus::MarkedRollback {
            let cause = inner.rollback_cause.take();
            Self::rollback_resources(&mut inner);
            return Err(TxError::RolledBack { id: self.id, cause });
        }

        let mut prepared = Ok(());
        for resource in inner.resources.iter_mut() {
            prepared = resource.prepare();
            if prepared.is_err() {
                break;
            }
        }
        if prepared.is_ok() {
            if let Some(primary) = inner.primary.as_mut() {
                prepared = primary.prepare();
                if prepared.is_ok() {
                    prepared = primary.commit();
                }
            }
        }
        if let Err(failure) = prepared {
            // A primary that failed to commit has already discarded its work.
            inner.primary = None;
            Self::rollback_resources(&mut inner);
            return Err(TxError::RolledBack { id: self.id, cause: Some(FailureRecord::capture(&failure)) });
        }

        let mut heuristic = None;
        for resource in inner.resources.iter_mut() {
            if let Err(failure) = resource.commit() {
                tracing::warn!("Resource failed to commit in transaction {}: {failure}", self.id);
                if heuristic.is_none() {
                    heuristic = Some(FailureRecord::capture(&failure));
                }
            }
        }
        inner.resources.clear();
        inner.primary = None;
        inner.status = TxStatus::Committed;

        match heuristic {
            Some(cause) => Err(TxError::Heuristic { id: self.id, cause }),
            None => Ok(()),
        }
    }

    pub fn rollback(&self) -> Result<(), TxError> {
        let mut inner = self.lock();
        match inner.status {
            TxStatus::Active | TxStatus::MarkedRollback => {
                Self::rollback_resources(&mut inner);
                Ok(())
            }
            status => Err(TxError::IllegalState { id: self.id, status }),
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).field("timeout", &self.timeout).finish()
    }
}

/// The transaction currently associated with an attempt.
#[derive(Debug, Default)]
pub struct Association {
    current: Option<Arc<Transaction>>,
}

impl Association {
    pub fn current(&self) -> Option<&Arc<Transaction>> {
        self.current.as_ref()
    }
}

/// Transaction manager the coordinator runs attempts under.
pub trait TransactionManager: Send + Sync {
    /// Begin a transaction and associate it.
    fn begin(&self, assoc: &mut Association, timeout: Duration) -> Result<Arc<Transaction>, TxError>;

    fn commit(&self, assoc: &mut Association) -> Result<(), TxError> {
        match assoc.current.take() {
            Some(tx) => tx.commit(),
            None => Err(TxError::IllegalState { id: 0, status: TxStatus::RolledBack }),
        }
    }

    fn rollback(&self, assoc: &mut Association) -> Result<(), TxError> {
        match assoc.current.take() {
            Some(tx) => tx.rollback(),
            None => Ok(()),
        }
    }

    fn is_rollback_only(&self, assoc: &Association) -> bool {
        assoc.current.as_ref().is_some_and(|tx| tx.is_rollback_only())
    }

    /// Detach the current transaction so another can be started.
    fn suspend(&self, assoc: &mut Association) -> Option<Arc<Transaction>> {
        assoc.current.take()
    }

    fn resume(&self, assoc: &mut Association, tx: Arc<Transaction>) -> Result<(), TxError> {
        if assoc.current.is_some() {
            return Err(TxError::AlreadyAssociated);
        }
        assoc.current = Some(tx);
        Ok(())
    }
}

/// In-process transaction manager.
#[derive(Debug, Default)]
pub struct LocalTransactionManager {
    next_id: AtomicU64,
}

impl LocalTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionManager for LocalTransactionManager {
    fn begin(&self, assoc: &mut Association, timeout: Duration) -> Result<Arc<Transaction>, TxError> {
        if assoc.current.is_some() {
            return Err(TxError::AlreadyAssociated);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let tx = Arc::new(Transaction::new(id, timeout));
        assoc.current = Some(tx.clone());
        Ok(tx)
    }
}
