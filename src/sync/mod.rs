//! The optimistic write/sync engine.
//!
//! Changes are applied to the local `BillStore` at once and queued in the `SyncQueue`. The engine
//! drains the queue against the backend in small concurrent batches, retries transient failures
//! with a linear backoff, swaps temporary ids for the ones the backend assigns and undoes changes
//! that fail for good. A monitor probes the backend and, when it comes back, reconciles the local
//! store with the backend's records before draining.

mod clock;
mod coordinator;
mod engine;
mod journal;
mod monitor;
mod observer;
mod queue;
mod reconcile;
mod store;


pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::SyncEngine;
pub use journal::{Journal, SavedTask};
pub use monitor::MonitorHandle;
pub use observer::{LogObserver, Notice, Observer, Severity};
pub use queue::{
    Attempt, Dispatch, Operation, Request, RetryPolicy, SyncQueue, Task, TaskId, TaskStatus, Undo,
};
pub use reconcile::merge;
pub use store::BillStore;

use crate::model::{Bill, Identity, StatusTiers, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tokio::sync::oneshot;

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(1000);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Tunables of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// How many writes are sent at the same time.
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub tiers: StatusTiers,
    pub probe_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy {
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                backoff_step: DEFAULT_BACKOFF_STEP,
            },
            tiers: StatusTiers::default(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// How a queued write ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The backend accepted the bill. This is the copy now in the store.
    Synced(Bill),
    Deleted,
    /// Failed for good and the local change was undone.
    Failed(String),
    /// The backend rejected the session. Everything queued was dropped.
    AuthRejected,
    /// The write was dropped before it was sent, e.g. the bill was deleted before its create went
    /// out.
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Synced(_) | Outcome::Deleted)
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Synced(bill) => write!(f, "synced as {}", bill.identity()),
            Outcome::Deleted => f.write_str("deleted"),
            Outcome::Failed(reason) => write!(f, "failed: {reason}"),
            Outcome::AuthRejected => f.write_str("session rejected"),
            Outcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Returned by every change. The change is already visible locally, awaiting the ticket yields how
/// the backend write ended. Dropping the ticket does not cancel anything.
#[derive(Debug)]
pub struct Ticket {
    target: Identity,
    rx: oneshot::Receiver<Outcome>,
}

impl Ticket {
    pub(crate) fn new(target: Identity, rx: oneshot::Receiver<Outcome>) -> Self {
        Self { target, rx }
    }

    /// A ticket that has already ended.
    pub(crate) fn ready(target: Identity, outcome: Outcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { target, rx }
    }

    /// The bill as it was known when the change was made.
    pub fn target(&self) -> &Identity {
        &self.target
    }

    pub async fn outcome(self) -> Outcome {
        self.rx.await.unwrap_or(Outcome::Cancelled)
    }

    /// The outcome, if the write has ended already.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }
}

/// The tickets of a change that touched several bills, e.g. all installments of a group.
#[derive(Debug)]
pub struct GroupTicket {
    tickets: Vec<Ticket>,
}

impl GroupTicket {
    pub(crate) fn new(tickets: Vec<Ticket>) -> Self {
        Self { tickets }
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Identity> {
        self.tickets.iter().map(|t| t.target())
    }

    pub fn into_tickets(self) -> Vec<Ticket> {
        self.tickets
    }

    /// Waits for every write and reports which bills succeeded and which were rolled back.
    pub async fn report(self) -> BatchReport {
        let outcomes = futures::future::join_all(self.tickets.into_iter().map(|ticket| async {
            let target = ticket.target().clone();
            (target, ticket.outcome().await)
        }))
        .await;
        let mut report = BatchReport::default();
        for (target, outcome) in outcomes {
            match outcome {
                Outcome::Synced(bill) => report.succeeded.push(bill.identity().clone()),
                Outcome::Deleted => report.succeeded.push(target),
                other => report.failed.push((target, other.to_string())),
            }
        }
        report
    }
}

/// Which bills of a multi-bill change made it to the backend. Failed bills are identified by
/// identity and carry the reason.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: Vec<Identity>,
    pub failed: Vec<(Identity, String)>,
}

impl BatchReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What one drain did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Batches sent.
    pub passes: usize,
    pub largest_batch: usize,
    pub succeeded: usize,
    /// Transient failures that were scheduled for another attempt.
    pub retried: usize,
    /// Writes that failed for good and were undone.
    pub failed: usize,
}

/// The result of probing the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
    /// The session was rejected. Syncing stops until the user logs in again.
    Unauthorized,
}

serde_plain::derive_display_from_serialize!(Connectivity);

/// Why a change was refused. Nothing was changed when this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    Invalid(ValidationError),
    NotFound(String),
    /// The backend rejected the session, log in again first.
    SessionExpired,
}

impl Display for MutationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationError::Invalid(e) => Display::fmt(e, f),
            MutationError::NotFound(key) => write!(f, "There is no bill '{key}'"),
            MutationError::SessionExpired => {
                f.write_str("The session has expired, log in again to make changes")
            }
        }
    }
}

impl std::error::Error for MutationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MutationError::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for MutationError {
    fn from(value: ValidationError) -> Self {
        MutationError::Invalid(value)
    }
}
