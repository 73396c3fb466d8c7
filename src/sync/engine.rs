use crate::api::{ApiError, ApiResult, BillApi, SessionProvider};
use crate::model::{Bill, Identity, Summary};
use crate::sync::queue::{Attempt, Dispatch, Operation, Request, SyncQueue, Task, TaskId, Undo};
use crate::sync::store::BillStore;
use crate::sync::{
    reconcile, Clock, Connectivity, DrainReport, MutationError, Notice, Observer, Outcome,
    SyncSettings, Ticket,
};
use chrono::NaiveDate;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// The sync engine. Cloning is cheap, all clones share the same store and queue.
///
/// Changes are made through the methods in `coordinator.rs`. They apply to the local store at once
/// and return a `Ticket`. Queued writes are sent by `drain`, which is started after every change
/// while the backend is reachable and by `probe` when it becomes reachable again.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn BillApi>,
    session: Arc<dyn SessionProvider>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn Observer>,
    settings: SyncSettings,
    // Lock order: store, then queue, then waiters. None is held across an await.
    store: Mutex<BillStore>,
    queue: Mutex<SyncQueue>,
    waiters: Mutex<HashMap<TaskId, oneshot::Sender<Outcome>>>,
    online: AtomicBool,
    draining: AtomicBool,
    halted: AtomicBool,
    wake: Notify,
}

/// What the backend said to a dispatched write.
enum Sent {
    Saved(Bill),
    Deleted,
}

/// Clears the draining flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    /// Creates an engine with an empty store. It starts out offline, call `probe` to connect.
    pub fn new(
        api: Arc<dyn BillApi>,
        session: Arc<dyn SessionProvider>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn Observer>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                session,
                clock,
                observer,
                settings,
                store: Mutex::new(BillStore::new()),
                queue: Mutex::new(SyncQueue::new()),
                waiters: Mutex::new(HashMap::new()),
                online: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    pub fn settings(&self) -> SyncSettings {
        self.inner.settings
    }

    pub fn today(&self) -> NaiveDate {
        self.inner.clock.today()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub(crate) fn store(&self) -> MutexGuard<'_, BillStore> {
        self.inner
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn queue(&self) -> MutexGuard<'_, SyncQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<TaskId, oneshot::Sender<Outcome>>> {
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A snapshot of all bills in display order.
    pub fn list(&self) -> Vec<Bill> {
        self.store().list().to_vec()
    }

    pub fn find(&self, key: &Identity) -> Option<Bill> {
        self.store().find_by_any_id(key).cloned()
    }

    /// Looks up a bill by an id typed by the user, either a permanent or a temporary one.
    pub fn resolve(&self, key: &str) -> Option<Identity> {
        self.store().resolve(key)
    }

    pub fn summary(&self) -> Summary {
        let today = self.today();
        Summary::compute(self.store().list(), today, self.inner.settings.tiers)
    }

    /// The number of writes not yet confirmed by the backend.
    pub fn pending_count(&self) -> usize {
        self.queue().len()
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// True after the backend rejected the session. Nothing is synced until `resume`.
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    /// True while queued writes are being sent.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// True if queued writes may be sent now.
    pub fn can_sync(&self) -> bool {
        self.is_online() && !self.is_halted() && self.inner.session.is_valid()
    }

    /// Marks the backend as unreachable, e.g. when the host reports the network is gone. Queued
    /// writes stay queued. The next successful `probe` brings the engine back online.
    pub fn set_offline(&self) {
        if self.inner.online.swap(false, Ordering::SeqCst) {
            warn!("Working offline, changes will be sent later");
            self.inner.wake.notify_one();
        }
    }

    /// Allows syncing again after the user logged in anew.
    pub fn resume(&self) {
        if self.inner.halted.swap(false, Ordering::SeqCst) {
            info!("Syncing resumed");
        }
    }

    pub(crate) fn check_session(&self) -> Result<(), MutationError> {
        if self.is_halted() {
            return Err(MutationError::SessionExpired);
        }
        Ok(())
    }

    /// Registers a waiter for `task`.
    pub(crate) fn ticket(&self, task: TaskId, target: Identity) -> Ticket {
        let (tx, rx) = oneshot::channel();
        self.waiters().insert(task, tx);
        Ticket::new(target, rx)
    }

    pub(crate) fn finish(&self, task: TaskId, outcome: Outcome) {
        let waiter = self.waiters().remove(&task);
        if let Some(tx) = waiter {
            // The caller may have dropped the ticket.
            let _ = tx.send(outcome);
        }
    }

    pub(crate) fn notify_change(&self) {
        let bills = self.list();
        self.inner.observer.on_change(&bills);
    }

    pub(crate) fn notice(&self, notice: Notice) {
        self.inner.observer.on_notice(&notice);
    }

    /// Starts a drain in the background if the backend is reachable. Without a tokio runtime the
    /// writes wait for the next `drain` or `probe`.
    pub(crate) fn kick(&self) {
        self.inner.wake.notify_one();
        if !self.can_sync() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = self.clone();
                handle.spawn(async move {
                    engine.drain().await;
                });
            }
            Err(_) => trace!("No runtime, the drain waits for the next probe"),
        }
    }

    /// Checks whether the backend is reachable and the session is still accepted.
    ///
    /// When the backend comes back after being unreachable the store is first reconciled with the
    /// backend's records, then the queue is drained. An unreachable backend only flips the engine
    /// offline. A rejected session halts syncing.
    pub async fn probe(&self) -> Connectivity {
        if self.is_halted() {
            return Connectivity::Unauthorized;
        }
        let result = self.inner.api.ping().await;
        match result {
            Ok(()) => {
                if !self.is_online() {
                    info!("The backend is reachable, reconciling");
                    if let Err(e) = self.reconcile().await {
                        if self.is_halted() {
                            return Connectivity::Unauthorized;
                        }
                        debug!("Staying offline, reconciling failed: {e}");
                        return Connectivity::Offline;
                    }
                    self.inner.online.store(true, Ordering::SeqCst);
                    self.notice(Notice::success("Connected to the backend"));
                }
                self.drain().await;
                if self.is_halted() {
                    Connectivity::Unauthorized
                } else {
                    Connectivity::Online
                }
            }
            Err(ApiError::Unauthorized(message)) => {
                self.reject_session(&message);
                Connectivity::Unauthorized
            }
            Err(e) => {
                if self.inner.online.swap(false, Ordering::SeqCst) {
                    warn!("The backend is unreachable: {e}");
                    self.notice(Notice::warning("Offline, changes will be sent later"));
                    self.inner.wake.notify_one();
                } else {
                    debug!("The backend is still unreachable: {e}");
                }
                Connectivity::Offline
            }
        }
    }

    /// Replaces the store with the backend's records, keeping local-only bills and changes that
    /// are still queued.
    pub async fn reconcile(&self) -> ApiResult<()> {
        let result = self.inner.api.list().await;
        let server = match result {
            Ok(bills) => bills,
            Err(e) => {
                if let ApiError::Unauthorized(message) = &e {
                    self.reject_session(message);
                }
                return Err(e);
            }
        };
        let count = server.len();
        {
            let mut store = self.store();
            let queue = self.queue();
            let merged = reconcile::merge(server, store.list(), &queue);
            store.replace_all(merged);
        }
        debug!("Reconciled with {count} bills from the backend");
        self.notify_change();
        Ok(())
    }

    /// Sends queued writes until the queue is empty, the backend becomes unreachable or the
    /// session is rejected. Returns `None` if another drain is already running, that drain picks
    /// up anything queued in the meantime.
    pub async fn drain(&self) -> Option<DrainReport> {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            trace!("A drain is already running");
            return None;
        }
        let mut report = DrainReport::default();
        loop {
            {
                let _guard = DrainGuard(&self.inner.draining);
                self.run_passes(&mut report).await;
            }
            // Work queued while the flag was still set found the drain busy.
            let has_work = self.queue().has_work(Instant::now());
            if !has_work
                || !self.can_sync()
                || self.inner.draining.swap(true, Ordering::SeqCst)
            {
                break;
            }
        }
        if report.passes > 0 {
            debug!(
                "Drain done: {} passes, {} synced, {} retried, {} failed",
                report.passes, report.succeeded, report.retried, report.failed
            );
        }
        Some(report)
    }

    async fn run_passes(&self, report: &mut DrainReport) {
        let batch_size = self.inner.settings.batch_size.max(1);
        loop {
            if !self.can_sync() {
                trace!("Not able to sync, leaving the rest queued");
                break;
            }
            let batch = self.queue().next_batch(Instant::now(), batch_size);
            if batch.is_empty() {
                let next_retry = self.queue().earliest_retry();
                let Some(at) = next_retry else {
                    break;
                };
                trace!("Waiting for the next retry");
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = self.inner.wake.notified() => {}
                }
                continue;
            }
            report.passes += 1;
            report.largest_batch = report.largest_batch.max(batch.len());
            debug!("Sending {} writes", batch.len());
            let results = join_all(batch.into_iter().map(|dispatch| async move {
                let result = self.send(&dispatch.request).await;
                (dispatch, result)
            }))
            .await;
            for (dispatch, result) in results {
                self.settle(dispatch, result, report);
            }
        }
    }

    async fn send(&self, request: &Request) -> ApiResult<Sent> {
        match request {
            Request::Create(fields) => self.inner.api.create(fields).await.map(Sent::Saved),
            Request::Update(id, fields) => {
                self.inner.api.update(id, fields).await.map(Sent::Saved)
            }
            Request::Delete(id) => self.inner.api.delete(id).await.map(|()| Sent::Deleted),
        }
    }

    fn settle(&self, dispatch: Dispatch, result: ApiResult<Sent>, report: &mut DrainReport) {
        match result {
            Ok(sent) => self.succeed(dispatch, sent, report),
            Err(ApiError::Unauthorized(message)) => self.reject_session(&message),
            Err(ApiError::NotFound(message)) if matches!(dispatch.request, Request::Delete(_)) => {
                debug!("{} was already gone from the backend: {message}", dispatch.record);
                self.succeed(dispatch, Sent::Deleted, report);
            }
            Err(e) if e.is_transient() => {
                let policy = self.inner.settings.retry;
                let attempt = self
                    .queue()
                    .record_failure(dispatch.task, Instant::now(), policy);
                match attempt {
                    Some(Attempt::Retry { attempts, delay }) => {
                        report.retried += 1;
                        debug!(
                            "Writing {} failed on attempt {attempts}, retrying in {delay:?}: {e}",
                            dispatch.record
                        );
                    }
                    Some(Attempt::Exhausted(task)) => {
                        let reason = format!("gave up after {} attempts: {e}", task.attempts());
                        self.fail(task, &reason, report);
                    }
                    // The queue was cleared while the write was out.
                    None => {}
                }
            }
            Err(e) => {
                let task = self.queue().take(dispatch.task);
                if let Some(task) = task {
                    self.fail(task, &e.to_string(), report);
                }
            }
        }
    }

    fn succeed(&self, dispatch: Dispatch, sent: Sent, report: &mut DrainReport) {
        let outcome = {
            let mut store = self.store();
            let mut queue = self.queue();
            let Some(task) = queue.take(dispatch.task) else {
                return;
            };
            match sent {
                Sent::Deleted => Outcome::Deleted,
                Sent::Saved(server) => {
                    if let (Identity::Temporary(temp_id), Some(id)) = (task.record(), server.id()) {
                        queue.assign_id(temp_id.clone(), id.clone());
                    }
                    let record = task.record();
                    let later = queue.has_tasks_for(record);
                    match store.find_mut(record) {
                        // Deleted locally while the write was out, the queued delete follows.
                        None => Outcome::Synced(server),
                        Some(local) if later => {
                            // Later edits win locally, they are sent next.
                            let confirmed = local.adopt_temp_id(server);
                            if let Some(id) = confirmed.id() {
                                local.assign_id(id.clone());
                            }
                            queue.rebase_next_undo(record, &confirmed);
                            Outcome::Synced(confirmed)
                        }
                        Some(local) => {
                            let confirmed = local.adopt_temp_id(server);
                            *local = confirmed.clone();
                            Outcome::Synced(confirmed)
                        }
                    }
                }
            }
        };
        report.succeeded += 1;
        trace!("{} {outcome}", dispatch.record);
        self.finish(dispatch.task, outcome);
        self.notify_change();
    }

    /// Undoes the local change of a task that failed for good.
    fn fail(&self, task: Task, reason: &str, report: &mut DrainReport) {
        report.failed += 1;
        let task_id = task.id();
        let record = task.record().clone();
        let op = task.op().name();
        let mut dependents = Vec::new();
        let mut dependent_reason = String::new();
        let notice = {
            let mut store = self.store();
            let mut queue = self.queue();
            let current = queue.resolve(&record);
            match task.into_undo() {
                Undo::Discard => {
                    let removed = store.remove_by_any_id(&record);
                    dependents = queue.take_for(&record);
                    dependent_reason = format!("the bill was never saved: {reason}");
                    let name = removed
                        .map(|(_, bill)| bill.fields().description().to_string())
                        .unwrap_or_else(|| record.to_string());
                    Notice::error(format!("Could not save '{name}': {reason}"))
                }
                Undo::Restore { mut bill } => {
                    if let Identity::Permanent(id) = &current {
                        bill.assign_id(id.clone());
                    }
                    let name = bill.fields().description().to_string();
                    if store.find_by_any_id(&record).is_some() {
                        store.upsert_by_any_id(bill.clone());
                    }
                    // Later updates still hold the undone fields, they are dropped with it.
                    dependents = queue.take_updates_for(&record);
                    dependent_reason = format!("an earlier change to the bill was undone: {reason}");
                    queue.rebase_undo(&record, &bill);
                    let also = match dependents.len() {
                        0 => String::new(),
                        1 => " along with the change made after it".to_string(),
                        n => format!(" along with the {n} changes made after it"),
                    };
                    Notice::error(format!(
                        "Could not update '{name}': {reason}. The change was undone{also}"
                    ))
                }
                Undo::Reinsert { mut bill, position } => {
                    if let Identity::Permanent(id) = &current {
                        bill.assign_id(id.clone());
                    }
                    let name = bill.fields().description().to_string();
                    if store.find_by_any_id(bill.identity()).is_some() {
                        store.upsert_by_any_id(bill);
                    } else {
                        store.insert_at(position, bill);
                    }
                    Notice::error(format!(
                        "Could not delete '{name}': {reason}. The bill was restored"
                    ))
                }
            }
        };
        warn!("The {op} of {record} failed for good: {reason}");
        self.finish(task_id, Outcome::Failed(reason.to_string()));
        for dependent in dependents {
            let outcome = match dependent.op() {
                Operation::Delete => Outcome::Deleted,
                _ => {
                    report.failed += 1;
                    Outcome::Failed(dependent_reason.clone())
                }
            };
            self.finish(dependent.id(), outcome);
        }
        self.notice(notice);
        self.notify_change();
    }

    /// The backend rejected the session. Syncing halts, the session is invalidated and everything
    /// local is dropped, since it belongs to a session that no longer exists.
    pub(crate) fn reject_session(&self, message: &str) {
        if self.inner.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("The backend rejected the session: {message}");
        self.inner.session.invalidate();
        self.reset();
        let waiters: Vec<_> = self.waiters().drain().collect();
        for (_, tx) in waiters {
            let _ = tx.send(Outcome::AuthRejected);
        }
        self.inner.wake.notify_one();
        self.notice(Notice::error(
            "The session has expired, log in again to keep syncing",
        ));
        self.notify_change();
    }

    fn reset(&self) {
        let mut store = self.store();
        let mut queue = self.queue();
        store.clear();
        queue.clear();
    }

    /// Drops all bills and queued writes, e.g. on logout. Waiting tickets end as cancelled.
    pub fn clear(&self) {
        self.reset();
        let waiters: Vec<_> = self.waiters().drain().collect();
        for (_, tx) in waiters {
            let _ = tx.send(Outcome::Cancelled);
        }
        self.notify_change();
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("online", &self.is_online())
            .field("halted", &self.is_halted())
            .field("bills", &self.store().len())
            .field("queued", &self.queue().len())
            .finish()
    }
}
