//! The queue of writes waiting to be sent to the backend.
//!
//! `SyncQueue` is plain data: it decides which tasks may be dispatched next and tracks attempts and
//! retry delays, but it never talks to the network. The engine drives it.

use crate::model::{Bill, BillFields, BillId, Identity, TempId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// The write a task performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "fields")]
pub enum Operation {
    Create(BillFields),
    /// Replaces all fields of the bill.
    Update(BillFields),
    Delete,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create(_) => "create",
            Operation::Update(_) => "update",
            Operation::Delete => "delete",
        }
    }
}

/// How to put the local store back if the task fails for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Undo {
    /// Remove the bill, it never existed on the backend.
    Discard,
    /// Put back the bill as it was before the change.
    Restore { bill: Bill },
    /// Put the deleted bill back where it was.
    Reinsert { bill: Bill, position: usize },
}

/// Where a task is in its life. Finished tasks leave the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    /// Failed at least once, waiting out its backoff.
    Retry,
    InFlight,
}

serde_plain::derive_display_from_serialize!(TaskStatus);

#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    record: Identity,
    op: Operation,
    undo: Undo,
    attempts: u32,
    status: TaskStatus,
    ready_at: Instant,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The bill this task writes, as it was known when the task was queued.
    pub fn record(&self) -> &Identity {
        &self.record
    }

    pub fn op(&self) -> &Operation {
        &self.op
    }

    pub fn undo(&self) -> &Undo {
        &self.undo
    }

    pub(crate) fn into_undo(self) -> Undo {
        self.undo
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }
}

/// What to send for a task, with the bill's id resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Create(BillFields),
    Update(BillId, BillFields),
    Delete(BillId),
}

/// A task handed out for sending.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub task: TaskId,
    /// The bill's current identity.
    pub record: Identity,
    pub request: Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// The delay before retry `n` is `n * backoff_step`.
    pub backoff_step: Duration,
}

/// The result of recording a transient failure.
#[derive(Debug)]
pub enum Attempt {
    Retry { attempts: u32, delay: Duration },
    /// The task has used all of its attempts and has left the queue.
    Exhausted(Task),
}

#[derive(Debug, Default)]
pub struct SyncQueue {
    tasks: Vec<Task>,
    next_id: u64,
    /// Temporary ids of bills the backend has since confirmed.
    resolved: HashMap<TempId, BillId>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn enqueue(&mut self, record: Identity, op: Operation, undo: Undo) -> TaskId {
        self.push(record, op, undo, 0)
    }

    /// Queues a task that already used up some attempts, e.g. one loaded from the journal.
    pub(crate) fn push(
        &mut self,
        record: Identity,
        op: Operation,
        undo: Undo,
        attempts: u32,
    ) -> TaskId {
        self.next_id += 1;
        let id = TaskId(self.next_id);
        self.tasks.push(Task {
            id,
            record,
            op,
            undo,
            attempts,
            status: TaskStatus::Pending,
            ready_at: Instant::now(),
        });
        id
    }

    /// Remembers that the bill known as `temp_id` is now `id` on the backend.
    pub fn assign_id(&mut self, temp_id: TempId, id: BillId) {
        self.resolved.insert(temp_id, id);
    }

    /// Ids the backend assigned to bills created through this queue.
    pub fn assigned_ids(&self) -> impl Iterator<Item = &BillId> {
        self.resolved.values()
    }

    pub(crate) fn resolved(&self) -> &HashMap<TempId, BillId> {
        &self.resolved
    }

    /// The current identity of `record`: its permanent id if the backend assigned one.
    pub fn resolve(&self, record: &Identity) -> Identity {
        resolve(&self.resolved, record)
    }

    /// All tasks that write `record`, however it was known when they were queued.
    pub fn tasks_for<'a>(&'a self, record: &Identity) -> impl Iterator<Item = &'a Task> + 'a {
        let key = self.resolve(record);
        self.tasks
            .iter()
            .filter(move |t| resolve(&self.resolved, &t.record) == key)
    }

    pub fn has_tasks_for(&self, record: &Identity) -> bool {
        self.tasks_for(record).next().is_some()
    }

    /// True if `record` has a create that has not been sent yet.
    pub fn has_unsent_create(&self, record: &Identity) -> bool {
        self.tasks_for(record).any(|t| {
            matches!(t.op, Operation::Create(_)) && t.status != TaskStatus::InFlight
        })
    }

    /// Picks up to `max` tasks that may be sent now, in queue order, and marks them in flight.
    ///
    /// Writes to one bill are kept in order: a bill's task is only picked when no earlier task for
    /// the same bill is still queued. Updates and deletes of a bill that the backend has not
    /// confirmed yet wait for its create.
    pub fn next_batch(&mut self, now: Instant, max: usize) -> Vec<Dispatch> {
        let picked = self.plan(now, max);
        let mut out = Vec::with_capacity(picked.len());
        for (ix, dispatch) in picked {
            self.tasks[ix].status = TaskStatus::InFlight;
            out.push(dispatch);
        }
        out
    }

    fn plan(&self, now: Instant, max: usize) -> Vec<(usize, Dispatch)> {
        let mut busy: HashSet<Identity> = HashSet::new();
        let mut picked = Vec::new();
        for (ix, task) in self.tasks.iter().enumerate() {
            if picked.len() >= max {
                break;
            }
            let key = self.resolve(&task.record);
            if !busy.insert(key.clone()) {
                continue;
            }
            let ready = match task.status {
                TaskStatus::Pending => true,
                TaskStatus::Retry => task.ready_at <= now,
                TaskStatus::InFlight => false,
            };
            if !ready {
                continue;
            }
            let request = match (&task.op, &key) {
                (Operation::Create(fields), _) => Request::Create(fields.clone()),
                (Operation::Update(fields), Identity::Permanent(id)) => {
                    Request::Update(id.clone(), fields.clone())
                }
                (Operation::Delete, Identity::Permanent(id)) => Request::Delete(id.clone()),
                (_, Identity::Temporary(_)) => continue,
            };
            picked.push((
                ix,
                Dispatch {
                    task: task.id,
                    record: key,
                    request,
                },
            ));
        }
        picked
    }

    /// True if some task can be sent now or is waiting out a retry delay.
    pub fn has_work(&self, now: Instant) -> bool {
        !self.plan(now, 1).is_empty() || self.earliest_retry().is_some()
    }

    /// When the next task that is waiting out its backoff becomes ready.
    pub fn earliest_retry(&self) -> Option<Instant> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Retry)
            .map(|t| t.ready_at)
            .min()
    }

    /// Removes a task, e.g. because it succeeded or failed permanently.
    pub fn take(&mut self, id: TaskId) -> Option<Task> {
        let ix = self.tasks.iter().position(|t| t.id == id)?;
        Some(self.tasks.remove(ix))
    }

    /// Counts a transient failure. The task is either scheduled for a retry or, when it has run out
    /// of attempts, removed and returned.
    pub fn record_failure(
        &mut self,
        id: TaskId,
        now: Instant,
        policy: RetryPolicy,
    ) -> Option<Attempt> {
        let ix = self.tasks.iter().position(|t| t.id == id)?;
        let task = &mut self.tasks[ix];
        task.attempts += 1;
        if task.attempts >= policy.max_attempts {
            return Some(Attempt::Exhausted(self.tasks.remove(ix)));
        }
        let delay = policy.backoff_step * task.attempts;
        task.status = TaskStatus::Retry;
        task.ready_at = now + delay;
        Some(Attempt::Retry {
            attempts: task.attempts,
            delay,
        })
    }

    /// Removes every task that writes `record`.
    pub fn take_for(&mut self, record: &Identity) -> Vec<Task> {
        let key = self.resolve(record);
        let (taken, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| resolve(&self.resolved, &t.record) == key);
        self.tasks = kept;
        taken
    }

    /// Removes the queued updates of `record`. They carry whole field sets built on top of the
    /// changes before them, so they cannot outlive an earlier update that was undone.
    pub fn take_updates_for(&mut self, record: &Identity) -> Vec<Task> {
        let key = self.resolve(record);
        let (taken, kept): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| {
                matches!(t.op, Operation::Update(_)) && resolve(&self.resolved, &t.record) == key
            });
        self.tasks = kept;
        taken
    }

    /// After a failed change was undone, later tasks for the same bill must undo to the restored
    /// state rather than to the state the failed change produced.
    pub fn rebase_undo(&mut self, record: &Identity, restored: &Bill) {
        let key = self.resolve(record);
        for task in self.tasks.iter_mut() {
            if resolve(&self.resolved, &task.record) != key {
                continue;
            }
            match &mut task.undo {
                Undo::Restore { bill } | Undo::Reinsert { bill, .. } => *bill = restored.clone(),
                Undo::Discard => {}
            }
        }
    }

    /// Points only the next task for `record` at `bill`, e.g. the copy the backend just confirmed.
    pub fn rebase_next_undo(&mut self, record: &Identity, bill: &Bill) {
        let key = self.resolve(record);
        let next = self
            .tasks
            .iter_mut()
            .find(|t| resolve(&self.resolved, &t.record) == key);
        if let Some(task) = next {
            match &mut task.undo {
                Undo::Restore { bill: b } | Undo::Reinsert { bill: b, .. } => *b = bill.clone(),
                Undo::Discard => {}
            }
        }
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
        self.resolved.clear();
    }
}

fn resolve(resolved: &HashMap<TempId, BillId>, record: &Identity) -> Identity {
    match record {
        Identity::Temporary(temp_id) => match resolved.get(temp_id) {
            Some(id) => Identity::Permanent(id.clone()),
            None => record.clone(),
        },
        Identity::Permanent(_) => record.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Amount;
    use chrono::NaiveDate;
    use std::str::FromStr;

    const POLICY: RetryPolicy = RetryPolicy {
        max_attempts: 3,
        backoff_step: Duration::from_millis(1000),
    };

    fn fields(description: &str) -> BillFields {
        BillFields::new(
            description,
            Amount::from_str("10").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        )
    }

    fn temp() -> Identity {
        Identity::Temporary(TempId::generate())
    }

    fn permanent(id: &str) -> Identity {
        Identity::Permanent(BillId::new(id))
    }

    #[test]
    fn test_batches_are_fifo_and_bounded() {
        let mut queue = SyncQueue::new();
        let ids: Vec<TaskId> = (0..12)
            .map(|i| {
                queue.enqueue(
                    temp(),
                    Operation::Create(fields(&i.to_string())),
                    Undo::Discard,
                )
            })
            .collect();
        let now = Instant::now();
        let first = queue.next_batch(now, 5);
        assert_eq!(
            first.iter().map(|d| d.task).collect::<Vec<_>>(),
            ids[..5].to_vec()
        );
        // The first five are in flight.
        let second = queue.next_batch(now, 5);
        assert_eq!(second[0].task, ids[5]);
        let third = queue.next_batch(now, 5);
        assert_eq!(third.len(), 2);
        assert!(queue.next_batch(now, 5).is_empty());
    }

    #[test]
    fn test_one_task_per_record_per_batch() {
        let mut queue = SyncQueue::new();
        let record = permanent("1");
        let a = queue.enqueue(record.clone(), Operation::Update(fields("a")), Undo::Discard);
        let b = queue.enqueue(record.clone(), Operation::Update(fields("b")), Undo::Discard);
        let other = queue.enqueue(permanent("2"), Operation::Delete, Undo::Discard);

        let now = Instant::now();
        let batch: Vec<TaskId> = queue.next_batch(now, 5).iter().map(|d| d.task).collect();
        assert_eq!(batch, vec![a, other]);
        assert!(queue.next_batch(now, 5).is_empty());

        queue.take(a);
        let batch: Vec<TaskId> = queue.next_batch(now, 5).iter().map(|d| d.task).collect();
        assert_eq!(batch, vec![b]);
    }

    #[test]
    fn test_take_updates_for_keeps_deletes_and_other_bills() {
        let mut queue = SyncQueue::new();
        let record = permanent("1");
        let a = queue.enqueue(record.clone(), Operation::Update(fields("a")), Undo::Discard);
        let other = queue.enqueue(permanent("2"), Operation::Update(fields("x")), Undo::Discard);
        let b = queue.enqueue(record.clone(), Operation::Update(fields("b")), Undo::Discard);
        let delete = queue.enqueue(record.clone(), Operation::Delete, Undo::Discard);

        let taken: Vec<TaskId> = queue.take_updates_for(&record).iter().map(|t| t.id()).collect();
        assert_eq!(taken, vec![a, b]);
        let left: Vec<TaskId> = queue.tasks().iter().map(|t| t.id()).collect();
        assert_eq!(left, vec![other, delete]);
    }

    #[test]
    fn test_dependents_wait_for_create() {
        let mut queue = SyncQueue::new();
        let temp_id = TempId::generate();
        let record = Identity::Temporary(temp_id.clone());
        let create = queue.enqueue(record.clone(), Operation::Create(fields("a")), Undo::Discard);
        let update = queue.enqueue(record.clone(), Operation::Update(fields("b")), Undo::Discard);

        let now = Instant::now();
        let batch = queue.next_batch(now, 5);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].task, create);

        queue.take(create);
        // Without the id the update cannot be sent.
        assert!(queue.next_batch(now, 5).is_empty());
        assert!(!queue.has_work(now));

        queue.assign_id(temp_id, BillId::new("42"));
        let batch = queue.next_batch(now, 5);
        assert_eq!(batch[0].task, update);
        assert_eq!(
            batch[0].request,
            Request::Update(BillId::new("42"), fields("b"))
        );
        assert_eq!(batch[0].record, permanent("42"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_then_exhausted() {
        let mut queue = SyncQueue::new();
        let id = queue.enqueue(temp(), Operation::Create(fields("a")), Undo::Discard);
        let start = Instant::now();
        assert_eq!(queue.next_batch(start, 5).len(), 1);

        match queue.record_failure(id, start, POLICY).unwrap() {
            Attempt::Retry { attempts, delay } => {
                assert_eq!(attempts, 1);
                assert_eq!(delay, Duration::from_millis(1000));
            }
            Attempt::Exhausted(_) => panic!("too early"),
        }
        assert_eq!(queue.tasks()[0].status(), TaskStatus::Retry);
        assert!(queue.next_batch(start, 5).is_empty());
        assert_eq!(
            queue.earliest_retry(),
            Some(start + Duration::from_millis(1000))
        );
        assert!(queue.has_work(start));

        let later = start + Duration::from_millis(1000);
        assert_eq!(queue.next_batch(later, 5).len(), 1);
        match queue.record_failure(id, later, POLICY).unwrap() {
            Attempt::Retry { attempts, delay } => {
                assert_eq!(attempts, 2);
                assert_eq!(delay, Duration::from_millis(2000));
            }
            Attempt::Exhausted(_) => panic!("too early"),
        }

        let last = later + Duration::from_millis(2000);
        assert_eq!(queue.next_batch(last, 5).len(), 1);
        match queue.record_failure(id, last, POLICY).unwrap() {
            Attempt::Exhausted(task) => assert_eq!(task.attempts(), 3),
            Attempt::Retry { .. } => panic!("should be exhausted"),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_take_for_and_unsent_create() {
        let mut queue = SyncQueue::new();
        let record = temp();
        queue.enqueue(record.clone(), Operation::Create(fields("a")), Undo::Discard);
        queue.enqueue(record.clone(), Operation::Update(fields("b")), Undo::Discard);
        queue.enqueue(permanent("9"), Operation::Delete, Undo::Discard);
        assert!(queue.has_unsent_create(&record));

        let taken = queue.take_for(&record);
        assert_eq!(taken.len(), 2);
        assert_eq!(queue.len(), 1);
        assert!(!queue.has_tasks_for(&record));
    }

    #[test]
    fn test_in_flight_create_is_not_unsent() {
        let mut queue = SyncQueue::new();
        let record = temp();
        queue.enqueue(record.clone(), Operation::Create(fields("a")), Undo::Discard);
        queue.next_batch(Instant::now(), 5);
        assert!(!queue.has_unsent_create(&record));
    }

    #[test]
    fn test_rebase_undo() {
        let mut queue = SyncQueue::new();
        let record = permanent("1");
        let before = Bill::confirmed(BillId::new("1"), fields("before"));
        let edited = Bill::confirmed(BillId::new("1"), fields("edited"));
        queue.enqueue(
            record.clone(),
            Operation::Update(fields("x")),
            Undo::Restore {
                bill: edited.clone(),
            },
        );
        queue.rebase_undo(&record, &before);
        assert_eq!(queue.tasks()[0].undo(), &Undo::Restore { bill: before });
    }
}
