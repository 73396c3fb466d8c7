use crate::model::{Bill, BillId, Identity};
use crate::sync::{Operation, SyncQueue};
use std::collections::HashSet;

/// Merges the backend's list of bills with the local store after connectivity returns.
///
/// The backend's records come first, in the backend's order, followed by the bills that exist only
/// locally. Queued changes win over the backend's copy: a bill with a queued delete is left out, a
/// bill with a queued update keeps its local fields. A bill the queue has just confirmed is kept
/// even if the backend's list does not have it yet.
pub fn merge(server: Vec<Bill>, local: &[Bill], queue: &SyncQueue) -> Vec<Bill> {
    let mut merged = Vec::with_capacity(server.len() + local.len());
    let mut seen: HashSet<BillId> = HashSet::new();

    for remote in server {
        let Some(id) = remote.id().cloned() else {
            continue;
        };
        if !seen.insert(id.clone()) {
            continue;
        }
        let key = Identity::Permanent(id);
        let mut deleted = false;
        let mut updated = false;
        for task in queue.tasks_for(&key) {
            match task.op() {
                Operation::Delete => deleted = true,
                Operation::Update(_) => updated = true,
                Operation::Create(_) => {}
            }
        }
        if deleted {
            continue;
        }
        let mine = local.iter().find(|b| b.matches(&key));
        match mine {
            Some(mine) if updated => merged.push(mine.clone()),
            Some(mine) => merged.push(mine.adopt_temp_id(remote)),
            None => merged.push(remote),
        }
    }

    let confirmed: HashSet<&BillId> = queue.assigned_ids().collect();
    for bill in local {
        match bill.id() {
            None => merged.push(bill.clone()),
            Some(id) if !seen.contains(id) && confirmed.contains(id) => merged.push(bill.clone()),
            Some(_) => {}
        }
    }
    merged
}
