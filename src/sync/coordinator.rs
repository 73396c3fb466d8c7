//! The changes a user can make. Each one is validated first, then applied to the local store and
//! queued in one step, so a refused change leaves nothing behind.

use crate::model::{Bill, BillFields, BillPatch, Identity, Note, TempId, ValidationError};
use crate::sync::queue::{Operation, SyncQueue, Task, Undo};
use crate::sync::store::BillStore;
use crate::sync::{GroupTicket, MutationError, Outcome, SyncEngine, Ticket};
use chrono::NaiveDate;
use tracing::debug;

impl SyncEngine {
    /// Adds a bill. It shows up in the store at once under a temporary id.
    pub fn create(&self, fields: BillFields) -> Result<Ticket, MutationError> {
        self.check_session()?;
        fields.validate()?;
        let ticket = {
            let mut store = self.store();
            let mut queue = self.queue();
            self.stage_create(&mut store, &mut queue, fields)
        };
        self.after_change();
        Ok(ticket)
    }

    /// Splits `fields` into `count` monthly installments sharing a group id and adds them all.
    pub fn create_installments(
        &self,
        fields: BillFields,
        count: u32,
    ) -> Result<GroupTicket, MutationError> {
        self.check_session()?;
        fields.validate()?;
        let drafts = fields.into_installments(count)?;
        for draft in &drafts {
            draft.validate()?;
        }
        let tickets = {
            let mut store = self.store();
            let mut queue = self.queue();
            drafts
                .into_iter()
                .map(|draft| self.stage_create(&mut store, &mut queue, draft))
                .collect()
        };
        self.after_change();
        Ok(GroupTicket::new(tickets))
    }

    /// Applies `patch` to one bill.
    pub fn update(&self, key: &Identity, patch: BillPatch) -> Result<Ticket, MutationError> {
        self.check_session()?;
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch.into());
        }
        let ticket = {
            let mut store = self.store();
            let mut queue = self.queue();
            let fields = patched(&store, key, &patch)?;
            self.stage_update(&mut store, &mut queue, key, fields)?
        };
        self.after_change();
        Ok(ticket)
    }

    /// Applies the same patch to several bills. If any of them is missing or would become
    /// invalid, none is changed.
    pub fn update_many(
        &self,
        keys: &[Identity],
        patch: &BillPatch,
    ) -> Result<GroupTicket, MutationError> {
        self.check_session()?;
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch.into());
        }
        let tickets = {
            let mut store = self.store();
            let mut queue = self.queue();
            let staged = keys
                .iter()
                .map(|key| -> Result<(Identity, BillFields), MutationError> {
                    Ok((key.clone(), patched(&store, key, patch)?))
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.stage_updates(&mut store, &mut queue, staged)?
        };
        self.after_change();
        Ok(GroupTicket::new(tickets))
    }

    /// Applies `patch` to a bill and the parts of it that make sense for a whole group, the
    /// description and the notes, to the other installments of its group. A bill outside of any
    /// group is updated alone.
    pub fn update_group(
        &self,
        key: &Identity,
        patch: BillPatch,
    ) -> Result<GroupTicket, MutationError> {
        self.check_session()?;
        if patch.is_empty() {
            return Err(ValidationError::EmptyPatch.into());
        }
        let shared = patch.shared_part();
        let tickets = {
            let mut store = self.store();
            let mut queue = self.queue();
            let target = store
                .find_by_any_id(key)
                .ok_or_else(|| MutationError::NotFound(key.to_string()))?;
            let target_identity = target.identity().clone();
            let siblings: Vec<Identity> = match target.fields().group_id() {
                Some(group) if !shared.is_empty() => store
                    .list()
                    .iter()
                    .filter(|b| b.fields().group_id() == Some(group))
                    .map(|b| b.identity().clone())
                    .filter(|identity| identity != &target_identity)
                    .collect(),
                _ => Vec::new(),
            };
            let mut staged = vec![(
                target_identity.clone(),
                patched(&store, &target_identity, &patch)?,
            )];
            for sibling in siblings {
                let fields = patched(&store, &sibling, &shared)?;
                staged.push((sibling, fields));
            }
            self.stage_updates(&mut store, &mut queue, staged)?
        };
        self.after_change();
        Ok(GroupTicket::new(tickets))
    }

    /// Marks a bill paid on `on`, today if not given.
    pub fn mark_paid(&self, key: &Identity, on: Option<NaiveDate>) -> Result<Ticket, MutationError> {
        let on = on.unwrap_or_else(|| self.today());
        self.update(key, BillPatch::paid(on))
    }

    pub fn mark_unpaid(&self, key: &Identity) -> Result<Ticket, MutationError> {
        self.update(key, BillPatch::unpaid())
    }

    /// Appends a note stamped with the current time.
    pub fn add_note(&self, key: &Identity, text: &str) -> Result<Ticket, MutationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyNote.into());
        }
        let note = Note::new(text, self.clock().now());
        self.update(key, BillPatch::note(note))
    }

    /// Removes a bill. If its create has not been sent yet, the create and anything queued after
    /// it are dropped and nothing is sent at all.
    pub fn delete(&self, key: &Identity) -> Result<Ticket, MutationError> {
        self.check_session()?;
        let (ticket, cancelled) = {
            let mut store = self.store();
            let mut queue = self.queue();
            let (position, bill) = store
                .remove_by_any_id(key)
                .ok_or_else(|| MutationError::NotFound(key.to_string()))?;
            let record = bill.identity().clone();
            if queue.has_unsent_create(&record) {
                let cancelled = queue.take_for(&record);
                debug!("Dropped {} unsent writes of {record}", cancelled.len());
                (Ticket::ready(record, Outcome::Deleted), cancelled)
            } else {
                let undo = Undo::Reinsert { bill, position };
                let task = queue.enqueue(record.clone(), Operation::Delete, undo);
                debug!("Queued delete of {record}");
                (self.ticket(task, record), Vec::<Task>::new())
            }
        };
        for task in cancelled {
            self.finish(task.id(), Outcome::Cancelled);
        }
        self.after_change();
        Ok(ticket)
    }

    fn stage_create(
        &self,
        store: &mut BillStore,
        queue: &mut SyncQueue,
        fields: BillFields,
    ) -> Ticket {
        let temp_id = TempId::generate();
        let record = Identity::Temporary(temp_id.clone());
        store.upsert_by_any_id(Bill::local(temp_id, fields.clone()));
        let task = queue.enqueue(record.clone(), Operation::Create(fields), Undo::Discard);
        debug!("Queued create of {record}");
        self.ticket(task, record)
    }

    fn stage_update(
        &self,
        store: &mut BillStore,
        queue: &mut SyncQueue,
        key: &Identity,
        fields: BillFields,
    ) -> Result<Ticket, MutationError> {
        let bill = store
            .find_mut(key)
            .ok_or_else(|| MutationError::NotFound(key.to_string()))?;
        let snapshot = bill.clone();
        bill.set_fields(fields.clone());
        let record = bill.identity().clone();
        let task = queue.enqueue(
            record.clone(),
            Operation::Update(fields),
            Undo::Restore { bill: snapshot },
        );
        debug!("Queued update of {record}");
        Ok(self.ticket(task, record))
    }

    fn stage_updates(
        &self,
        store: &mut BillStore,
        queue: &mut SyncQueue,
        staged: Vec<(Identity, BillFields)>,
    ) -> Result<Vec<Ticket>, MutationError> {
        staged
            .into_iter()
            .map(|(key, fields)| self.stage_update(store, queue, &key, fields))
            .collect()
    }

    fn after_change(&self) {
        self.notify_change();
        self.kick();
    }
}

/// The fields `key` would have after `patch`.
fn patched(
    store: &BillStore,
    key: &Identity,
    patch: &BillPatch,
) -> Result<BillFields, MutationError> {
    let bill = store
        .find_by_any_id(key)
        .ok_or_else(|| MutationError::NotFound(key.to_string()))?;
    Ok(patch.apply(bill.fields())?)
}
