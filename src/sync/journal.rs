//! Saving queued writes between runs.
//!
//! A CLI invocation ends long before an offline change can reach the backend. The engine's state
//! is written to `pending.json` on the way out and loaded on the next run, so the queued writes are
//! sent once the backend is reachable again.

use crate::model::{Bill, BillId, Identity, TempId};
use crate::sync::queue::{Operation, Undo};
use crate::sync::SyncEngine;
use crate::{utils, Res};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const JOURNAL_VERSION: u8 = 1;

/// The bills and queued writes of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    version: u8,
    saved_at: DateTime<Utc>,
    bills: Vec<Bill>,
    tasks: Vec<SavedTask>,
    /// Temporary ids the backend has already confirmed, which queued tasks may still refer to.
    #[serde(default)]
    assigned: Vec<(TempId, BillId)>,
}

/// A queued write as saved in the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedTask {
    pub record: Identity,
    pub op: Operation,
    pub undo: Undo,
    #[serde(default)]
    pub attempts: u32,
}

impl Journal {
    pub fn bills(&self) -> &[Bill] {
        &self.bills
    }

    pub fn tasks(&self) -> &[SavedTask] {
        &self.tasks
    }

    pub fn saved_at(&self) -> DateTime<Utc> {
        self.saved_at
    }

    /// True if there is nothing worth saving.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Loads the journal at `path`, `None` if there is none.
    pub async fn load(path: &Path) -> Res<Option<Self>> {
        let Some(content) = utils::read_optional(path).await? else {
            return Ok(None);
        };
        let journal: Journal = serde_json::from_str(&content)
            .with_context(|| format!("Unable to parse the journal at {}", path.display()))?;
        anyhow::ensure!(
            journal.version == JOURNAL_VERSION,
            "Unsupported journal version {} in {}",
            journal.version,
            path.display()
        );
        Ok(Some(journal))
    }

    pub async fn save(&self, path: &Path) -> Res<()> {
        utils::serialize(path, self)
            .await
            .context("Unable to save the journal")
    }

    pub async fn remove(path: &Path) -> Res<()> {
        utils::remove(path).await
    }
}

impl SyncEngine {
    /// Captures the store and the queue. Writes that are out at the moment are saved as queued.
    pub fn export(&self) -> Journal {
        let store = self.store();
        let queue = self.queue();
        Journal {
            version: JOURNAL_VERSION,
            saved_at: self.clock().now(),
            bills: store.list().to_vec(),
            tasks: queue
                .tasks()
                .iter()
                .map(|t| SavedTask {
                    record: t.record().clone(),
                    op: t.op().clone(),
                    undo: t.undo().clone(),
                    attempts: t.attempts(),
                })
                .collect(),
            assigned: queue
                .resolved()
                .iter()
                .map(|(temp_id, id)| (temp_id.clone(), id.clone()))
                .collect(),
        }
    }

    /// Replaces the store and the queue with the journal's. Meant for a fresh engine, before the
    /// first `probe`.
    pub fn import(&self, journal: Journal) {
        let count = journal.tasks.len();
        {
            let mut store = self.store();
            let mut queue = self.queue();
            store.replace_all(journal.bills);
            queue.clear();
            for (temp_id, id) in journal.assigned {
                queue.assign_id(temp_id, id);
            }
            for task in journal.tasks {
                queue.push(task.record, task.op, task.undo, task.attempts);
            }
        }
        debug!("Loaded {count} queued writes from the journal");
        self.notify_change();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TestBillApi;
    use crate::model::{Amount, BillFields};
    use crate::test::engine_with;
    use chrono::NaiveDate;
    use std::str::FromStr;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_journal_survives_a_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pending.json");
        assert!(Journal::load(&path).await.unwrap().is_none());

        let (engine, _api, _observer) = engine_with(TestBillApi::new());
        let fields = BillFields::new(
            "RENT",
            Amount::from_str("1200").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
        );
        let ticket = engine.create(fields.clone()).unwrap();
        let record = ticket.target().clone();
        engine.export().save(&path).await.unwrap();

        let journal = Journal::load(&path).await.unwrap().unwrap();
        assert_eq!(journal.tasks().len(), 1);
        assert_eq!(journal.tasks()[0].op, Operation::Create(fields));

        let (restarted, api, _observer) = engine_with(TestBillApi::new());
        restarted.import(journal);
        assert!(restarted.find(&record).is_some());
        assert_eq!(restarted.pending_count(), 1);

        restarted.probe().await;
        assert_eq!(restarted.pending_count(), 0);
        assert_eq!(api.bills().len(), 1);
        let bill = restarted.find(&record).unwrap();
        assert!(matches!(bill.identity(), Identity::Permanent(_)));
        assert!(bill.is_synced());

        Journal::remove(&path).await.unwrap();
        assert!(Journal::load(&path).await.unwrap().is_none());
    }
}
