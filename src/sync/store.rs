//! The local, ordered collection of bills.

use crate::model::{Bill, Identity};

/// Holds bills in display order. A bill is found by its permanent id first, then by its temporary
/// id, so a key captured before the backend confirmed a bill keeps working afterwards.
///
/// The store does no locking of its own, the engine serializes access to it.
#[derive(Debug, Default, Clone)]
pub struct BillStore {
    bills: Vec<Bill>,
}

impl BillStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &[Bill] {
        &self.bills
    }

    pub fn len(&self) -> usize {
        self.bills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bills.is_empty()
    }

    pub fn position_of(&self, key: &Identity) -> Option<usize> {
        self.bills.iter().position(|b| b.matches(key))
    }

    pub fn find_by_any_id(&self, key: &Identity) -> Option<&Bill> {
        self.position_of(key).map(|ix| &self.bills[ix])
    }

    pub(crate) fn find_mut(&mut self, key: &Identity) -> Option<&mut Bill> {
        self.position_of(key).map(move |ix| &mut self.bills[ix])
    }

    /// Looks up a key typed by a user, which may be either kind of id. Permanent ids win.
    pub fn resolve(&self, key: &str) -> Option<Identity> {
        self.bills
            .iter()
            .find(|b| b.id().is_some_and(|id| id.as_str() == key))
            .or_else(|| {
                self.bills
                    .iter()
                    .find(|b| b.temp_id().is_some_and(|t| t.as_str() == key))
            })
            .map(|b| b.identity().clone())
    }

    /// Replaces the bill that `bill` refers to, by either of its ids, in place. Appends it if there
    /// is no such bill.
    pub fn upsert_by_any_id(&mut self, bill: Bill) {
        let ix = self.position_of(bill.identity()).or_else(|| {
            bill.temp_id()
                .and_then(|t| self.position_of(&Identity::Temporary(t.clone())))
        });
        match ix {
            Some(ix) => self.bills[ix] = bill,
            None => self.bills.push(bill),
        }
    }

    /// Removes the bill and returns it along with the position it had.
    pub fn remove_by_any_id(&mut self, key: &Identity) -> Option<(usize, Bill)> {
        let ix = self.position_of(key)?;
        Some((ix, self.bills.remove(ix)))
    }

    /// Inserts at `position`, or at the end if the store has shrunk since.
    pub fn insert_at(&mut self, position: usize, bill: Bill) {
        let position = position.min(self.bills.len());
        self.bills.insert(position, bill);
    }

    pub fn replace_all(&mut self, bills: Vec<Bill>) {
        self.bills = bills;
    }

    pub fn clear(&mut self) {
        self.bills.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Amount, BillFields, BillId, TempId};
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn fields(description: &str) -> BillFields {
        BillFields::new(
            description,
            Amount::from_str("10").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        )
    }

    fn confirmed(id: &str) -> Bill {
        Bill::confirmed(BillId::new(id), fields(id))
    }

    #[test]
    fn test_upsert_replaces_temporary_in_place() {
        let mut store = BillStore::new();
        store.upsert_by_any_id(confirmed("1"));
        let temp_id = TempId::generate();
        let local = Bill::local(temp_id.clone(), fields("new"));
        store.upsert_by_any_id(local.clone());
        store.upsert_by_any_id(confirmed("3"));
        assert_eq!(store.len(), 3);

        // The backend's copy carries the temporary id it replaces.
        let server = local.adopt_temp_id(confirmed("2"));
        store.upsert_by_any_id(server);
        assert_eq!(store.len(), 3);
        assert_eq!(store.list()[1].id(), Some(&BillId::new("2")));
        assert!(store
            .find_by_any_id(&Identity::Temporary(temp_id))
            .is_some());
    }

    #[test]
    fn test_resolve_prefers_permanent_id() {
        let mut store = BillStore::new();
        let temp_id = TempId::generate();
        store.upsert_by_any_id(Bill::local(temp_id.clone(), fields("a")));
        assert_eq!(
            store.resolve(temp_id.as_str()),
            Some(Identity::Temporary(temp_id.clone()))
        );
        store.upsert_by_any_id(confirmed("7"));
        assert_eq!(
            store.resolve("7"),
            Some(Identity::Permanent(BillId::new("7")))
        );
        assert_eq!(store.resolve("nope"), None);
    }

    #[test]
    fn test_remove_and_insert_at() {
        let mut store = BillStore::new();
        for id in ["1", "2", "3"] {
            store.upsert_by_any_id(confirmed(id));
        }
        let (ix, bill) = store
            .remove_by_any_id(&Identity::Permanent(BillId::new("2")))
            .unwrap();
        assert_eq!(ix, 1);
        assert_eq!(store.len(), 2);
        store.insert_at(ix, bill);
        let ids: Vec<_> = store.list().iter().map(|b| b.identity().to_string()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        store.insert_at(99, confirmed("4"));
        assert_eq!(store.list()[3].identity().to_string(), "4");
    }

    #[test]
    fn test_remove_missing() {
        let mut store = BillStore::new();
        assert!(store
            .remove_by_any_id(&Identity::Permanent(BillId::new("x")))
            .is_none());
    }
}
