//! Implements the `BillApi` trait using in-memory data for testing purposes.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without a backend.

use crate::api::{ApiError, ApiResult, BillApi};
use crate::model::{Amount, Bill, BillFields, BillId, TempId};
use chrono::{Days, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

/// The calls `TestBillApi` counts and can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Ping,
    List,
    Create,
    Update,
    Delete,
}

/// What an injected failure looks like to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Unauthorized,
    NotFound,
    Rejected,
}

impl FailureKind {
    fn error(self, op: OpKind) -> ApiError {
        match self {
            FailureKind::Transient => ApiError::transient(format!("Injected failure in {op:?}")),
            FailureKind::Unauthorized => ApiError::Unauthorized("Injected".to_string()),
            FailureKind::NotFound => ApiError::NotFound("Injected".to_string()),
            FailureKind::Rejected => ApiError::Rejected {
                status: 400,
                message: "Injected".to_string(),
            },
        }
    }
}

/// A planned failure. By default it matches the next call of any kind, once.
///
/// ```
/// # use bill_sync::api::{Failure, FailureKind, OpKind};
/// // Let the first update through, then fail the next three.
/// let failure = Failure::new(FailureKind::Transient)
///     .on(OpKind::Update)
///     .after(1)
///     .times(3);
/// ```
#[derive(Debug, Clone)]
pub struct Failure {
    kind: FailureKind,
    op: Option<OpKind>,
    skip: usize,
    times: usize,
}

impl Failure {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            op: None,
            skip: 0,
            times: 1,
        }
    }

    /// Only match calls of this kind.
    pub fn on(mut self, op: OpKind) -> Self {
        self.op = Some(op);
        self
    }

    /// Let this many matching calls succeed first.
    pub fn after(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn times(mut self, times: usize) -> Self {
        self.times = times;
        self
    }

    fn matches(&self, op: OpKind) -> bool {
        match self.op {
            Some(o) => o == op,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    bills: Vec<Bill>,
    next_id: u64,
    failures: Vec<Failure>,
    calls: HashMap<OpKind, usize>,
}

/// An implementation of the `BillApi` trait that keeps bills in memory. Failures, latency and
/// going offline can be injected. It counts calls and remembers the largest number of requests
/// that were in flight at once.
#[derive(Debug, Default)]
pub struct TestBillApi {
    state: Mutex<State>,
    offline: AtomicBool,
    latency_ms: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl TestBillApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts out holding `bills`.
    pub fn with_bills(bills: Vec<Bill>) -> Self {
        let api = Self::new();
        for bill in bills {
            api.insert(bill);
        }
        api
    }

    /// Starts out holding a few sample bills.
    pub fn seeded() -> Self {
        Self::with_bills(seed_bills())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `bill` as if it had been created by someone else. A bill without an id is given one.
    pub fn insert(&self, bill: Bill) -> Bill {
        let mut state = self.state();
        let bill = match bill.id() {
            Some(_) => bill,
            None => {
                let id = state.assign_id();
                Bill::confirmed(id, bill.fields().clone())
            }
        };
        state.bills.push(bill.clone());
        bill
    }

    /// Removes a bill as if it had been deleted by someone else.
    pub fn remove(&self, id: &BillId) -> Option<Bill> {
        let mut state = self.state();
        let ix = state.bills.iter().position(|b| b.id() == Some(id))?;
        Some(state.bills.remove(ix))
    }

    pub fn bills(&self) -> Vec<Bill> {
        self.state().bills.clone()
    }

    pub fn get(&self, id: &BillId) -> Option<Bill> {
        self.state()
            .bills
            .iter()
            .find(|b| b.id() == Some(id))
            .cloned()
    }

    pub fn fail(&self, failure: Failure) {
        self.state().failures.push(failure);
    }

    /// While offline every call fails with a transient error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every call sleeps this long before it completes.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn calls(&self, op: OpKind) -> usize {
        self.state().calls.get(&op).copied().unwrap_or_default()
    }

    /// The most calls that were ever in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Counts the call and decides whether it fails.
    async fn enter(&self, op: OpKind) -> ApiResult<InFlight<'_>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        trace!("TestBillApi {op:?}");

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency as u64)).await;
        }

        let mut state = self.state();
        *state.calls.entry(op).or_default() += 1;
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::transient("Connection refused"));
        }
        if let Some(kind) = state.take_failure(op) {
            return Err(kind.error(op));
        }
        Ok(guard)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl State {
    fn assign_id(&mut self) -> BillId {
        self.next_id += 1;
        BillId::new(format!("srv-{}", self.next_id))
    }

    fn take_failure(&mut self, op: OpKind) -> Option<FailureKind> {
        let ix = self.failures.iter().position(|f| f.matches(op))?;
        let failure = &mut self.failures[ix];
        if failure.skip > 0 {
            failure.skip -= 1;
            return None;
        }
        let kind = failure.kind;
        failure.times = failure.times.saturating_sub(1);
        if failure.times == 0 {
            self.failures.remove(ix);
        }
        Some(kind)
    }

    fn position(&self, id: &BillId) -> ApiResult<usize> {
        self.bills
            .iter()
            .position(|b| b.id() == Some(id))
            .ok_or_else(|| ApiError::NotFound(format!("Bill '{id}' not found")))
    }
}

#[async_trait::async_trait]
impl BillApi for TestBillApi {
    async fn ping(&self) -> ApiResult<()> {
        let _guard = self.enter(OpKind::Ping).await?;
        Ok(())
    }

    async fn list(&self) -> ApiResult<Vec<Bill>> {
        let _guard = self.enter(OpKind::List).await?;
        Ok(self.bills())
    }

    async fn create(&self, fields: &BillFields) -> ApiResult<Bill> {
        let _guard = self.enter(OpKind::Create).await?;
        let mut state = self.state();
        let id = state.assign_id();
        let now = Utc::now();
        let bill = Bill::confirmed(id, fields.clone()).with_timestamps(Some(now), Some(now));
        state.bills.push(bill.clone());
        Ok(bill)
    }

    async fn update(&self, id: &BillId, fields: &BillFields) -> ApiResult<Bill> {
        let _guard = self.enter(OpKind::Update).await?;
        let mut state = self.state();
        let ix = state.position(id)?;
        let created_at = state.bills[ix].created_at();
        let bill = Bill::confirmed(id.clone(), fields.clone())
            .with_timestamps(created_at, Some(Utc::now()));
        state.bills[ix] = bill.clone();
        Ok(bill)
    }

    async fn delete(&self, id: &BillId) -> ApiResult<()> {
        let _guard = self.enter(OpKind::Delete).await?;
        let mut state = self.state();
        let ix = state.position(id)?;
        state.bills.remove(ix);
        Ok(())
    }
}

pub(crate) fn seed_bills() -> Vec<Bill> {
    let seed = [
        ("ENERGY", "350.00", "BOLETO", "BANK A"),
        ("PHONE", "89.90", "DEBIT", "BANK B"),
        ("INTERNET", "120.00", "CREDIT CARD", "BANK A"),
    ];
    let today = Utc::now().date_naive();
    seed.iter()
        .enumerate()
        .filter_map(|(ix, (description, amount, method, bank))| {
            let amount = Amount::from_str(amount).ok()?;
            let due_date = today.checked_add_days(Days::new(ix as u64 * 10))?;
            let fields = BillFields::new(*description, amount, due_date)
                .with_payment_method(*method)
                .with_bank(*bank);
            // `insert` assigns the id.
            Some(Bill::local(TempId::generate(), fields))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fields(description: &str) -> BillFields {
        BillFields::new(
            description,
            Amount::from_str("10").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_crud() {
        let api = TestBillApi::new();
        let bill = api.create(&fields("A")).await.unwrap();
        let id = bill.id().unwrap().clone();
        assert_eq!(api.list().await.unwrap().len(), 1);

        let updated = api.update(&id, &fields("B")).await.unwrap();
        assert_eq!(updated.fields().description(), "B");
        assert_eq!(api.get(&id).unwrap().fields().description(), "B");

        api.delete(&id).await.unwrap();
        assert!(api.list().await.unwrap().is_empty());
        assert!(matches!(
            api.delete(&id).await.unwrap_err(),
            ApiError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_failure_plan() {
        let api = TestBillApi::new();
        api.fail(
            Failure::new(FailureKind::Transient)
                .on(OpKind::Create)
                .after(1)
                .times(2),
        );
        assert!(api.create(&fields("A")).await.is_ok());
        assert!(api.ping().await.is_ok());
        assert!(api.create(&fields("B")).await.unwrap_err().is_transient());
        assert!(api.create(&fields("C")).await.unwrap_err().is_transient());
        assert!(api.create(&fields("D")).await.is_ok());
        assert_eq!(api.calls(OpKind::Create), 4);
        assert_eq!(api.bills().len(), 2);
    }

    #[tokio::test]
    async fn test_offline() {
        let api = TestBillApi::new();
        api.set_offline(true);
        assert!(api.ping().await.unwrap_err().is_transient());
        api.set_offline(false);
        assert!(api.ping().await.is_ok());
    }

    #[test]
    fn test_seeded() {
        let api = TestBillApi::seeded();
        let bills = api.bills();
        assert_eq!(bills.len(), 3);
        assert!(bills.iter().all(|b| b.id().is_some()));
    }
}
