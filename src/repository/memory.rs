//! In-process ledger store
//!
//! Mirrors the Postgres guarantees without a database: a per-title async mutex
//! stands in for the `FOR UPDATE` row lock, and the active-pair index is checked
//! and reserved under one lock so two inserts for the same (user, title) can
//! never both succeed. Inserted loans stay private to their checkout until
//! commit; an uncommitted checkout releases its reservations when dropped.

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    error::{AppError, AppResult},
    models::{Loan, LoanFilter, NewLoan, Title},
};

use super::{CheckoutTx, LedgerStore};

#[derive(Default)]
struct Ledger {
    loans: BTreeMap<i32, Loan>,
    /// (user_id, title_id) of every active loan, committed or staged
    active: HashMap<(i32, i32), i32>,
    /// Committed active loans per title
    active_per_title: HashMap<i32, i64>,
    last_id: i32,
}

impl Ledger {
    fn active_for(&self, title_id: i32) -> i64 {
        self.active_per_title.get(&title_id).copied().unwrap_or(0)
    }
}

#[derive(Default)]
struct Inner {
    titles: RwLock<HashMap<i32, Title>>,
    title_locks: Mutex<HashMap<i32, Arc<AsyncMutex<()>>>>,
    ledger: Mutex<Ledger>,
}

impl Inner {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn title(&self, title_id: i32) -> Option<Title> {
        self.titles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&title_id)
            .cloned()
    }

    fn title_lock(&self, title_id: i32) -> Arc<AsyncMutex<()>> {
        self.title_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(title_id)
            .or_default()
            .clone()
    }
}

/// Ledger held in process memory
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_titles(titles: impl IntoIterator<Item = Title>) -> Self {
        let store = Self::new();
        {
            let mut map = store.inner.titles.write().unwrap_or_else(PoisonError::into_inner);
            for title in titles {
                map.insert(title.id, title);
            }
        }
        store
    }

    /// Load the catalog from a JSON array of titles
    pub fn from_seed_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Internal(format!("Cannot read seed file {}: {}", path.display(), e)))?;
        let titles: Vec<Title> = serde_json::from_str(&content)
            .map_err(|e| AppError::Internal(format!("Invalid seed file {}: {}", path.display(), e)))?;
        Ok(Self::with_titles(titles))
    }

    /// Number of loan rows, active or closed
    pub fn loan_count(&self) -> usize {
        self.inner.ledger().loans.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn begin_checkout(&self, title_id: i32) -> AppResult<Box<dyn CheckoutTx>> {
        if self.inner.title(title_id).is_none() {
            return Err(AppError::NotFound(format!("Title with id {} not found", title_id)));
        }

        let guard = self.inner.title_lock(title_id).lock_owned().await;

        // Re-read under the lock
        let title = self
            .inner
            .title(title_id)
            .ok_or_else(|| AppError::NotFound(format!("Title with id {} not found", title_id)))?;

        Ok(Box::new(MemoryCheckout {
            inner: self.inner.clone(),
            title,
            staged: Vec::new(),
            _guard: guard,
        }))
    }

    async fn get_title(&self, title_id: i32) -> AppResult<Title> {
        self.inner
            .title(title_id)
            .ok_or_else(|| AppError::NotFound(format!("Title with id {} not found", title_id)))
    }

    async fn get_titles(&self, title_ids: &[i32]) -> AppResult<Vec<Title>> {
        let titles = self.inner.titles.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<Title> = title_ids.iter().filter_map(|id| titles.get(id).cloned()).collect();
        found.sort_by_key(|t| t.id);
        found.dedup_by_key(|t| t.id);
        Ok(found)
    }

    async fn count_titles(&self) -> AppResult<i64> {
        Ok(self.inner.titles.read().unwrap_or_else(PoisonError::into_inner).len() as i64)
    }

    async fn count_active_loans(&self, title_id: i32) -> AppResult<i64> {
        Ok(self.inner.ledger().active_for(title_id))
    }

    async fn get_loan(&self, loan_id: i32) -> AppResult<Loan> {
        self.inner
            .ledger()
            .loans
            .get(&loan_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))
    }

    async fn close_loan(&self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Option<Loan>> {
        let mut ledger = self.inner.ledger();
        let closed = match ledger.loans.get_mut(&loan_id) {
            Some(loan) if loan.returned_at.is_none() => {
                loan.returned_at = Some(returned_at);
                loan.clone()
            }
            _ => return Ok(None),
        };
        ledger.active.remove(&(closed.user_id, closed.title_id));
        if let Some(count) = ledger.active_per_title.get_mut(&closed.title_id) {
            *count -= 1;
        }
        Ok(Some(closed))
    }

    async fn list_loans(&self, filter: &LoanFilter) -> AppResult<Vec<Loan>> {
        let ledger = self.inner.ledger();
        let mut loans: Vec<Loan> = ledger.loans.values().filter(|l| filter.matches(l)).cloned().collect();
        loans.sort_by(|a, b| b.borrowed_at.cmp(&a.borrowed_at).then(b.id.cmp(&a.id)));
        Ok(loans)
    }

    async fn loans_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        let ledger = self.inner.ledger();
        let mut loans: Vec<Loan> = ledger
            .loans
            .values()
            .filter(|l| l.is_active() && l.due_at >= from && l.due_at < to)
            .cloned()
            .collect();
        loans.sort_by(|a, b| a.due_at.cmp(&b.due_at).then(a.id.cmp(&b.id)));
        Ok(loans)
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Checkout holding the title mutex
pub struct MemoryCheckout {
    inner: Arc<Inner>,
    title: Title,
    staged: Vec<Loan>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryCheckout {
    fn release_reservations(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        let staged = std::mem::take(&mut self.staged);
        let mut ledger = self.inner.ledger();
        for loan in staged {
            ledger.active.remove(&(loan.user_id, loan.title_id));
        }
    }
}

#[async_trait]
impl CheckoutTx for MemoryCheckout {
    fn title(&self) -> &Title {
        &self.title
    }

    async fn active_loan_count(&mut self) -> AppResult<i64> {
        let committed = self.inner.ledger().active_for(self.title.id);
        Ok(committed + self.staged.len() as i64)
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        let mut ledger = self.inner.ledger();
        let key = (loan.user_id, loan.title_id);
        if ledger.active.contains_key(&key) {
            return Err(AppError::DuplicateActiveLoan {
                user_id: loan.user_id,
                title_id: loan.title_id,
            });
        }

        ledger.last_id += 1;
        let created = Loan {
            id: ledger.last_id,
            user_id: loan.user_id,
            title_id: loan.title_id,
            borrowed_at: loan.borrowed_at,
            due_at: loan.due_at,
            returned_at: None,
        };
        ledger.active.insert(key, created.id);
        drop(ledger);

        self.staged.push(created.clone());
        Ok(created)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let mut checkout = self;
        let staged = std::mem::take(&mut checkout.staged);
        let mut ledger = checkout.inner.ledger();
        for loan in staged {
            *ledger.active_per_title.entry(loan.title_id).or_default() += 1;
            ledger.loans.insert(loan.id, loan);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        let mut checkout = self;
        checkout.release_reservations();
        Ok(())
    }
}

impl Drop for MemoryCheckout {
    fn drop(&mut self) {
        self.release_reservations();
    }
}
