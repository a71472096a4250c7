//! Ledger store: the only shared mutable state of the lending core
//!
//! Two backends implement [`LedgerStore`]: [`loans::LoansRepository`] over
//! Postgres and [`memory::InMemoryLedger`] for single-process deployments and
//! tests. Both guarantee the same two primitives:
//!
//! - a checkout transaction that holds an exclusive lock on one title from
//!   [`LedgerStore::begin_checkout`] until commit or drop, so the capacity
//!   check and the insert cannot interleave with another checkout of that title;
//! - an atomic conditional insert that refuses a second active loan for the
//!   same (user, title) pair, reported as [`AppError::DuplicateActiveLoan`].
//!
//! [`AppError::DuplicateActiveLoan`]: crate::error::AppError::DuplicateActiveLoan

pub mod loans;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppResult,
    models::{Loan, LoanFilter, NewLoan, Title},
};

/// Shared handle to the configured store
pub type SharedStore = Arc<dyn LedgerStore>;

/// Read and write access to titles and the loan ledger
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a checkout transaction on a title, locking it until commit or drop.
    ///
    /// Fails with `NotFound` when the title does not exist.
    async fn begin_checkout(&self, title_id: i32) -> AppResult<Box<dyn CheckoutTx>>;

    /// Catalog read
    async fn get_title(&self, title_id: i32) -> AppResult<Title>;

    async fn get_titles(&self, title_ids: &[i32]) -> AppResult<Vec<Title>>;

    async fn count_titles(&self) -> AppResult<i64>;

    /// Active loans of a title, outside any checkout
    async fn count_active_loans(&self, title_id: i32) -> AppResult<i64>;

    async fn get_loan(&self, loan_id: i32) -> AppResult<Loan>;

    /// Set `returned_at` only if the loan is still active.
    ///
    /// Returns `None` when no row was updated.
    async fn close_loan(&self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Option<Loan>>;

    async fn list_loans(&self, filter: &LoanFilter) -> AppResult<Vec<Loan>>;

    /// Active loans with `from <= due_at < to`
    async fn loans_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AppResult<Vec<Loan>>;

    /// Connectivity probe for readiness checks
    async fn ping(&self) -> AppResult<()>;
}

/// A checkout in progress: title locked, nothing visible to others until commit.
///
/// Dropping the transaction without committing rolls it back.
#[async_trait]
pub trait CheckoutTx: Send {
    /// Title snapshot read when the lock was taken
    fn title(&self) -> &Title;

    /// Active loans of the locked title, as seen by this transaction
    async fn active_loan_count(&mut self) -> AppResult<i64>;

    /// Insert an active loan, refusing a second active loan for the same (user, title)
    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}
