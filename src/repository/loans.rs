//! Postgres ledger store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::{Loan, LoanFilter, NewLoan, Title},
};

use super::{CheckoutTx, LedgerStore};

/// Partial unique index over (user_id, title_id) where returned_at is null
pub const ACTIVE_LOAN_INDEX: &str = "loans_active_user_title_key";

const LOAN_COLUMNS: &str = "id, user_id, title_id, borrowed_at, due_at, returned_at";

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for LoansRepository {
    async fn begin_checkout(&self, title_id: i32) -> AppResult<Box<dyn CheckoutTx>> {
        let mut tx = self.pool.begin().await?;

        // Row lock held until commit/rollback serializes checkouts of this title
        let title = sqlx::query_as::<_, Title>(
            "SELECT id, title, author, total_copies FROM titles WHERE id = $1 FOR UPDATE",
        )
        .bind(title_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Title with id {} not found", title_id)))?;

        Ok(Box::new(PgCheckout { tx, title }))
    }

    async fn get_title(&self, title_id: i32) -> AppResult<Title> {
        sqlx::query_as::<_, Title>("SELECT id, title, author, total_copies FROM titles WHERE id = $1")
            .bind(title_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Title with id {} not found", title_id)))
    }

    async fn get_titles(&self, title_ids: &[i32]) -> AppResult<Vec<Title>> {
        let titles = sqlx::query_as::<_, Title>(
            "SELECT id, title, author, total_copies FROM titles WHERE id = ANY($1) ORDER BY id",
        )
        .bind(title_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(titles)
    }

    async fn count_titles(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM titles")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_active_loans(&self, title_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE title_id = $1 AND returned_at IS NULL",
        )
        .bind(title_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn get_loan(&self, loan_id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(&format!("SELECT {} FROM loans WHERE id = $1", LOAN_COLUMNS))
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))
    }

    async fn close_loan(&self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(&format!(
            r#"
            UPDATE loans SET returned_at = $2
            WHERE id = $1 AND returned_at IS NULL
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan_id)
        .bind(returned_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(loan)
    }

    async fn list_loans(&self, filter: &LoanFilter) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(&format!(
            r#"
            SELECT {} FROM loans
            WHERE ($1::INTEGER IS NULL OR user_id = $1)
              AND (NOT $2 OR returned_at IS NULL)
            ORDER BY borrowed_at DESC, id DESC
            "#,
            LOAN_COLUMNS
        ))
        .bind(filter.user_id)
        .bind(filter.active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn loans_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(&format!(
            r#"
            SELECT {} FROM loans
            WHERE returned_at IS NULL AND due_at >= $1 AND due_at < $2
            ORDER BY due_at, id
            "#,
            LOAN_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Checkout transaction holding the title row lock
pub struct PgCheckout {
    tx: Transaction<'static, Postgres>,
    title: Title,
}

#[async_trait]
impl CheckoutTx for PgCheckout {
    fn title(&self) -> &Title {
        &self.title
    }

    async fn active_loan_count(&mut self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE title_id = $1 AND returned_at IS NULL",
        )
        .bind(self.title.id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn insert_loan(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        let result = sqlx::query_as::<_, Loan>(&format!(
            r#"
            INSERT INTO loans (user_id, title_id, borrowed_at, due_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            LOAN_COLUMNS
        ))
        .bind(loan.user_id)
        .bind(loan.title_id)
        .bind(loan.borrowed_at)
        .bind(loan.due_at)
        .fetch_one(&mut *self.tx)
        .await;

        match result {
            Ok(created) => Ok(created),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tracing::debug!(
                    constraint = db.constraint().unwrap_or(ACTIVE_LOAN_INDEX),
                    user_id = loan.user_id,
                    title_id = loan.title_id,
                    "active loan uniqueness violated"
                );
                Err(AppError::DuplicateActiveLoan {
                    user_id: loan.user_id,
                    title_id: loan.title_id,
                })
            }
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => Err(AppError::NotFound(
                format!("User with id {} not found", loan.user_id),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
