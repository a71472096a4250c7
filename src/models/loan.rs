//! Loan model and related types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

/// Fixed lending period
pub const LOAN_PERIOD_DAYS: i64 = 14;

/// Loan state, derived from `returned_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Active,
    Closed,
}

/// Loan record from the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Loan {
    pub id: i32,
    pub user_id: i32,
    pub title_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    /// Null while the loan is active
    pub returned_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn status(&self) -> LoanStatus {
        if self.returned_at.is_some() {
            LoanStatus::Closed
        } else {
            LoanStatus::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == LoanStatus::Active
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.due_at < now
    }
}

/// Row to insert when a loan starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLoan {
    pub user_id: i32,
    pub title_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

impl NewLoan {
    pub fn starting_at(user_id: i32, title_id: i32, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            title_id,
            borrowed_at: now,
            due_at: now + Duration::days(LOAN_PERIOD_DAYS),
        }
    }
}

/// Loan listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, IntoParams, ToSchema)]
pub struct LoanFilter {
    /// Restrict to one borrower
    pub user_id: Option<i32>,
    /// Only loans not yet returned
    #[serde(default)]
    pub active_only: bool,
}

impl LoanFilter {
    pub fn matches(&self, loan: &Loan) -> bool {
        self.user_id.map_or(true, |id| loan.user_id == id) && (!self.active_only || loan.is_active())
    }
}

/// Loan with the borrowed title's name, for dashboards
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    pub id: i32,
    pub user_id: i32,
    pub title_id: i32,
    pub title: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub is_overdue: bool,
}

impl LoanDetails {
    pub fn new(loan: Loan, title: String, now: DateTime<Utc>) -> Self {
        Self {
            is_overdue: loan.is_overdue(now),
            id: loan.id,
            user_id: loan.user_id,
            title_id: loan.title_id,
            title,
            borrowed_at: loan.borrowed_at,
            due_at: loan.due_at,
            returned_at: loan.returned_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan(returned_at: Option<DateTime<Utc>>) -> Loan {
        let new = NewLoan::starting_at(1, 2, Utc::now());
        Loan {
            id: 1,
            user_id: new.user_id,
            title_id: new.title_id,
            borrowed_at: new.borrowed_at,
            due_at: new.due_at,
            returned_at,
        }
    }

    #[test]
    fn test_due_two_weeks_after_borrow() {
        let now = Utc::now();
        let new = NewLoan::starting_at(1, 2, now);
        assert_eq!(new.borrowed_at, now);
        assert_eq!(new.due_at - new.borrowed_at, Duration::days(14));
    }

    #[test]
    fn test_status_follows_returned_at() {
        assert_eq!(loan(None).status(), LoanStatus::Active);
        assert_eq!(loan(Some(Utc::now())).status(), LoanStatus::Closed);
    }

    #[test]
    fn test_overdue_only_when_active() {
        let active = loan(None);
        let later = active.due_at + Duration::hours(1);
        assert!(active.is_overdue(later));
        assert!(!active.is_overdue(active.borrowed_at));
        assert!(!loan(Some(Utc::now())).is_overdue(later));
    }

    #[test]
    fn test_filter() {
        let filter = LoanFilter {
            user_id: Some(1),
            active_only: true,
        };
        assert!(filter.matches(&loan(None)));
        assert!(!filter.matches(&loan(Some(Utc::now()))));
        assert!(LoanFilter::default().matches(&loan(Some(Utc::now()))));
    }
}
