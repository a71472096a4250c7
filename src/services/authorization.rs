//! Capability checks for lending actions
//!
//! The lifecycle service only asks [`AuthorizationGate::can_perform`]; which
//! roles may do what is decided by the policy plugged in at startup.

use crate::{
    error::{AppError, AppResult},
    models::{Actor, Role},
};

/// Lending action an actor asks to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LendingAction {
    CreateLoan,
    CloseLoan,
    ReadLoans,
    ViewReports,
}

impl LendingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LendingAction::CreateLoan => "create loan",
            LendingAction::CloseLoan => "close loan",
            LendingAction::ReadLoans => "read loans",
            LendingAction::ViewReports => "view reports",
        }
    }
}

/// What the action applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Loans belonging to one borrower
    Borrower(i32),
    Loan { loan_id: i32, borrower_id: i32 },
    /// The whole ledger
    Ledger,
}

#[cfg_attr(test, mockall::automock)]
pub trait AuthorizationGate: Send + Sync {
    fn can_perform(&self, actor: &Actor, action: LendingAction, resource: &Resource) -> bool;
}

/// Turn a refusal into an `Authorization` error
pub fn ensure(
    gate: &dyn AuthorizationGate,
    actor: &Actor,
    action: LendingAction,
    resource: &Resource,
) -> AppResult<()> {
    if gate.can_perform(actor, action, resource) {
        Ok(())
    } else {
        tracing::info!(
            user_id = actor.user_id,
            role = %actor.role,
            action = action.as_str(),
            ?resource,
            "lending action refused"
        );
        Err(AppError::Authorization(format!(
            "Insufficient rights to {}",
            action.as_str()
        )))
    }
}

/// Member/librarian rules
///
/// Librarians may do everything. Members may borrow for themselves and read
/// their own loans; they may not close loans, including their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicy;

impl AuthorizationGate for RolePolicy {
    fn can_perform(&self, actor: &Actor, action: LendingAction, resource: &Resource) -> bool {
        match actor.role {
            Role::Librarian => true,
            Role::Member => match (action, resource) {
                (LendingAction::CreateLoan, Resource::Borrower(user_id))
                | (LendingAction::ReadLoans, Resource::Borrower(user_id)) => *user_id == actor.user_id,
                (LendingAction::ReadLoans, Resource::Loan { borrower_id, .. }) => {
                    *borrower_id == actor.user_id
                }
                _ => false,
            },
        }
    }
}
