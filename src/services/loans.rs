//! Loan lifecycle: creating and closing loans

use std::sync::Arc;

use chrono::Utc;

use crate::{
    error::{AppError, AppResult},
    models::{Actor, Loan, LoanFilter, NewLoan},
    repository::SharedStore,
};

use super::{
    authorization::{ensure, AuthorizationGate, LendingAction, Resource},
    availability,
};

#[derive(Clone)]
pub struct LoansService {
    store: SharedStore,
    gate: Arc<dyn AuthorizationGate>,
}

impl LoansService {
    pub fn new(store: SharedStore, gate: Arc<dyn AuthorizationGate>) -> Self {
        Self { store, gate }
    }

    /// Borrow a title for `user_id`.
    ///
    /// The capacity check and the insert run in one checkout transaction that
    /// holds the title lock, so concurrent borrows of the same title cannot both
    /// take the last copy. A second active loan of the same title by the same
    /// user is refused by the store's uniqueness guarantee.
    pub async fn create_loan(&self, actor: &Actor, user_id: i32, title_id: i32) -> AppResult<Loan> {
        ensure(
            self.gate.as_ref(),
            actor,
            LendingAction::CreateLoan,
            &Resource::Borrower(user_id),
        )?;

        let mut tx = self.store.begin_checkout(title_id).await?;

        let active = tx.active_loan_count().await?;
        let total_copies = tx.title().total_copies;
        if availability::copies_available(total_copies, active) <= 0 {
            if let Err(e) = tx.rollback().await {
                tracing::warn!(title_id, "rollback after capacity rejection failed: {}", e);
            }
            tracing::info!(user_id, title_id, total_copies, active, "no copy available");
            return Err(AppError::CapacityExceeded { title_id });
        }

        let loan = match tx.insert_loan(&NewLoan::starting_at(user_id, title_id, Utc::now())).await {
            Ok(loan) => loan,
            Err(e) => {
                if let AppError::DuplicateActiveLoan { .. } = e {
                    tracing::info!(user_id, title_id, "title already borrowed by user");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        tracing::info!(
            loan_id = loan.id,
            user_id,
            title_id,
            due_at = %loan.due_at,
            "loan created"
        );
        Ok(loan)
    }

    /// Mark a loan returned. Only the first close of a loan succeeds.
    pub async fn close_loan(&self, loan_id: i32, performed_by: &Actor) -> AppResult<Loan> {
        let loan = self.store.get_loan(loan_id).await?;

        ensure(
            self.gate.as_ref(),
            performed_by,
            LendingAction::CloseLoan,
            &Resource::Loan {
                loan_id,
                borrower_id: loan.user_id,
            },
        )?;

        if loan.returned_at.is_some() {
            return Err(AppError::AlreadyReturned(loan_id));
        }

        // Lost a race with another close
        let closed = self
            .store
            .close_loan(loan_id, Utc::now())
            .await?
            .ok_or(AppError::AlreadyReturned(loan_id))?;

        tracing::info!(
            loan_id,
            user_id = closed.user_id,
            title_id = closed.title_id,
            performed_by = performed_by.user_id,
            "loan closed"
        );
        Ok(closed)
    }

    /// Fetch one loan, for its borrower or a ledger reader
    pub async fn get_loan(&self, actor: &Actor, loan_id: i32) -> AppResult<Loan> {
        let loan = self.store.get_loan(loan_id).await?;
        ensure(
            self.gate.as_ref(),
            actor,
            LendingAction::ReadLoans,
            &Resource::Loan {
                loan_id,
                borrower_id: loan.user_id,
            },
        )?;
        Ok(loan)
    }

    /// List loans visible to the actor.
    ///
    /// Without a borrower filter, actors who may not read the whole ledger see
    /// their own loans.
    pub async fn list_loans(&self, actor: &Actor, filter: LoanFilter) -> AppResult<Vec<Loan>> {
        let mut filter = filter;
        if filter.user_id.is_none()
            && !self
                .gate
                .can_perform(actor, LendingAction::ReadLoans, &Resource::Ledger)
        {
            filter.user_id = Some(actor.user_id);
        }

        let resource = filter.user_id.map_or(Resource::Ledger, Resource::Borrower);
        ensure(self.gate.as_ref(), actor, LendingAction::ReadLoans, &resource)?;

        self.store.list_loans(&filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::Title,
        repository::{memory::InMemoryLedger, LedgerStore, MockLedgerStore},
        services::authorization::{MockAuthorizationGate, RolePolicy},
    };
    use chrono::Duration;
    use tokio::sync::Barrier;

    const DUNE: i32 = 1;
    const LIBRARIAN: Actor = Actor {
        user_id: 100,
        role: crate::models::Role::Librarian,
    };

    fn setup(total_copies: i32) -> (LoansService, InMemoryLedger) {
        let store = InMemoryLedger::with_titles([Title::new(DUNE, "Dune", total_copies)]);
        let service = LoansService::new(Arc::new(store.clone()), Arc::new(RolePolicy));
        (service, store)
    }

    async fn borrow(service: &LoansService, user_id: i32) -> AppResult<Loan> {
        service.create_loan(&Actor::member(user_id), user_id, DUNE).await
    }

    #[tokio::test]
    async fn test_create_sets_two_week_due_date() {
        let (service, _) = setup(1);
        let loan = borrow(&service, 1).await.unwrap();
        assert_eq!(loan.due_at - loan.borrowed_at, Duration::days(14));
        assert!(loan.is_active());
    }

    #[tokio::test]
    async fn test_capacity_sequential() {
        let (service, _) = setup(2);
        assert!(borrow(&service, 1).await.is_ok());
        assert!(borrow(&service, 2).await.is_ok());
        assert!(matches!(
            borrow(&service, 3).await,
            Err(AppError::CapacityExceeded { title_id: DUNE })
        ));
    }

    #[tokio::test]
    async fn test_zero_copies_rejects() {
        let (service, store) = setup(0);
        assert!(matches!(
            borrow(&service, 1).await,
            Err(AppError::CapacityExceeded { .. })
        ));
        assert_eq!(store.loan_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_active_loan() {
        let (service, _) = setup(3);
        borrow(&service, 1).await.unwrap();
        assert!(matches!(
            borrow(&service, 1).await,
            Err(AppError::DuplicateActiveLoan { user_id: 1, title_id: DUNE })
        ));
    }

    #[tokio::test]
    async fn test_borrow_again_after_return() {
        let (service, _) = setup(3);
        let loan = borrow(&service, 1).await.unwrap();
        service.close_loan(loan.id, &LIBRARIAN).await.unwrap();
        let again = borrow(&service, 1).await.unwrap();
        assert_ne!(again.id, loan.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_borrows_by_same_user() {
        const N: usize = 8;
        let (service, store) = setup(N as i32);
        let barrier = Arc::new(Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let service = service.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    borrow(&service, 1).await
                })
            })
            .collect();

        let mut succeeded = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::DuplicateActiveLoan { .. }) => duplicates += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(duplicates, N - 1);
        assert_eq!(store.count_active_loans(DUNE).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_borrows_never_exceed_copies() {
        const USERS: i32 = 10;
        const COPIES: i32 = 3;
        let (service, store) = setup(COPIES);
        let barrier = Arc::new(Barrier::new(USERS as usize));

        let handles: Vec<_> = (1..=USERS)
            .map(|user_id| {
                let service = service.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    borrow(&service, user_id).await
                })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::CapacityExceeded { .. }) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(succeeded, COPIES);
        assert_eq!(store.count_active_loans(DUNE).await.unwrap(), i64::from(COPIES));
    }

    #[tokio::test]
    async fn test_close_twice() {
        let (service, store) = setup(1);
        let loan = borrow(&service, 1).await.unwrap();

        let closed = service.close_loan(loan.id, &LIBRARIAN).await.unwrap();
        let returned_at = closed.returned_at.unwrap();

        assert!(matches!(
            service.close_loan(loan.id, &LIBRARIAN).await,
            Err(AppError::AlreadyReturned(id)) if id == loan.id
        ));
        assert_eq!(store.get_loan(loan.id).await.unwrap().returned_at, Some(returned_at));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_close() {
        let (service, _) = setup(1);
        let loan_id = borrow(&service, 1).await.unwrap().id;
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = service.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    service.close_loan(loan_id, &LIBRARIAN).await
                })
            })
            .collect();

        let mut succeeded = 0;
        let mut already_returned = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::AlreadyReturned(_)) => already_returned += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!((succeeded, already_returned), (1, 1));
    }

    #[tokio::test]
    async fn test_close_keeps_borrow_and_due_dates() {
        let (service, _) = setup(1);
        let loan = borrow(&service, 1).await.unwrap();
        let closed = service.close_loan(loan.id, &LIBRARIAN).await.unwrap();
        assert_eq!(closed.borrowed_at, loan.borrowed_at);
        assert_eq!(closed.due_at, loan.due_at);
        assert!(closed.returned_at.is_some());
    }

    #[tokio::test]
    async fn test_member_cannot_close() {
        let (service, store) = setup(1);
        let loan = borrow(&service, 1).await.unwrap();
        assert!(matches!(
            service.close_loan(loan.id, &Actor::member(1)).await,
            Err(AppError::Authorization(_))
        ));
        assert!(store.get_loan(loan.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_close_unknown_loan() {
        let (service, _) = setup(1);
        assert!(matches!(
            service.close_loan(42, &LIBRARIAN).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejections_leave_ledger_unchanged() {
        let (service, store) = setup(1);
        borrow(&service, 1).await.unwrap();
        let before = store.loan_count();

        // capacity
        assert!(borrow(&service, 2).await.is_err());
        // duplicate
        assert!(borrow(&service, 1).await.is_err());
        // unknown title
        assert!(service.create_loan(&Actor::member(3), 3, 99).await.is_err());
        // member borrowing for someone else
        assert!(service.create_loan(&Actor::member(3), 4, DUNE).await.is_err());

        assert_eq!(store.loan_count(), before);
    }

    #[tokio::test]
    async fn test_dune_scenario() {
        let (service, _) = setup(1);

        let a = borrow(&service, 1).await.unwrap();
        assert_eq!(a.due_at, a.borrowed_at + Duration::days(14));

        assert!(matches!(
            borrow(&service, 2).await,
            Err(AppError::CapacityExceeded { .. })
        ));

        let closed = service.close_loan(a.id, &LIBRARIAN).await.unwrap();
        assert!(closed.returned_at.is_some());

        assert!(borrow(&service, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_refused_actor_never_reaches_store() {
        let mut gate = MockAuthorizationGate::new();
        gate.expect_can_perform().return_const(false);
        // No expectations: any store call panics
        let store = MockLedgerStore::new();
        let service = LoansService::new(Arc::new(store), Arc::new(gate));

        assert!(matches!(
            service.create_loan(&Actor::member(1), 1, DUNE).await,
            Err(AppError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_transient() {
        let mut store = MockLedgerStore::new();
        store
            .expect_begin_checkout()
            .returning(|_| Err(AppError::TransientStore(sqlx::Error::PoolTimedOut)));
        let service = LoansService::new(Arc::new(store), Arc::new(RolePolicy));

        let result = service.create_loan(&Actor::member(1), 1, DUNE).await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));
    }

    #[tokio::test]
    async fn test_close_losing_race_reports_already_returned() {
        let now = Utc::now();
        let mut store = MockLedgerStore::new();
        store.expect_get_loan().returning(move |id| {
            let new = NewLoan::starting_at(1, DUNE, now);
            Ok(Loan {
                id,
                user_id: new.user_id,
                title_id: new.title_id,
                borrowed_at: new.borrowed_at,
                due_at: new.due_at,
                returned_at: None,
            })
        });
        store.expect_close_loan().returning(|_, _| Ok(None));
        let service = LoansService::new(Arc::new(store), Arc::new(RolePolicy));

        assert!(matches!(
            service.close_loan(3, &LIBRARIAN).await,
            Err(AppError::AlreadyReturned(3))
        ));
    }

    #[tokio::test]
    async fn test_member_lists_own_loans() {
        let (service, _) = setup(3);
        borrow(&service, 1).await.unwrap();
        borrow(&service, 2).await.unwrap();

        let mine = service
            .list_loans(&Actor::member(1), LoanFilter::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, 1);

        let all = service
            .list_loans(&LIBRARIAN, LoanFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let other = service
            .list_loans(
                &Actor::member(1),
                LoanFilter {
                    user_id: Some(2),
                    active_only: false,
                },
            )
            .await;
        assert!(matches!(other, Err(AppError::Authorization(_))));
    }

    #[tokio::test]
    async fn test_get_loan_for_borrower_or_librarian() {
        let (service, _) = setup(3);
        let loan = borrow(&service, 1).await.unwrap();

        assert_eq!(service.get_loan(&Actor::member(1), loan.id).await.unwrap(), loan);
        assert_eq!(service.get_loan(&LIBRARIAN, loan.id).await.unwrap(), loan);
        assert!(matches!(
            service.get_loan(&Actor::member(2), loan.id).await,
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            service.get_loan(&Actor::member(1), 999).await,
            Err(AppError::NotFound(_))
        ));
    }
}
