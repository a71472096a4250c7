//! Read-only dashboard views over the loan ledger

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult},
    models::{Actor, Loan, LoanDetails, LoanFilter},
    repository::SharedStore,
};

use super::authorization::{ensure, AuthorizationGate, LendingAction, Resource};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MemberDashboard {
    pub active_loans: Vec<LoanDetails>,
    pub overdue_loans: Vec<LoanDetails>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OverdueMember {
    pub user_id: i32,
    pub overdue_loans: Vec<LoanDetails>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LibrarianDashboard {
    pub total_titles: i64,
    pub total_active_loans: i64,
    pub loans_due_today: i64,
    pub overdue_members: Vec<OverdueMember>,
}

/// Either dashboard, depending on what the actor may see
#[derive(Debug, Clone)]
pub enum Dashboard {
    Member(MemberDashboard),
    Librarian(LibrarianDashboard),
}

/// Furthest due day the due-soon report scans
pub const MAX_DUE_SOON_DAYS: i64 = 365;

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[derive(Clone)]
pub struct ReportsService {
    store: SharedStore,
    gate: Arc<dyn AuthorizationGate>,
}

impl ReportsService {
    pub fn new(store: SharedStore, gate: Arc<dyn AuthorizationGate>) -> Self {
        Self { store, gate }
    }

    /// Attach title names
    async fn details(&self, loans: Vec<Loan>, now: DateTime<Utc>) -> AppResult<Vec<LoanDetails>> {
        let mut ids: Vec<i32> = loans.iter().map(|l| l.title_id).collect();
        ids.sort_unstable();
        ids.dedup();

        let names: HashMap<i32, String> = self
            .store
            .get_titles(&ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t.title))
            .collect();

        Ok(loans
            .into_iter()
            .map(|loan| {
                let title = names.get(&loan.title_id).cloned().unwrap_or_default();
                LoanDetails::new(loan, title, now)
            })
            .collect())
    }

    /// Librarian view when asked for and allowed, the actor's own loans otherwise
    pub async fn dashboard(&self, actor: &Actor, librarian_view: bool) -> AppResult<Dashboard> {
        if librarian_view
            && self
                .gate
                .can_perform(actor, LendingAction::ViewReports, &Resource::Ledger)
        {
            return Ok(Dashboard::Librarian(self.librarian_dashboard(actor).await?));
        }
        Ok(Dashboard::Member(self.member_dashboard(actor).await?))
    }

    pub async fn member_dashboard(&self, actor: &Actor) -> AppResult<MemberDashboard> {
        let now = Utc::now();
        let filter = LoanFilter {
            user_id: Some(actor.user_id),
            active_only: true,
        };
        let active = self.store.list_loans(&filter).await?;
        let active_loans = self.details(active, now).await?;
        let overdue_loans = active_loans.iter().filter(|l| l.is_overdue).cloned().collect();

        Ok(MemberDashboard {
            active_loans,
            overdue_loans,
        })
    }

    pub async fn librarian_dashboard(&self, actor: &Actor) -> AppResult<LibrarianDashboard> {
        ensure(
            self.gate.as_ref(),
            actor,
            LendingAction::ViewReports,
            &Resource::Ledger,
        )?;

        let now = Utc::now();
        let today = start_of_day(now);

        let total_titles = self.store.count_titles().await?;
        let active = self
            .store
            .list_loans(&LoanFilter {
                user_id: None,
                active_only: true,
            })
            .await?;
        let total_active_loans = active.len() as i64;
        let loans_due_today = self
            .store
            .loans_due_between(today, today + Duration::days(1))
            .await?
            .len() as i64;

        let overdue: Vec<Loan> = active.into_iter().filter(|l| l.is_overdue(now)).collect();
        let mut by_member: BTreeMap<i32, Vec<LoanDetails>> = BTreeMap::new();
        for loan in self.details(overdue, now).await? {
            by_member.entry(loan.user_id).or_default().push(loan);
        }

        Ok(LibrarianDashboard {
            total_titles,
            total_active_loans,
            loans_due_today,
            overdue_members: by_member
                .into_iter()
                .map(|(user_id, overdue_loans)| OverdueMember {
                    user_id,
                    overdue_loans,
                })
                .collect(),
        })
    }

    /// Active loans falling due on the day `days_ahead` days from today
    pub async fn due_soon(&self, actor: &Actor, days_ahead: i64) -> AppResult<Vec<LoanDetails>> {
        ensure(
            self.gate.as_ref(),
            actor,
            LendingAction::ViewReports,
            &Resource::Ledger,
        )?;

        if !(0..=MAX_DUE_SOON_DAYS).contains(&days_ahead) {
            return Err(AppError::BadRequest(format!(
                "days must be between 0 and {}",
                MAX_DUE_SOON_DAYS
            )));
        }

        let now = Utc::now();
        let from = start_of_day(now) + Duration::days(days_ahead);
        let loans = self.store.loans_due_between(from, from + Duration::days(1)).await?;
        self.details(loans, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::Title,
        repository::{memory::InMemoryLedger, LedgerStore},
        services::{authorization::RolePolicy, loans::LoansService},
    };

    fn setup() -> (ReportsService, LoansService, InMemoryLedger) {
        let store = InMemoryLedger::with_titles([Title::new(1, "Dune", 2), Title::new(2, "Emma", 1)]);
        let shared: SharedStore = Arc::new(store.clone());
        let gate = Arc::new(RolePolicy);
        (
            ReportsService::new(shared.clone(), gate.clone()),
            LoansService::new(shared, gate),
            store,
        )
    }

    #[test]
    fn test_start_of_day() {
        let at = DateTime::parse_from_rfc3339("2025-08-08T17:45:12Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(start_of_day(at).to_rfc3339(), "2025-08-08T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_member_dashboard_shows_own_active_loans() {
        let (reports, loans, _) = setup();
        loans.create_loan(&Actor::member(1), 1, 1).await.unwrap();
        loans.create_loan(&Actor::member(1), 1, 2).await.unwrap();
        loans.create_loan(&Actor::member(2), 2, 1).await.unwrap();

        let dashboard = reports.member_dashboard(&Actor::member(1)).await.unwrap();
        assert_eq!(dashboard.active_loans.len(), 2);
        assert!(dashboard.overdue_loans.is_empty());
        let mut titles: Vec<_> = dashboard.active_loans.iter().map(|l| l.title.as_str()).collect();
        titles.sort_unstable();
        assert_eq!(titles, vec!["Dune", "Emma"]);
    }

    #[tokio::test]
    async fn test_librarian_dashboard_counts() {
        let (reports, loans, store) = setup();
        let first = loans.create_loan(&Actor::member(1), 1, 1).await.unwrap();
        loans.create_loan(&Actor::member(2), 2, 1).await.unwrap();
        store.close_loan(first.id, Utc::now()).await.unwrap();

        let dashboard = reports
            .librarian_dashboard(&Actor::librarian(9))
            .await
            .unwrap();
        assert_eq!(dashboard.total_titles, 2);
        assert_eq!(dashboard.total_active_loans, 1);
        assert_eq!(dashboard.loans_due_today, 0);
        assert!(dashboard.overdue_members.is_empty());
    }

    #[tokio::test]
    async fn test_reports_need_privilege() {
        let (reports, _, _) = setup();
        assert!(matches!(
            reports.librarian_dashboard(&Actor::member(1)).await,
            Err(AppError::Authorization(_))
        ));
        assert!(matches!(
            reports.due_soon(&Actor::member(1), 3).await,
            Err(AppError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_due_soon_finds_loans_due_in_two_weeks() {
        let (reports, loans, _) = setup();
        let loan = loans.create_loan(&Actor::member(1), 1, 1).await.unwrap();

        let days = (start_of_day(loan.due_at) - start_of_day(Utc::now())).num_days();
        let due = reports.due_soon(&Actor::librarian(9), days).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, loan.id);
        assert_eq!(due[0].title, "Dune");

        assert!(reports
            .due_soon(&Actor::librarian(9), days + 1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_due_soon_rejects_out_of_range_days() {
        let (reports, _, _) = setup();
        let librarian = Actor::librarian(9);
        for days in [-1, MAX_DUE_SOON_DAYS + 1, i64::MAX] {
            assert!(matches!(
                reports.due_soon(&librarian, days).await,
                Err(AppError::BadRequest(_))
            ));
        }
        assert!(reports.due_soon(&librarian, MAX_DUE_SOON_DAYS).await.is_ok());
    }

    #[tokio::test]
    async fn test_member_asking_for_librarian_view_gets_own_dashboard() {
        let (reports, loans, _) = setup();
        loans.create_loan(&Actor::member(1), 1, 1).await.unwrap();

        match reports.dashboard(&Actor::member(1), true).await.unwrap() {
            Dashboard::Member(dashboard) => assert_eq!(dashboard.active_loans.len(), 1),
            other => panic!("unexpected dashboard: {:?}", other),
        }
        assert!(matches!(
            reports.dashboard(&Actor::librarian(9), true).await.unwrap(),
            Dashboard::Librarian(_)
        ));
        assert!(matches!(
            reports.dashboard(&Actor::librarian(9), false).await.unwrap(),
            Dashboard::Member(_)
        ));
    }
}
