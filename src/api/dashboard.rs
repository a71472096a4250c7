//! Dashboard and report endpoints

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::AppResult,
    models::LoanDetails,
    services::reports::{Dashboard, MemberDashboard},
    AppState,
};

use super::AuthenticatedUser;

/// Days ahead scanned by the due-soon report when none is given
const DEFAULT_DUE_SOON_DAYS: i64 = 3;

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct DashboardQuery {
    /// Librarian view instead of the caller's own loans, ignored for members
    pub librarian: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct DueSoonQuery {
    /// Due day, counted from today
    pub days: Option<i64>,
}

/// Member or librarian dashboard
#[utoipa::path(
    get,
    path = "/dashboard",
    tag = "dashboard",
    security(("bearer_auth" = [])),
    params(DashboardQuery),
    responses(
        (status = 200, description = "Member dashboard; LibrarianDashboard when librarian=true and allowed", body = MemberDashboard)
    )
)]
pub async fn get_dashboard(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<DashboardQuery>,
) -> AppResult<Response> {
    let dashboard = state
        .services
        .reports
        .dashboard(&claims.actor(), query.librarian.unwrap_or(false))
        .await?;

    Ok(match dashboard {
        Dashboard::Member(dashboard) => Json(dashboard).into_response(),
        Dashboard::Librarian(dashboard) => Json(dashboard).into_response(),
    })
}

/// Active loans falling due on a given day, for reminder dispatch
#[utoipa::path(
    get,
    path = "/reports/due-soon",
    tag = "dashboard",
    security(("bearer_auth" = [])),
    params(DueSoonQuery),
    responses(
        (status = 200, description = "Loans due that day", body = Vec<LoanDetails>),
        (status = 400, description = "Day offset outside 0..=365"),
        (status = 403, description = "Librarian only")
    )
)]
pub async fn due_soon(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<DueSoonQuery>,
) -> AppResult<Json<Vec<LoanDetails>>> {
    let days = query.days.unwrap_or(DEFAULT_DUE_SOON_DAYS);
    let loans = state.services.reports.due_soon(&claims.actor(), days).await?;
    Ok(Json(loans))
}
