//! Loan endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{Loan, LoanFilter},
    AppState,
};

use super::AuthenticatedUser;

/// Create loan request
#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateLoanRequest {
    /// Title to borrow
    #[validate(range(min = 1, message = "title_id must be positive"))]
    pub title_id: i32,
    /// Borrower, defaults to the caller
    #[validate(range(min = 1, message = "user_id must be positive"))]
    pub user_id: Option<i32>,
}

/// List loans visible to the caller
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(LoanFilter),
    responses(
        (status = 200, description = "Loans", body = Vec<Loan>),
        (status = 403, description = "Not allowed to read these loans")
    )
)]
pub async fn list_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(filter): Query<LoanFilter>,
) -> AppResult<Json<Vec<Loan>>> {
    let loans = state.services.loans.list_loans(&claims.actor(), filter).await?;
    Ok(Json(loans))
}

/// Get a loan
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan", body = Loan),
        (status = 403, description = "Loan belongs to another member"),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state.services.loans.get_loan(&claims.actor(), loan_id).await?;
    Ok(Json(loan))
}

/// Borrow a title
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = CreateLoanRequest,
    responses(
        (status = 201, description = "Loan created", body = Loan),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Not allowed to borrow for this user"),
        (status = 404, description = "Title not found"),
        (status = 409, description = "No copy available or title already borrowed"),
        (status = 503, description = "Store unavailable, safe to retry")
    )
)]
pub async fn create_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateLoanRequest>,
) -> AppResult<(StatusCode, Json<Loan>)> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let actor = claims.actor();
    let user_id = request.user_id.unwrap_or(actor.user_id);

    let loan = state
        .services
        .loans
        .create_loan(&actor, user_id, request.title_id)
        .await?;

    Ok((StatusCode::CREATED, Json(loan)))
}

/// Return a borrowed title
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Loan ID")
    ),
    responses(
        (status = 200, description = "Loan closed", body = Loan),
        (status = 403, description = "Only librarians may close loans"),
        (status = 404, description = "Loan not found"),
        (status = 409, description = "Already returned")
    )
)]
pub async fn return_loan(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<i32>,
) -> AppResult<Json<Loan>> {
    let loan = state
        .services
        .loans
        .close_loan(loan_id, &claims.actor())
        .await?;
    Ok(Json(loan))
}
