//! Title availability endpoint

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::Availability, AppState};

use super::AuthenticatedUser;

/// Copies of a title free right now
#[utoipa::path(
    get,
    path = "/titles/{id}/availability",
    tag = "titles",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Title ID")
    ),
    responses(
        (status = 200, description = "Availability", body = Availability),
        (status = 404, description = "Title not found")
    )
)]
pub async fn get_availability(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
    Path(title_id): Path<i32>,
) -> AppResult<Json<Availability>> {
    let availability = state.services.availability.for_title(title_id).await?;
    Ok(Json(availability))
}
