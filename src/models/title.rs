//! Title model, as read from the catalog

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Catalog title snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Title {
    pub id: i32,
    pub title: String,
    pub author: Option<String>,
    pub total_copies: i32,
}

impl Title {
    pub fn new(id: i32, title: impl Into<String>, total_copies: i32) -> Self {
        Self {
            id,
            title: title.into(),
            author: None,
            total_copies,
        }
    }
}

/// Copies a title has free right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Availability {
    pub title_id: i32,
    pub total_copies: i32,
    pub active_loans: i64,
    pub copies_available: i64,
}
