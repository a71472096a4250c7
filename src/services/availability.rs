//! Availability evaluation

use crate::{
    error::AppResult,
    models::{Availability, Title},
    repository::SharedStore,
};

/// Copies left for a title given its active loan count, never below zero
pub fn copies_available(total_copies: i32, active_loans: i64) -> i64 {
    (i64::from(total_copies) - active_loans).max(0)
}

pub fn evaluate(title: &Title, active_loans: i64) -> Availability {
    Availability {
        title_id: title.id,
        total_copies: title.total_copies,
        active_loans,
        copies_available: copies_available(title.total_copies, active_loans),
    }
}

#[derive(Clone)]
pub struct AvailabilityService {
    store: SharedStore,
}

impl AvailabilityService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Point-in-time availability, as shown to callers
    pub async fn for_title(&self, title_id: i32) -> AppResult<Availability> {
        let title = self.store.get_title(title_id).await?;
        let active = self.store.count_active_loans(title_id).await?;
        Ok(evaluate(&title, active))
    }
}
