//! Business logic services

pub mod authorization;
pub mod availability;
pub mod loans;
pub mod reports;

use std::sync::Arc;

use crate::repository::SharedStore;

use self::authorization::AuthorizationGate;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub store: SharedStore,
    pub loans: loans::LoansService,
    pub availability: availability::AvailabilityService,
    pub reports: reports::ReportsService,
}

impl Services {
    /// Create all services over one store and one authorization policy
    pub fn new(store: SharedStore, gate: Arc<dyn AuthorizationGate>) -> Self {
        Self {
            loans: loans::LoansService::new(store.clone(), gate.clone()),
            availability: availability::AvailabilityService::new(store.clone()),
            reports: reports::ReportsService::new(store.clone(), gate),
            store,
        }
    }
}
