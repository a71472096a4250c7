//! Circulation Server
//!
//! Lending ledger for a library: decides whether a title may be borrowed,
//! keeps each user to one active loan per title, keeps active loans within
//! the title's copy count, and closes loans exactly once.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
