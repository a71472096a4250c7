//! Data models for the lending ledger

pub mod loan;
pub mod title;
pub mod user;

// Re-export commonly used types
pub use loan::{Loan, LoanDetails, LoanFilter, LoanStatus, NewLoan};
pub use title::{Availability, Title};
pub use user::{Actor, Role, UserClaims};
