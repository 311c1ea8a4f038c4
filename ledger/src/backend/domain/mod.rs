//! # Domain Module
//!
//! The balance engine: every operation that changes a child's balance, and
//! the rules tying that balance to the transaction ledger.
//!
//! ## Module Organization
//!
//! - **child_service**: Child lifecycle (create, edit, remove with cascade)
//! - **balance_service**: Deductions, payouts and balance audits
//! - **allowance_service**: The Sunday accrual sweep and its week boundary
//! - **migration_service**: One-time conversion of embedded legacy deductions
//! - **clock**: Injected source of "now"
//!
//! ## Business Rules
//!
//! - A balance change and its ledger entry are written in the same atomic unit
//! - Deductions may take a balance below zero; payouts never do
//! - Allowance accrues at most once per child per week, on Sundays only
//! - Editing a balance directly is an override and writes no ledger entry

pub mod allowance_service;
pub mod balance_service;
pub mod child_service;
pub mod clock;
pub mod migration_service;

pub use allowance_service::{is_accrual_day, week_boundary, AccrualReport, AccrualSkip, AllowanceService};
pub use balance_service::{BalanceAudit, BalanceService};
pub use child_service::{ChildRemoval, ChildService};
pub use clock::{Clock, FixedClock, SystemClock};
pub use migration_service::{MigrationReport, MigrationService};
