//! # Storage Module
//!
//! The ledger store: two collections (`children`, `transactions`) persisted in
//! SQLite through sqlx.
//!
//! Every write happens inside an [`AtomicUnit`] that declares the collections
//! it touches up front. A unit commits as a whole or not at all, which is the
//! only mechanism keeping a child's cached `balance` in step with its ledger.
//! Successful commits are announced on a broadcast channel so read views can
//! refresh.

pub mod atomic;
pub mod changes;
pub mod connection;
pub mod queries;

pub use atomic::AtomicUnit;
pub use changes::{Collection, LedgerChange};
pub use connection::DbConnection;
pub use queries::ChildPatch;
