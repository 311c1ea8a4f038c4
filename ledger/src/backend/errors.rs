//! Error taxonomy shared by the storage and domain layers.

use thiserror::Error;

use crate::backend::storage::Collection;

/// Failures surfaced by ledger operations.
///
/// Validation failures are raised before the store is touched. Store failures
/// abort the whole atomic unit, so balance and ledger never drift apart.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{collection} record not found: {id}")]
    NotFound { collection: Collection, id: String },

    #[error("Duplicate key in {collection}: {id}")]
    DuplicateKey { collection: Collection, id: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Collection {0} was not declared for this atomic unit")]
    UndeclaredCollection(Collection),
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn child_not_found(id: &str) -> Self {
        LedgerError::NotFound {
            collection: Collection::Children,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
