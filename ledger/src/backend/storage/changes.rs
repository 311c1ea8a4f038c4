//! Collection identifiers and commit notifications.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two persisted collections of the ledger store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Children,
    Transactions,
}

impl Collection {
    /// Both collections, for atomic units that pair balance and ledger writes
    pub const ALL: [Collection; 2] = [Collection::Children, Collection::Transactions];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Children => "children",
            Collection::Transactions => "transactions",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published after an atomic unit that wrote something commits.
///
/// This is a refresh hint, not a change log: receivers should re-read the
/// collections they care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerChange {
    pub collections: Vec<Collection>,
}

impl LedgerChange {
    pub fn touches(&self, collection: Collection) -> bool {
        self.collections.contains(&collection)
    }
}
