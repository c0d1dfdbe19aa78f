//! Synchronization module
//!
//! Reconciles ledger state into the offer book store: the one-time bulk
//! traversal per pair, live event handling and cancellation submission.

mod cancel;
mod loader;
mod syncer;
mod watcher;

pub use cancel::{
    CancellationCoordinator, RejectionReason, TransactionKind, TransactionRecord,
    TransactionTracker,
};
pub use loader::{BulkLoader, LoadOutcome};
pub use syncer::{OfferSyncer, ReconcileOutcome};
pub use watcher::{EventWatcher, SubscriptionStatus};

use std::fmt;

/// How a fetched offer is merged into the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Part of a pair's bulk traversal
    Initial,
    /// Announced by a new-offer event, or an update for an unseen id
    New,
    /// Fill of an offer already in the book
    Update,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Initial => "initial",
            SyncMode::New => "new",
            SyncMode::Update => "update",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
