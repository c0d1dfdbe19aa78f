//! Offer Book Sync - on-chain offer ledger mirror
//!
//! This crate keeps a local, queryable offer book per trading pair in step
//! with an on-chain offer ledger: a one-time bulk traversal per pair, then
//! live reconciliation from the ledger's event streams.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod numeric;
pub mod offers;
pub mod parser;
pub mod publisher;
pub mod sync;
pub mod tokens;

pub use config::Config;
pub use error::{Result, SyncError};
pub use ledger::{HttpLedgerClient, LedgerClient, LedgerEvent, RawOffer, TimedLedgerClient};
pub use metrics::SyncMetrics;
pub use offers::{
    Offer, OfferBookState, OfferBookStore, OfferSide, StoreUpdate, SyncStatus, TradingPair,
};
pub use publisher::Publisher;
pub use sync::{BulkLoader, CancellationCoordinator, EventWatcher, OfferSyncer};
pub use tokens::TokenDirectory;

/// Application state shared across components
pub struct AppState {
    pub store: Arc<OfferBookStore>,
    pub publisher: Arc<Publisher>,
    pub config: Arc<Config>,
    pub metrics: SyncMetrics,
}
