//! Offer book module
//!
//! Local materialized view of the ledger's open offers, keyed by trading pair.

mod book;
mod offer;
mod store;

pub use book::{OfferBook, UpsertKind};
pub use offer::{Offer, OfferStatus, PriceRounding};
pub use store::{
    BestOfferIds, BookEvent, FillNotification, GlobalView, OfferBookStore, StatusTarget,
    StoreUpdate,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// Ledger-assigned offer identifier
pub type OfferId = u64;

/// Canonical (base, quote) orientation of a market; order-sensitive
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingPair {
    pub base_token: String,
    pub quote_token: String,
}

impl TradingPair {
    pub fn new(base_token: &str, quote_token: &str) -> Self {
        Self {
            base_token: base_token.to_uppercase(),
            quote_token: quote_token.to_uppercase(),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base_token, self.quote_token)
    }
}

impl FromStr for TradingPair {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((base, quote)) if !base.trim().is_empty() && !quote.trim().is_empty() => {
                Ok(TradingPair::new(base.trim(), quote.trim()))
            }
            _ => Err(SyncError::ConfigError(format!(
                "Invalid trading pair '{}', expected BASE/QUOTE",
                s
            ))),
        }
    }
}

/// Side of an offer relative to its trading pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferSide {
    /// Sells the quote token for the base token
    Buy,
    /// Sells the base token for the quote token
    Sell,
}

impl fmt::Display for OfferSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfferSide::Buy => f.write_str("buy"),
            OfferSide::Sell => f.write_str("sell"),
        }
    }
}

/// Pair-level initial synchronization status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    #[default]
    Pristine,
    Pending,
    Completed,
    Error,
}

impl SyncStatus {
    /// Allowed moves: PRISTINE -> PENDING -> {COMPLETED, ERROR}
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pristine, SyncStatus::Pending)
                | (SyncStatus::Pending, SyncStatus::Completed)
                | (SyncStatus::Pending, SyncStatus::Error)
        )
    }
}

/// Per-side bulk traversal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideLoadStatus {
    Pending,
    Completed,
    Error,
}

/// Published view of a single pair's book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferBookState {
    pub pair: TradingPair,
    pub timestamp: u64,
    pub buy_offers: Vec<Offer>,
    pub sell_offers: Vec<Offer>,
    pub buy_offer_count: Option<u64>,
    pub sell_offer_count: Option<u64>,
    pub initial_sync_status: SyncStatus,
    pub loading_buy_offers: Option<SideLoadStatus>,
    pub loading_sell_offers: Option<SideLoadStatus>,
}
