//! Ledger client module
//!
//! Read/write access to the on-chain exchange and its event streams. Every
//! component receives its client explicitly; there is no global handle.

mod http;
mod subscription;
mod timeout;

pub use http::HttpLedgerClient;
pub use subscription::WsEventSource;
pub use timeout::TimedLedgerClient;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

use crate::error::Result;
use crate::offers::OfferId;

pub type BlockNumber = u64;
pub type TxHash = String;

/// Raw offer tuple as stored by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOffer {
    /// Remaining amount for sale, in the sell token's raw units
    pub sell_amount: u128,
    pub sell_token: String,
    pub buy_amount: u128,
    pub buy_token: String,
    pub owner: String,
    pub timestamp: u64,
}

/// Event classes published by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    NewOffer,
    OfferKilled,
    ItemUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::NewOffer,
        EventKind::OfferKilled,
        EventKind::ItemUpdated,
    ];

    /// Name of the contract log
    pub fn log_name(self) -> &'static str {
        match self {
            EventKind::NewOffer => "LogMake",
            EventKind::OfferKilled => "LogKill",
            EventKind::ItemUpdated => "LogItemUpdate",
        }
    }

    pub fn from_log_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.log_name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.log_name())
    }
}

/// Optional narrowing of a subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events whose maker is this address
    pub owner: Option<String>,
}

/// Payload of a kill (cancellation) event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferKilled {
    pub id: OfferId,
    /// Ledger's pair hash
    pub pair: String,
    pub owner: String,
    pub sell_token: String,
    pub buy_token: String,
    pub timestamp: u64,
    pub block_number: BlockNumber,
}

/// A decoded ledger event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    NewOffer {
        id: OfferId,
        block_number: BlockNumber,
    },
    OfferKilled(OfferKilled),
    ItemUpdated {
        id: OfferId,
        block_number: BlockNumber,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LedgerEvent::NewOffer { .. } => EventKind::NewOffer,
            LedgerEvent::OfferKilled(_) => EventKind::OfferKilled,
            LedgerEvent::ItemUpdated { .. } => EventKind::ItemUpdated,
        }
    }

    pub fn block_number(&self) -> BlockNumber {
        match self {
            LedgerEvent::NewOffer { block_number, .. }
            | LedgerEvent::ItemUpdated { block_number, .. } => *block_number,
            LedgerEvent::OfferKilled(killed) => killed.block_number,
        }
    }
}

/// Lazy, cancellable sequence of decoded events. Dropping it unsubscribes.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<LedgerEvent>> + Send>>;

/// Access to the remote exchange
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Raw tuple for an offer id
    async fn offer(&self, id: OfferId) -> Result<RawOffer>;

    /// Best offer selling `sell_token` for `buy_token`; 0 when none
    async fn best_offer(&self, sell_token: &str, buy_token: &str) -> Result<OfferId>;

    /// Next-worse offer after `id` in the same market; 0 at the end
    async fn worse_offer(&self, id: OfferId) -> Result<OfferId>;

    /// Number of open offers selling `sell_token` for `buy_token`
    async fn offer_count(&self, sell_token: &str, buy_token: &str) -> Result<u64>;

    async fn is_active(&self, id: OfferId) -> Result<bool>;

    /// Submit a cancellation transaction
    async fn cancel(&self, id: OfferId, gas: u64) -> Result<TxHash>;

    async fn latest_block(&self) -> Result<BlockNumber>;

    /// Subscribe to one event class starting at `from_block`
    async fn subscribe(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        filter: EventFilter,
    ) -> Result<EventStream>;
}
