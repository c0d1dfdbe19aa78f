//! Offer book store
//!
//! Owns every book and applies state transitions one at a time. Each
//! transition runs under the write lock, so concurrent reconciliations are
//! serialized with last-write-wins semantics for the same offer id.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use super::{
    Offer, OfferBook, OfferBookState, OfferId, OfferSide, SideLoadStatus, SyncStatus,
    TradingPair,
};
use crate::error::{Result, SyncError};

/// Capacity of the store update channel
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Best offer ids of the active trading pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestOfferIds {
    pub best_buy_offer_id: Option<OfferId>,
    pub best_sell_offer_id: Option<OfferId>,
}

/// Which status a `SyncStatusChanged` transition targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTarget {
    Initial(SyncStatus),
    Side(OfferSide, SideLoadStatus),
}

/// State transitions accepted by the store
#[derive(Debug, Clone)]
pub enum BookEvent {
    /// Claims a pristine pair for its one bulk load and clears both sides
    BulkLoadStarted { pair: TradingPair },
    OfferUpserted { offer: Offer },
    /// Offer reached by the bulk traversal; never overrides live events
    OfferLoaded { offer: Offer },
    /// Offer left the ledger (killed or completely filled)
    OfferRemoved {
        pair: TradingPair,
        side: OfferSide,
        offer_id: OfferId,
    },
    CountsUpdated {
        pair: TradingPair,
        buy_offer_count: u64,
        sell_offer_count: u64,
    },
    SyncStatusChanged {
        pair: TradingPair,
        target: StatusTarget,
    },
    BestOfferIdsUpdated(BestOfferIds),
}

impl BookEvent {
    /// Pair touched by this transition, if any
    pub fn pair(&self) -> Option<&TradingPair> {
        match self {
            BookEvent::BulkLoadStarted { pair }
            | BookEvent::OfferRemoved { pair, .. }
            | BookEvent::CountsUpdated { pair, .. }
            | BookEvent::SyncStatusChanged { pair, .. } => Some(pair),
            BookEvent::OfferUpserted { offer } | BookEvent::OfferLoaded { offer } => {
                Some(&offer.pair)
            }
            BookEvent::BestOfferIdsUpdated(_) => None,
        }
    }
}

/// Partial or complete fill observed by an update reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillNotification {
    pub pair: TradingPair,
    pub side: OfferSide,
    pub offer_id: OfferId,
    pub previous: Option<Offer>,
    pub updated: Offer,
}

/// Notifications broadcast to store subscribers
#[derive(Debug, Clone)]
pub enum StoreUpdate {
    BookChanged(TradingPair),
    BestOfferIdsChanged(BestOfferIds),
    PartiallyFilled(FillNotification),
    CompletelyFilled(FillNotification),
}

/// All tracked books plus the active pair's best offer ids
#[derive(Debug, Clone, Default)]
pub struct GlobalView {
    books: HashMap<TradingPair, OfferBook>,
    best_offer_ids: BestOfferIds,
}

impl GlobalView {
    /// One pristine book per pair
    pub fn new(pairs: &[TradingPair]) -> Self {
        Self {
            books: pairs
                .iter()
                .map(|pair| (pair.clone(), OfferBook::new(pair.clone())))
                .collect(),
            best_offer_ids: BestOfferIds::default(),
        }
    }

    pub fn book(&self, pair: &TradingPair) -> Option<&OfferBook> {
        self.books.get(pair)
    }

    pub fn books(&self) -> impl Iterator<Item = &OfferBook> {
        self.books.values()
    }

    pub fn best_offer_ids(&self) -> &BestOfferIds {
        &self.best_offer_ids
    }

    /// Locate an offer in any book and side
    pub fn find_offer(&self, id: OfferId) -> Option<&Offer> {
        self.books.values().find_map(|book| book.find(id))
    }

    fn book_mut(&mut self, pair: &TradingPair) -> Result<&mut OfferBook> {
        self.books
            .get_mut(pair)
            .ok_or_else(|| SyncError::UnknownPair(pair.clone()))
    }

    /// Apply one transition. Returns whether the view changed.
    pub fn apply(&mut self, event: BookEvent, now: u64) -> Result<bool> {
        match event {
            BookEvent::BulkLoadStarted { pair } => {
                let book = self.book_mut(&pair)?;
                if !book.set_initial_sync_status(SyncStatus::Pending, now) {
                    return Ok(false);
                }
                book.clear_offers();
                Ok(true)
            }
            BookEvent::OfferUpserted { offer } => {
                let book = self.book_mut(&offer.pair)?;
                if offer.is_filled() {
                    return Ok(book.remove(offer.id, offer.side, now).is_some());
                }
                Ok(book.upsert(offer, now).is_some())
            }
            BookEvent::OfferLoaded { offer } => {
                Ok(self.book_mut(&offer.pair)?.load(offer, now).is_some())
            }
            BookEvent::OfferRemoved {
                pair,
                side,
                offer_id,
            } => Ok(self.book_mut(&pair)?.retire(offer_id, side, now).is_some()),
            BookEvent::CountsUpdated {
                pair,
                buy_offer_count,
                sell_offer_count,
            } => {
                self.book_mut(&pair)?
                    .set_counts(buy_offer_count, sell_offer_count, now);
                Ok(true)
            }
            BookEvent::SyncStatusChanged { pair, target } => {
                let book = self.book_mut(&pair)?;
                match target {
                    StatusTarget::Initial(status) => {
                        let from = book.initial_sync_status();
                        let applied = book.set_initial_sync_status(status, now);
                        if !applied {
                            warn!(pair = %pair, from = ?from, to = ?status, "Ignoring illegal sync status transition");
                        }
                        Ok(applied)
                    }
                    StatusTarget::Side(side, status) => {
                        book.set_side_status(side, status, now);
                        Ok(true)
                    }
                }
            }
            BookEvent::BestOfferIdsUpdated(ids) => {
                let changed = self.best_offer_ids != ids;
                self.best_offer_ids = ids;
                Ok(changed)
            }
        }
    }
}

/// Single-writer store shared by the syncer, bulk loader and event watcher
#[derive(Debug)]
pub struct OfferBookStore {
    view: RwLock<GlobalView>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl OfferBookStore {
    /// Create a store seeded with one pristine book per pair
    pub fn new(pairs: &[TradingPair]) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            view: RwLock::new(GlobalView::new(pairs)),
            updates,
        }
    }

    /// Subscribe to store notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    /// Apply a transition atomically and announce the change
    pub async fn apply(&self, event: BookEvent) -> Result<bool> {
        let pair = event.pair().cloned();
        let changed = {
            let mut view = self.view.write().await;
            let changed = view.apply(event, now_ms())?;
            if changed && pair.is_none() {
                let ids = view.best_offer_ids().clone();
                self.announce(StoreUpdate::BestOfferIdsChanged(ids));
            }
            changed
        };

        if changed {
            if let Some(pair) = pair {
                debug!(pair = %pair, "Offer book changed");
                self.announce(StoreUpdate::BookChanged(pair));
            }
        }
        Ok(changed)
    }

    /// Claim a pristine pair for bulk loading. False if it was already claimed.
    pub async fn begin_bulk_load(&self, pair: &TradingPair) -> Result<bool> {
        self.apply(BookEvent::BulkLoadStarted { pair: pair.clone() })
            .await
    }

    pub async fn upsert_offer(&self, offer: Offer) -> Result<bool> {
        self.apply(BookEvent::OfferUpserted { offer }).await
    }

    /// Merge an offer found by the bulk traversal
    pub async fn load_offer(&self, offer: Offer) -> Result<bool> {
        self.apply(BookEvent::OfferLoaded { offer }).await
    }

    pub async fn remove_offer(
        &self,
        offer_id: OfferId,
        side: OfferSide,
        pair: &TradingPair,
    ) -> Result<bool> {
        self.apply(BookEvent::OfferRemoved {
            pair: pair.clone(),
            side,
            offer_id,
        })
        .await
    }

    pub async fn set_sync_status(&self, pair: &TradingPair, status: SyncStatus) -> Result<bool> {
        self.apply(BookEvent::SyncStatusChanged {
            pair: pair.clone(),
            target: StatusTarget::Initial(status),
        })
        .await
    }

    pub async fn set_side_status(
        &self,
        pair: &TradingPair,
        side: OfferSide,
        status: SideLoadStatus,
    ) -> Result<bool> {
        self.apply(BookEvent::SyncStatusChanged {
            pair: pair.clone(),
            target: StatusTarget::Side(side, status),
        })
        .await
    }

    pub async fn set_counts(
        &self,
        pair: &TradingPair,
        buy_offer_count: u64,
        sell_offer_count: u64,
    ) -> Result<bool> {
        self.apply(BookEvent::CountsUpdated {
            pair: pair.clone(),
            buy_offer_count,
            sell_offer_count,
        })
        .await
    }

    pub async fn set_best_offer_ids(&self, ids: BestOfferIds) -> Result<bool> {
        self.apply(BookEvent::BestOfferIdsUpdated(ids)).await
    }

    /// Broadcast a fill notification
    pub fn notify_fill(&self, update: StoreUpdate) {
        self.announce(update);
    }

    fn announce(&self, update: StoreUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    pub async fn find_offer(&self, id: OfferId) -> Option<Offer> {
        self.view.read().await.find_offer(id).cloned()
    }

    pub async fn book_state(&self, pair: &TradingPair) -> Option<OfferBookState> {
        self.view.read().await.book(pair).map(|book| book.state())
    }

    pub async fn all_states(&self) -> Vec<OfferBookState> {
        let view = self.view.read().await;
        let mut states: Vec<OfferBookState> = view.books().map(|book| book.state()).collect();
        states.sort_by(|a, b| a.pair.cmp(&b.pair));
        states
    }

    pub async fn initial_sync_status(&self, pair: &TradingPair) -> Option<SyncStatus> {
        self.view
            .read()
            .await
            .book(pair)
            .map(|book| book.initial_sync_status())
    }

    pub async fn best_offer_ids(&self) -> BestOfferIds {
        self.view.read().await.best_offer_ids().clone()
    }

    /// Tracked pairs, sorted
    pub async fn pairs(&self) -> Vec<TradingPair> {
        let mut pairs: Vec<TradingPair> = self
            .view
            .read()
            .await
            .books()
            .map(|book| book.pair().clone())
            .collect();
        pairs.sort();
        pairs
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
