//! Per-pair offer book
//!
//! Side sequences keep ledger traversal order: new offers are appended and
//! merges replace in place, so positions never shift on update.

use std::collections::HashSet;

use super::{Offer, OfferBookState, OfferId, OfferSide, SideLoadStatus, SyncStatus, TradingPair};

/// Result of an upsert on a side sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Replaced,
}

/// Offer book for a single trading pair
#[derive(Debug, Clone)]
pub struct OfferBook {
    pair: TradingPair,
    /// Buy offers in ledger best-to-worst order
    buy_offers: Vec<Offer>,
    /// Sell offers in ledger best-to-worst order
    sell_offers: Vec<Offer>,
    /// Counts as last reported by the ledger, unknown until fetched
    buy_offer_count: Option<u64>,
    sell_offer_count: Option<u64>,
    initial_sync_status: SyncStatus,
    loading_buy_offers: Option<SideLoadStatus>,
    loading_sell_offers: Option<SideLoadStatus>,
    /// Ids removed while the bulk load was pending
    retired: HashSet<OfferId>,
    /// Timestamp (ms) of the last mutation
    last_update_time: u64,
}

impl OfferBook {
    /// Create a new pristine book
    pub fn new(pair: TradingPair) -> Self {
        Self {
            pair,
            buy_offers: Vec::new(),
            sell_offers: Vec::new(),
            buy_offer_count: None,
            sell_offer_count: None,
            initial_sync_status: SyncStatus::Pristine,
            loading_buy_offers: None,
            loading_sell_offers: None,
            retired: HashSet::new(),
            last_update_time: 0,
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    /// Offers on one side, best first
    pub fn offers(&self, side: OfferSide) -> &[Offer] {
        match side {
            OfferSide::Buy => &self.buy_offers,
            OfferSide::Sell => &self.sell_offers,
        }
    }

    fn offers_mut(&mut self, side: OfferSide) -> &mut Vec<Offer> {
        match side {
            OfferSide::Buy => &mut self.buy_offers,
            OfferSide::Sell => &mut self.sell_offers,
        }
    }

    /// Drop every offer on both sides
    pub fn clear_offers(&mut self) {
        self.buy_offers.clear();
        self.sell_offers.clear();
    }

    /// Replace an offer with the same id in place, or append it.
    ///
    /// Offers with nothing left to sell are never stored; an existing entry
    /// for that id is removed instead and `None` is returned.
    pub fn upsert(&mut self, offer: Offer, now: u64) -> Option<UpsertKind> {
        let side = offer.side;
        if offer.is_filled() {
            self.remove(offer.id, side, now);
            return None;
        }

        let offers = self.offers_mut(side);
        let kind = match offers.iter().position(|o| o.id == offer.id) {
            Some(idx) => {
                offers[idx] = offer;
                UpsertKind::Replaced
            }
            None => {
                offers.push(offer);
                UpsertKind::Inserted
            }
        };
        self.last_update_time = now;
        Some(kind)
    }

    /// Remove an offer from a side; absent ids are a no-op
    pub fn remove(&mut self, id: OfferId, side: OfferSide, now: u64) -> Option<Offer> {
        let offers = self.offers_mut(side);
        let idx = offers.iter().position(|o| o.id == id)?;
        let removed = offers.remove(idx);
        self.last_update_time = now;
        Some(removed)
    }

    /// Remove an offer that left the ledger.
    ///
    /// While the bulk load is pending the id is also remembered, so a
    /// traversal fetch that started before the removal cannot restore it.
    pub fn retire(&mut self, id: OfferId, side: OfferSide, now: u64) -> Option<Offer> {
        if self.initial_sync_status == SyncStatus::Pending {
            self.retired.insert(id);
        }
        self.remove(id, side, now)
    }

    /// Store an offer found by the bulk traversal.
    ///
    /// Live events win: an id already present, or retired since the load
    /// began, is left alone.
    pub fn load(&mut self, offer: Offer, now: u64) -> Option<UpsertKind> {
        if self.retired.contains(&offer.id) || self.find(offer.id).is_some() {
            return None;
        }
        self.upsert(offer, now)
    }

    /// Find an offer on either side
    pub fn find(&self, id: OfferId) -> Option<&Offer> {
        self.buy_offers
            .iter()
            .chain(self.sell_offers.iter())
            .find(|o| o.id == id)
    }

    pub fn counts(&self) -> (Option<u64>, Option<u64>) {
        (self.buy_offer_count, self.sell_offer_count)
    }

    pub fn set_counts(&mut self, buy_offer_count: u64, sell_offer_count: u64, now: u64) {
        self.buy_offer_count = Some(buy_offer_count);
        self.sell_offer_count = Some(sell_offer_count);
        self.last_update_time = now;
    }

    pub fn initial_sync_status(&self) -> SyncStatus {
        self.initial_sync_status
    }

    /// Move the pair-level status; returns false for an illegal transition
    pub fn set_initial_sync_status(&mut self, status: SyncStatus, now: u64) -> bool {
        if !self.initial_sync_status.can_transition_to(status) {
            return false;
        }
        self.initial_sync_status = status;
        self.retired.clear();
        self.last_update_time = now;
        true
    }

    pub fn side_status(&self, side: OfferSide) -> Option<SideLoadStatus> {
        match side {
            OfferSide::Buy => self.loading_buy_offers,
            OfferSide::Sell => self.loading_sell_offers,
        }
    }

    pub fn set_side_status(&mut self, side: OfferSide, status: SideLoadStatus, now: u64) {
        match side {
            OfferSide::Buy => self.loading_buy_offers = Some(status),
            OfferSide::Sell => self.loading_sell_offers = Some(status),
        }
        self.last_update_time = now;
    }

    /// Get current state for publishing
    pub fn state(&self) -> OfferBookState {
        OfferBookState {
            pair: self.pair.clone(),
            timestamp: self.last_update_time,
            buy_offers: self.buy_offers.clone(),
            sell_offers: self.sell_offers.clone(),
            buy_offer_count: self.buy_offer_count,
            sell_offer_count: self.sell_offer_count,
            initial_sync_status: self.initial_sync_status,
            loading_buy_offers: self.loading_buy_offers,
            loading_sell_offers: self.loading_sell_offers,
        }
    }
}
