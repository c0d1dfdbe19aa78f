//! Offer syncer
//!
//! Fetches one offer's raw ledger state and merges it into the store.

use std::sync::Arc;
use tracing::{debug, warn};

use super::SyncMode;
use crate::error::{Result, SyncError};
use crate::ledger::LedgerClient;
use crate::metrics::SyncMetrics;
use crate::offers::{
    BestOfferIds, FillNotification, Offer, OfferBookStore, OfferId, OfferSide, OfferStatus,
    PriceRounding, StoreUpdate, TradingPair,
};
use crate::tokens::TokenDirectory;

/// What a reconciliation did to the book
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Tokens do not form a tracked pair, or nothing was left to merge
    Ignored,
    /// Inserted or replaced in place
    Upserted(Offer),
    PartiallyFilled(Offer),
    CompletelyFilled(Offer),
}

/// Core reconciliation unit shared by the bulk loader and event watcher
pub struct OfferSyncer {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<OfferBookStore>,
    tokens: Arc<TokenDirectory>,
    rounding: PriceRounding,
    metrics: SyncMetrics,
}

impl OfferSyncer {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<OfferBookStore>,
        tokens: Arc<TokenDirectory>,
        rounding: PriceRounding,
        metrics: SyncMetrics,
    ) -> Self {
        Self {
            ledger,
            store,
            tokens,
            rounding,
            metrics,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<OfferBookStore> {
        &self.store
    }

    pub fn tokens(&self) -> &Arc<TokenDirectory> {
        &self.tokens
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Fetch an offer and merge it according to `mode`.
    ///
    /// Every merge outside a bulk traversal refreshes the pair's counts.
    pub async fn reconcile(
        &self,
        id: OfferId,
        mode: SyncMode,
        previous: Option<Offer>,
    ) -> Result<ReconcileOutcome> {
        let offer = match self.fetch(id, mode).await? {
            Some(offer) => offer,
            None => return Ok(ReconcileOutcome::Ignored),
        };
        let pair = offer.pair.clone();

        let outcome = self.merge(offer, mode, previous).await?;

        if mode != SyncMode::Initial {
            if let Err(e) = self.refresh_counts(&pair).await {
                warn!(pair = %pair, error = %e, "Failed to refresh offer counts");
            }
        }
        Ok(outcome)
    }

    /// Fetch and normalize an offer. `None` when its tokens are not a tracked pair.
    pub async fn fetch(&self, id: OfferId, mode: SyncMode) -> Result<Option<Offer>> {
        let raw = self
            .ledger
            .offer(id)
            .await
            .map_err(|e| self.ledger_failure("offer", e))?;

        let resolution = match self.tokens.resolve(&raw.sell_token, &raw.buy_token) {
            Some(resolution) => resolution,
            None => {
                let ignored = SyncError::UnknownTokenPair {
                    sell_token: raw.sell_token.clone(),
                    buy_token: raw.buy_token.clone(),
                };
                debug!(offer_id = id, reason = %ignored, "Ignoring offer");
                self.metrics
                    .offers_ignored
                    .with_label_values(&[mode.as_str()])
                    .inc();
                return Ok(None);
            }
        };

        Offer::from_ledger(id, &raw, &resolution, &self.rounding).map(Some)
    }

    /// Merge a fetched offer into the store
    pub async fn merge(
        &self,
        offer: Offer,
        mode: SyncMode,
        previous: Option<Offer>,
    ) -> Result<ReconcileOutcome> {
        let outcome = match mode {
            // A live event may have outraced the traversal; its copy stands
            SyncMode::Initial => {
                if offer.is_filled() {
                    self.store
                        .remove_offer(offer.id, offer.side, &offer.pair)
                        .await?;
                    ReconcileOutcome::Ignored
                } else if self.store.load_offer(offer.clone()).await? {
                    ReconcileOutcome::Upserted(offer)
                } else {
                    debug!(offer_id = offer.id, pair = %offer.pair, "Traversed offer superseded by live event");
                    ReconcileOutcome::Ignored
                }
            }
            // The same new-offer event may be delivered twice
            SyncMode::New => {
                if offer.is_filled() {
                    self.store
                        .remove_offer(offer.id, offer.side, &offer.pair)
                        .await?;
                    ReconcileOutcome::Ignored
                } else {
                    self.store.upsert_offer(offer.clone()).await?;
                    ReconcileOutcome::Upserted(offer)
                }
            }
            SyncMode::Update => {
                if offer.is_filled() {
                    self.store
                        .remove_offer(offer.id, offer.side, &offer.pair)
                        .await?;
                    self.store
                        .notify_fill(StoreUpdate::CompletelyFilled(fill(&offer, previous)));
                    debug!(offer_id = offer.id, pair = %offer.pair, "Offer completely filled");
                    ReconcileOutcome::CompletelyFilled(offer)
                } else {
                    let offer = offer.with_status(OfferStatus::PartiallyFilled);
                    self.store.upsert_offer(offer.clone()).await?;
                    self.store
                        .notify_fill(StoreUpdate::PartiallyFilled(fill(&offer, previous)));
                    debug!(offer_id = offer.id, pair = %offer.pair, "Offer partially filled");
                    ReconcileOutcome::PartiallyFilled(offer)
                }
            }
        };

        self.metrics
            .offers_reconciled
            .with_label_values(&[mode.as_str()])
            .inc();
        Ok(outcome)
    }

    /// Ledger token addresses (sell, buy) that define one side of a pair
    pub fn side_tokens(&self, pair: &TradingPair, side: OfferSide) -> Result<(&str, &str)> {
        let base = self.tokens.address_of(&pair.base_token)?;
        let quote = self.tokens.address_of(&pair.quote_token)?;
        Ok(match side {
            OfferSide::Sell => (base, quote),
            OfferSide::Buy => (quote, base),
        })
    }

    /// Fetch (buy, sell) offer counts and store them
    pub async fn refresh_counts(&self, pair: &TradingPair) -> Result<(u64, u64)> {
        let (buy_sell, buy_buy) = self.side_tokens(pair, OfferSide::Buy)?;
        let (sell_sell, sell_buy) = self.side_tokens(pair, OfferSide::Sell)?;

        let buy_count = self
            .ledger
            .offer_count(buy_sell, buy_buy)
            .await
            .map_err(|e| self.ledger_failure("offer_count", e))?;
        let sell_count = self
            .ledger
            .offer_count(sell_sell, sell_buy)
            .await
            .map_err(|e| self.ledger_failure("offer_count", e))?;

        self.store.set_counts(pair, buy_count, sell_count).await?;
        debug!(pair = %pair, buy_count, sell_count, "Offer counts refreshed");
        Ok((buy_count, sell_count))
    }

    /// Fetch and store the best buy/sell offer ids for the active pair
    pub async fn refresh_best_offer_ids(&self, pair: &TradingPair) -> Result<BestOfferIds> {
        let mut ids = BestOfferIds::default();
        for side in [OfferSide::Buy, OfferSide::Sell] {
            let (sell, buy) = self.side_tokens(pair, side)?;
            let best = self
                .ledger
                .best_offer(sell, buy)
                .await
                .map_err(|e| self.ledger_failure("best_offer", e))?;
            let best = (best != 0).then_some(best);
            match side {
                OfferSide::Buy => ids.best_buy_offer_id = best,
                OfferSide::Sell => ids.best_sell_offer_id = best,
            }
        }

        self.store.set_best_offer_ids(ids.clone()).await?;
        Ok(ids)
    }

    /// Count a failed ledger call and pass the error on
    pub fn ledger_failure(&self, operation: &str, error: SyncError) -> SyncError {
        self.metrics
            .ledger_failures
            .with_label_values(&[operation])
            .inc();
        error
    }
}

fn fill(offer: &Offer, previous: Option<Offer>) -> FillNotification {
    FillNotification {
        pair: offer.pair.clone(),
        side: offer.side,
        offer_id: offer.id,
        previous,
        updated: offer.clone(),
    }
}
