//! Bulk loader
//!
//! One-time traversal of a pair's open offers. Each side walks the ledger's
//! best-to-worse chain as its own sequence; offer fetches run ahead of the
//! merge with a bounded, order-preserving buffer so insertion order still
//! matches traversal order.

use futures_util::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{OfferSyncer, SyncMode};
use crate::error::{Result, SyncError};
use crate::ledger::LedgerClient;
use crate::offers::{OfferId, OfferSide, SideLoadStatus, SyncStatus, TradingPair};

/// Result of a `load_pair` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The pair was not pristine; nothing was traversed
    AlreadyLoaded,
    /// Traversal ran. Pair-level status settles once both sides have,
    /// whatever their outcome; side statuses are authoritative.
    Loaded {
        status: SyncStatus,
        buy: SideLoadStatus,
        sell: SideLoadStatus,
    },
}

/// Initial traversal driver
pub struct BulkLoader {
    syncer: Arc<OfferSyncer>,
    concurrency: usize,
}

impl BulkLoader {
    pub fn new(syncer: Arc<OfferSyncer>, concurrency: usize) -> Self {
        Self {
            syncer,
            concurrency: concurrency.max(1),
        }
    }

    /// Load every open offer of a pristine pair
    pub async fn load_pair(&self, pair: &TradingPair) -> Result<LoadOutcome> {
        let store = self.syncer.store();
        if !self.syncer.tokens().is_tracked(pair) {
            return Err(SyncError::UnknownPair(pair.clone()));
        }

        if !store.begin_bulk_load(pair).await? {
            info!(pair = %pair, "Trading pair offers already loaded");
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        info!(pair = %pair, "Starting initial offer load");

        // One count fetch shared by both traversals
        let (buy_count, sell_count) = match self.syncer.refresh_counts(pair).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(pair = %pair, error = %e, "Failed to fetch offer counts");
                for side in [OfferSide::Buy, OfferSide::Sell] {
                    store.set_side_status(pair, side, SideLoadStatus::Error).await?;
                }
                store.set_sync_status(pair, SyncStatus::Error).await?;
                return Ok(LoadOutcome::Loaded {
                    status: SyncStatus::Error,
                    buy: SideLoadStatus::Error,
                    sell: SideLoadStatus::Error,
                });
            }
        };

        let (buy, sell) = tokio::join!(
            self.load_side(pair, OfferSide::Buy, buy_count),
            self.load_side(pair, OfferSide::Sell, sell_count),
        );

        store.set_sync_status(pair, SyncStatus::Completed).await?;
        info!(pair = %pair, buy = ?buy, sell = ?sell, "Initial offer load settled");

        Ok(LoadOutcome::Loaded {
            status: SyncStatus::Completed,
            buy,
            sell,
        })
    }

    /// Traverse one side and record its status
    async fn load_side(&self, pair: &TradingPair, side: OfferSide, count: u64) -> SideLoadStatus {
        let store = self.syncer.store();
        if let Err(e) = store
            .set_side_status(pair, side, SideLoadStatus::Pending)
            .await
        {
            warn!(pair = %pair, side = %side, error = %e, "Failed to mark side pending");
        }

        let status = match self.traverse_side(pair, side, count).await {
            Ok(merged) => {
                info!(pair = %pair, side = %side, merged, "Side load completed");
                SideLoadStatus::Completed
            }
            Err(e) => {
                warn!(pair = %pair, side = %side, error = %e, "Side load failed, keeping partial progress");
                SideLoadStatus::Error
            }
        };

        if let Err(e) = store.set_side_status(pair, side, status).await {
            warn!(pair = %pair, side = %side, error = %e, "Failed to record side status");
        }
        status
    }

    /// Walk `count` offers from the side's best; returns how many were merged
    async fn traverse_side(&self, pair: &TradingPair, side: OfferSide, count: u64) -> Result<u64> {
        if count == 0 {
            return Ok(0);
        }

        let (sell_token, buy_token) = self.syncer.side_tokens(pair, side)?;
        let best = self
            .syncer
            .ledger()
            .best_offer(sell_token, buy_token)
            .await
            .map_err(|e| self.syncer.ledger_failure("best_offer", e))?;

        let syncer = &self.syncer;
        let fetched = offer_chain(syncer.ledger().clone(), best, count)
            .map(|id| async move {
                let id = id.map_err(|e| syncer.ledger_failure("worse_offer", e))?;
                syncer.fetch(id, SyncMode::Initial).await
            })
            .buffered(self.concurrency);
        let mut fetched = std::pin::pin!(fetched);

        let mut merged = 0;
        while let Some(offer) = fetched.next().await {
            if let Some(offer) = offer? {
                if offer.pair != *pair || offer.side != side {
                    warn!(offer_id = offer.id, pair = %pair, side = %side, "Traversed offer belongs elsewhere");
                }
                syncer.merge(offer, SyncMode::Initial, None).await?;
                merged += 1;
            }
        }
        Ok(merged)
    }
}

enum Chain {
    Next { id: OfferId, remaining: u64 },
    Failed(SyncError),
    Done,
}

/// Offer ids from `first` following worse-offer links, at most `count` of them.
///
/// Ends early when the ledger reports no worse offer (id 0). A failed link
/// yields the ids already reached, then the error.
fn offer_chain(
    ledger: Arc<dyn LedgerClient>,
    first: OfferId,
    count: u64,
) -> impl Stream<Item = Result<OfferId>> {
    let start = Chain::Next {
        id: first,
        remaining: count,
    };
    stream::unfold(start, move |state| {
        let ledger = ledger.clone();
        async move {
            match state {
                Chain::Done => None,
                Chain::Failed(e) => Some((Err(e), Chain::Done)),
                Chain::Next { id, remaining } if id == 0 || remaining == 0 => None,
                Chain::Next { id, remaining: 1 } => Some((Ok(id), Chain::Done)),
                Chain::Next { id, remaining } => {
                    let next = match ledger.worse_offer(id).await {
                        Ok(next) => Chain::Next {
                            id: next,
                            remaining: remaining - 1,
                        },
                        Err(e) => Chain::Failed(e),
                    };
                    Some((Ok(id), next))
                }
            }
        }
    })
}
