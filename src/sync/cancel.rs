//! Offer cancellation
//!
//! Submits cancellations and records the transaction outcome. The book is
//! not touched here: the offer leaves it once the watcher sees the kill event.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::ledger::{BlockNumber, LedgerClient, TxHash};
use crate::offers::{Offer, OfferId};

/// Transaction categories reported to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    OfferCancelled,
}

/// Why a transaction did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// Declined by the signer or reverted on submission
    UserCancelled,
}

/// Outcome record handed to the transaction tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionRecord {
    Completed {
        kind: TransactionKind,
        offer_id: OfferId,
        tx_hash: TxHash,
    },
    Rejected {
        kind: TransactionKind,
        offer_id: OfferId,
        /// Latest block when the rejection was observed, if it could be read
        block_at_rejection: Option<BlockNumber>,
        reason: RejectionReason,
        detail: String,
    },
}

impl TransactionRecord {
    pub fn offer_id(&self) -> OfferId {
        match self {
            TransactionRecord::Completed { offer_id, .. }
            | TransactionRecord::Rejected { offer_id, .. } => *offer_id,
        }
    }
}

/// Receives transaction outcomes keyed by offer id
pub trait TransactionTracker: Send + Sync {
    fn record(&self, record: TransactionRecord);
}

impl TransactionTracker for mpsc::UnboundedSender<TransactionRecord> {
    fn record(&self, record: TransactionRecord) {
        if self.send(record).is_err() {
            warn!("Transaction tracker channel closed");
        }
    }
}

/// Submits cancellations on behalf of the offer owner
pub struct CancellationCoordinator {
    ledger: Arc<dyn LedgerClient>,
    tracker: Arc<dyn TransactionTracker>,
    gas: u64,
}

impl CancellationCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        tracker: Arc<dyn TransactionTracker>,
        gas: u64,
    ) -> Self {
        Self {
            ledger,
            tracker,
            gas,
        }
    }

    /// Submit a cancellation and record its outcome
    pub async fn cancel(&self, offer: &Offer) -> TransactionRecord {
        let record = match self.ledger.cancel(offer.id, self.gas).await {
            Ok(tx_hash) => {
                info!(offer_id = offer.id, tx_hash = %tx_hash, "Offer cancellation submitted");
                TransactionRecord::Completed {
                    kind: TransactionKind::OfferCancelled,
                    offer_id: offer.id,
                    tx_hash,
                }
            }
            Err(e) => {
                warn!(offer_id = offer.id, error = %e, "Offer cancellation rejected");
                TransactionRecord::Rejected {
                    kind: TransactionKind::OfferCancelled,
                    offer_id: offer.id,
                    block_at_rejection: self.ledger.latest_block().await.ok(),
                    reason: RejectionReason::UserCancelled,
                    detail: e.to_string(),
                }
            }
        };

        self.tracker.record(record.clone());
        record
    }
}
