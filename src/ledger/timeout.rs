//! Deadline enforcement for ledger calls

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{BlockNumber, EventFilter, EventKind, EventStream, LedgerClient, RawOffer, TxHash};
use crate::error::{Result, SyncError};
use crate::offers::OfferId;

/// Wraps a client so no call can stay outstanding past `limit`
pub struct TimedLedgerClient {
    inner: Arc<dyn LedgerClient>,
    limit: Duration,
}

impl TimedLedgerClient {
    pub fn new(inner: Arc<dyn LedgerClient>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout {
                operation,
                after_ms: self.limit.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl LedgerClient for TimedLedgerClient {
    async fn offer(&self, id: OfferId) -> Result<RawOffer> {
        self.bounded("offer", self.inner.offer(id)).await
    }

    async fn best_offer(&self, sell_token: &str, buy_token: &str) -> Result<OfferId> {
        self.bounded("best_offer", self.inner.best_offer(sell_token, buy_token))
            .await
    }

    async fn worse_offer(&self, id: OfferId) -> Result<OfferId> {
        self.bounded("worse_offer", self.inner.worse_offer(id)).await
    }

    async fn offer_count(&self, sell_token: &str, buy_token: &str) -> Result<u64> {
        self.bounded("offer_count", self.inner.offer_count(sell_token, buy_token))
            .await
    }

    async fn is_active(&self, id: OfferId) -> Result<bool> {
        self.bounded("is_active", self.inner.is_active(id)).await
    }

    async fn cancel(&self, id: OfferId, gas: u64) -> Result<TxHash> {
        self.bounded("cancel", self.inner.cancel(id, gas)).await
    }

    async fn latest_block(&self) -> Result<BlockNumber> {
        self.bounded("latest_block", self.inner.latest_block()).await
    }

    /// Only establishing the subscription is bounded; the stream itself is open-ended
    async fn subscribe(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        filter: EventFilter,
    ) -> Result<EventStream> {
        self.bounded(
            "subscribe",
            self.inner.subscribe(kind, from_block, filter),
        )
        .await
    }
}
