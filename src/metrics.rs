//! Prometheus metrics for offer synchronization

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::error::{Result, SyncError};
use crate::offers::OfferBookState;

/// Counters and gauges shared by the sync components
#[derive(Debug, Clone)]
pub struct SyncMetrics {
    /// Merges applied, by mode
    pub offers_reconciled: IntCounterVec,
    /// Offers dropped because their tokens are not a tracked pair
    pub offers_ignored: IntCounterVec,
    /// Failed or timed out ledger calls, by operation
    pub ledger_failures: IntCounterVec,
    /// Events received, by class
    pub events_received: IntCounterVec,
    /// Subscription failures, by class
    pub subscription_failures: IntCounterVec,
    /// Offers currently held, by pair and side
    pub book_offers: IntGaugeVec,
}

impl SyncMetrics {
    /// Create unregistered metrics
    pub fn new() -> Self {
        Self {
            offers_reconciled: counter(
                "offer_sync_offers_reconciled_total",
                "Offers merged into the local book",
                &["mode"],
            ),
            offers_ignored: counter(
                "offer_sync_offers_ignored_total",
                "Offers ignored for unknown token pairs",
                &["mode"],
            ),
            ledger_failures: counter(
                "offer_sync_ledger_failures_total",
                "Ledger calls that failed or timed out",
                &["operation"],
            ),
            events_received: counter(
                "offer_sync_events_received_total",
                "Ledger events received",
                &["kind"],
            ),
            subscription_failures: counter(
                "offer_sync_subscription_failures_total",
                "Event subscriptions that failed or ended",
                &["kind"],
            ),
            book_offers: IntGaugeVec::new(
                Opts::new("offer_sync_book_offers", "Offers held in the local book"),
                &["pair", "side"],
            )
            .expect("static gauge definition"),
        }
    }

    /// Register every metric with a registry
    pub fn register(&self, registry: &Registry) -> Result<()> {
        let collectors: [Box<dyn prometheus::core::Collector>; 6] = [
            Box::new(self.offers_reconciled.clone()),
            Box::new(self.offers_ignored.clone()),
            Box::new(self.ledger_failures.clone()),
            Box::new(self.events_received.clone()),
            Box::new(self.subscription_failures.clone()),
            Box::new(self.book_offers.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .map_err(|e| SyncError::ConfigError(format!("Metric registration: {}", e)))?;
        }
        Ok(())
    }

    /// Record the size of a published book
    pub fn observe_book(&self, state: &OfferBookState) {
        let pair = state.pair.to_string();
        self.book_offers
            .with_label_values(&[pair.as_str(), "buy"])
            .set(state.buy_offers.len() as i64);
        self.book_offers
            .with_label_values(&[pair.as_str(), "sell"])
            .set(state.sell_offers.len() as i64);
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("static counter definition")
}
