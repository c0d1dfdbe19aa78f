//! Event watcher
//!
//! Subscribes to the three ledger event classes and routes each event to
//! the syncer or to a direct removal. Events may arrive duplicated, out of
//! order or ahead of the bulk load; upserts and idempotent removals absorb
//! all of those.

use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{OfferSyncer, ReconcileOutcome, SyncMode};
use crate::error::{Result, SyncError};
use crate::ledger::{BlockNumber, EventFilter, EventKind, EventStream, LedgerEvent, OfferKilled};
use crate::offers::OfferId;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;

/// Health of one event class subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Pending,
    Active { from_block: BlockNumber },
    /// Last failure; the watcher keeps retrying
    Failed(String),
}

/// Routes live ledger events into the offer book
pub struct EventWatcher {
    syncer: Arc<OfferSyncer>,
    filter: EventFilter,
    reconnect_delay: Duration,
    statuses: RwLock<HashMap<EventKind, SubscriptionStatus>>,
}

impl EventWatcher {
    pub fn new(syncer: Arc<OfferSyncer>, filter: EventFilter, reconnect_delay: Duration) -> Self {
        let statuses = EventKind::ALL
            .into_iter()
            .map(|kind| (kind, SubscriptionStatus::Pending))
            .collect();
        Self {
            syncer,
            filter,
            reconnect_delay,
            statuses: RwLock::new(statuses),
        }
    }

    pub async fn subscription_status(&self, kind: EventKind) -> SubscriptionStatus {
        self.statuses
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or(SubscriptionStatus::Pending)
    }

    /// Watch all three event classes from `from_block` until `shutdown` flips to true
    pub async fn run(&self, from_block: BlockNumber, shutdown: watch::Receiver<bool>) {
        info!(from_block, "Starting ledger event watcher");
        tokio::join!(
            self.watch(EventKind::NewOffer, from_block, shutdown.clone()),
            self.watch(EventKind::OfferKilled, from_block, shutdown.clone()),
            self.watch(EventKind::ItemUpdated, from_block, shutdown),
        );
        info!("Ledger event watcher stopped");
    }

    /// Keep one subscription alive, restarting from the last seen block
    async fn watch(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut next_block = from_block;
        let mut failures: u32 = 0;

        while !*shutdown.borrow() {
            let subscribed = tokio::select! {
                result = self.syncer.ledger().subscribe(kind, next_block, self.filter.clone()) => result,
                _ = shutdown.changed() => break,
            };

            match subscribed {
                Ok(events) => {
                    self.set_status(kind, SubscriptionStatus::Active { from_block: next_block })
                        .await;
                    let mut delivered = 0;
                    let stopped = tokio::select! {
                        result = self.drain(kind, events, &mut next_block, &mut delivered) => result,
                        _ = shutdown.changed() => break,
                    };
                    // Only a stream that delivered events counts as recovered
                    if delivered > 0 {
                        failures = 0;
                    }
                    if let Err(e) = stopped {
                        self.record_failure(kind, &e).await;
                        failures += 1;
                    } else {
                        info!(kind = %kind, next_block, "Event stream ended, resubscribing");
                    }
                }
                Err(e) => {
                    self.record_failure(kind, &e).await;
                    failures += 1;
                }
            }

            // Brief pause after a normal end, exponential backoff after failures
            let delay = if failures > 0 {
                let delay = self.backoff(failures);
                warn!(kind = %kind, attempt = failures, delay_ms = delay.as_millis() as u64, "Resubscribing after failure");
                delay
            } else {
                self.reconnect_delay
            };
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Handle events until the stream ends (Ok) or fails (Err), counting
    /// decoded events in `delivered`
    async fn drain(
        &self,
        kind: EventKind,
        mut events: EventStream,
        next_block: &mut BlockNumber,
        delivered: &mut u64,
    ) -> Result<()> {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    *delivered += 1;
                    // Resume at the same block: redelivered events are idempotent
                    *next_block = (*next_block).max(event.block_number());
                    if let Err(e) = self.handle(event).await {
                        warn!(kind = %kind, error = %e, "Failed to handle ledger event");
                    }
                }
                Err(SyncError::ParseError(msg)) => {
                    warn!(kind = %kind, error = %msg, "Skipping undecodable event");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Route one event
    pub async fn handle(&self, event: LedgerEvent) -> Result<()> {
        self.syncer
            .metrics()
            .events_received
            .with_label_values(&[event.kind().log_name()])
            .inc();

        match event {
            LedgerEvent::NewOffer { id, .. } => {
                debug!(offer_id = id, "New offer event");
                self.syncer.reconcile(id, SyncMode::New, None).await?;
            }
            LedgerEvent::OfferKilled(killed) => self.handle_killed(killed).await?,
            LedgerEvent::ItemUpdated { id, .. } => self.handle_item_updated(id).await?,
        }
        Ok(())
    }

    /// Remove a cancelled offer; the ledger tuple is already gone so nothing is fetched
    async fn handle_killed(&self, killed: OfferKilled) -> Result<()> {
        let resolution = match self
            .syncer
            .tokens()
            .resolve(&killed.sell_token, &killed.buy_token)
        {
            Some(resolution) => resolution,
            None => {
                debug!(offer_id = killed.id, "Kill event for untracked pair");
                return Ok(());
            }
        };

        let removed = self
            .syncer
            .store()
            .remove_offer(killed.id, resolution.side, &resolution.pair)
            .await?;
        debug!(
            offer_id = killed.id,
            pair = %resolution.pair,
            side = %resolution.side,
            removed,
            "Offer killed"
        );

        self.syncer.refresh_counts(&resolution.pair).await?;
        Ok(())
    }

    /// Partial or complete fill of an active offer, or an offer never seen before
    async fn handle_item_updated(&self, id: OfferId) -> Result<()> {
        if id == 0 {
            return Ok(());
        }

        let active = self
            .syncer
            .ledger()
            .is_active(id)
            .await
            .map_err(|e| self.syncer.ledger_failure("is_active", e))?;
        if !active {
            // Cancellations are handled by the kill event
            debug!(offer_id = id, "Update for inactive offer");
            return Ok(());
        }

        let outcome = match self.syncer.store().find_offer(id).await {
            Some(previous) => {
                self.syncer
                    .reconcile(id, SyncMode::Update, Some(previous))
                    .await?
            }
            None => self.syncer.reconcile(id, SyncMode::New, None).await?,
        };
        if outcome == ReconcileOutcome::Ignored {
            debug!(offer_id = id, "Update for untracked offer ignored");
        }
        Ok(())
    }

    async fn set_status(&self, kind: EventKind, status: SubscriptionStatus) {
        self.statuses.write().await.insert(kind, status);
    }

    async fn record_failure(&self, kind: EventKind, e: &SyncError) {
        error!(kind = %kind, error = %e, "Event subscription failed");
        self.syncer
            .metrics()
            .subscription_failures
            .with_label_values(&[kind.log_name()])
            .inc();
        self.set_status(kind, SubscriptionStatus::Failed(e.to_string()))
            .await;
    }

    /// Exponential backoff, capped at MAX_BACKOFF_MS
    fn backoff(&self, failures: u32) -> Duration {
        let base_delay = self.reconnect_delay.as_millis() as u64 * 2u64.pow(failures.min(6));
        Duration::from_millis(base_delay.min(MAX_BACKOFF_MS))
    }
}
