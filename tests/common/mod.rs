//! Scripted in-memory ledger shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use offer_book_sync::error::{Result, SyncError};
use offer_book_sync::ledger::{
    BlockNumber, EventFilter, EventKind, EventStream, LedgerClient, LedgerEvent, RawOffer, TxHash,
};
use offer_book_sync::numeric::RoundingPolicy;
use offer_book_sync::offers::{OfferBookStore, OfferId, PriceRounding, TradingPair};
use offer_book_sync::sync::{BulkLoader, EventWatcher, OfferSyncer};
use offer_book_sync::tokens::{Token, TokenDirectory};
use offer_book_sync::SyncMetrics;

pub const DAI: &str = "0x00000000000000000000000000000000000000da";
pub const ETH: &str = "0x00000000000000000000000000000000000000e7";
pub const MKR: &str = "0x000000000000000000000000000000000000004b";

const UNIT: u128 = 1_000_000_000_000_000_000;

pub fn pair() -> TradingPair {
    TradingPair::new("DAI", "ETH")
}

pub fn directory() -> TokenDirectory {
    TokenDirectory::new(
        vec![
            Token::new("DAI", DAI, 18),
            Token::new("ETH", ETH, 18),
            Token::new("MKR", MKR, 18),
        ],
        vec![pair()],
    )
    .unwrap()
}

/// One scripted subscription: its items, then either silence or the end
struct ScriptedStream {
    items: Vec<Result<LedgerEvent>>,
    stays_open: bool,
}

#[derive(Default)]
struct LedgerState {
    offers: HashMap<OfferId, RawOffer>,
    best: HashMap<(String, String), OfferId>,
    worse: HashMap<OfferId, OfferId>,
    counts: HashMap<(String, String), u64>,
    inactive: HashSet<OfferId>,
    failing_offers: HashSet<OfferId>,
    failing_worse: HashSet<OfferId>,
    stalled_offers: HashSet<OfferId>,
    delays: HashMap<OfferId, Duration>,
    fail_counts: bool,
    reject_cancel: bool,
    streams: HashMap<EventKind, VecDeque<ScriptedStream>>,
    failing_subscribes: HashMap<EventKind, u32>,
    broken_streams: HashSet<EventKind>,
    subscriptions: Vec<(EventKind, BlockNumber)>,
    cancels: Vec<(OfferId, u64)>,
    latest_block: BlockNumber,
}

/// Ledger double driven entirely by test setup
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<LedgerState>,
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Place or overwrite an offer, amounts in whole tokens
    pub fn place(&self, id: OfferId, sell_token: &str, sell: u128, buy_token: &str, buy: u128) {
        self.state.lock().unwrap().offers.insert(
            id,
            RawOffer {
                sell_amount: sell * UNIT,
                sell_token: sell_token.to_string(),
                buy_amount: buy * UNIT,
                buy_token: buy_token.to_string(),
                owner: "0x0000000000000000000000000000000000000001".to_string(),
                timestamp: 1_700_000_000 + id,
            },
        );
    }

    /// Link `ids` best to worse for a market and set its count to match
    pub fn chain(&self, sell_token: &str, buy_token: &str, ids: &[OfferId]) {
        let mut state = self.state.lock().unwrap();
        let market = (sell_token.to_string(), buy_token.to_string());
        state.best.insert(market.clone(), ids.first().copied().unwrap_or(0));
        for window in ids.windows(2) {
            state.worse.insert(window[0], window[1]);
        }
        if let Some(last) = ids.last() {
            state.worse.insert(*last, 0);
        }
        state.counts.insert(market, ids.len() as u64);
    }

    pub fn set_count(&self, sell_token: &str, buy_token: &str, count: u64) {
        self.state
            .lock()
            .unwrap()
            .counts
            .insert((sell_token.to_string(), buy_token.to_string()), count);
    }

    pub fn deactivate(&self, id: OfferId) {
        self.state.lock().unwrap().inactive.insert(id);
    }

    pub fn fail_offer(&self, id: OfferId) {
        self.state.lock().unwrap().failing_offers.insert(id);
    }

    pub fn fail_worse(&self, id: OfferId) {
        self.state.lock().unwrap().failing_worse.insert(id);
    }

    pub fn stall_offer(&self, id: OfferId) {
        self.state.lock().unwrap().stalled_offers.insert(id);
    }

    pub fn delay_offer(&self, id: OfferId, delay: Duration) {
        self.state.lock().unwrap().delays.insert(id, delay);
    }

    pub fn fail_counts(&self, fail: bool) {
        self.state.lock().unwrap().fail_counts = fail;
    }

    pub fn reject_cancel(&self, reject: bool) {
        self.state.lock().unwrap().reject_cancel = reject;
    }

    pub fn set_latest_block(&self, block: BlockNumber) {
        self.state.lock().unwrap().latest_block = block;
    }

    /// Events delivered by the next subscription to `kind`, which then stays open
    pub fn script_events(&self, kind: EventKind, events: Vec<LedgerEvent>) {
        self.script_stream(kind, events.into_iter().map(Ok).collect(), true);
    }

    /// Queue the items of one subscription to `kind`. Unless `stays_open`,
    /// the stream ends after its last item.
    pub fn script_stream(&self, kind: EventKind, items: Vec<Result<LedgerEvent>>, stays_open: bool) {
        self.state
            .lock()
            .unwrap()
            .streams
            .entry(kind)
            .or_default()
            .push_back(ScriptedStream { items, stays_open });
    }

    /// Reject the next `times` subscribe calls for `kind`
    pub fn fail_subscriptions(&self, kind: EventKind, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failing_subscribes
            .insert(kind, times);
    }

    /// Unscripted subscriptions to `kind` fail before delivering anything
    pub fn break_streams(&self, kind: EventKind) {
        self.state.lock().unwrap().broken_streams.insert(kind);
    }

    pub fn subscriptions(&self) -> Vec<(EventKind, BlockNumber)> {
        self.state.lock().unwrap().subscriptions.clone()
    }

    /// Start blocks of every subscribe call for one kind, failed ones included
    pub fn subscriptions_to(&self, kind: EventKind) -> Vec<BlockNumber> {
        self.subscriptions()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, block)| block)
            .collect()
    }

    pub fn cancels(&self) -> Vec<(OfferId, u64)> {
        self.state.lock().unwrap().cancels.clone()
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn offer(&self, id: OfferId) -> Result<RawOffer> {
        let (delay, stalled, failing, raw) = {
            let state = self.state.lock().unwrap();
            (
                state.delays.get(&id).copied(),
                state.stalled_offers.contains(&id),
                state.failing_offers.contains(&id),
                state.offers.get(&id).cloned(),
            )
        };
        if stalled {
            futures_util::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(SyncError::LedgerCallFailed(format!("offer {} unavailable", id)));
        }
        raw.ok_or_else(|| SyncError::LedgerCallFailed(format!("no offer {}", id)))
    }

    async fn best_offer(&self, sell_token: &str, buy_token: &str) -> Result<OfferId> {
        let state = self.state.lock().unwrap();
        Ok(state
            .best
            .get(&(sell_token.to_string(), buy_token.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn worse_offer(&self, id: OfferId) -> Result<OfferId> {
        let state = self.state.lock().unwrap();
        if state.failing_worse.contains(&id) {
            return Err(SyncError::LedgerCallFailed(format!("worse offer after {}", id)));
        }
        Ok(state.worse.get(&id).copied().unwrap_or(0))
    }

    async fn offer_count(&self, sell_token: &str, buy_token: &str) -> Result<u64> {
        let state = self.state.lock().unwrap();
        if state.fail_counts {
            return Err(SyncError::LedgerCallFailed("offer count".to_string()));
        }
        Ok(state
            .counts
            .get(&(sell_token.to_string(), buy_token.to_string()))
            .copied()
            .unwrap_or(0))
    }

    async fn is_active(&self, id: OfferId) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.offers.contains_key(&id) && !state.inactive.contains(&id))
    }

    async fn cancel(&self, id: OfferId, gas: u64) -> Result<TxHash> {
        let mut state = self.state.lock().unwrap();
        if state.reject_cancel {
            return Err(SyncError::CancellationRejected {
                offer_id: id,
                reason: "user denied transaction".to_string(),
            });
        }
        state.cancels.push((id, gas));
        Ok(format!("0x{:064x}", id))
    }

    async fn latest_block(&self) -> Result<BlockNumber> {
        Ok(self.state.lock().unwrap().latest_block)
    }

    async fn subscribe(
        &self,
        kind: EventKind,
        from_block: BlockNumber,
        _filter: EventFilter,
    ) -> Result<EventStream> {
        let scripted = {
            let mut state = self.state.lock().unwrap();
            state.subscriptions.push((kind, from_block));
            if let Some(left) = state.failing_subscribes.get_mut(&kind) {
                if *left > 0 {
                    *left -= 1;
                    return Err(SyncError::SubscriptionFailed(format!("{} unavailable", kind)));
                }
            }
            match state.streams.get_mut(&kind).and_then(|queue| queue.pop_front()) {
                Some(scripted) => scripted,
                None if state.broken_streams.contains(&kind) => ScriptedStream {
                    items: vec![Err(SyncError::SubscriptionFailed("connection reset".to_string()))],
                    stays_open: false,
                },
                // Unscripted subscriptions stay quiet, like a live one
                None => ScriptedStream {
                    items: Vec::new(),
                    stays_open: true,
                },
            }
        };
        let items = stream::iter(scripted.items);
        Ok(if scripted.stays_open {
            items.chain(stream::pending()).boxed()
        } else {
            items.boxed()
        })
    }
}

/// Wired components over a ledger double
pub struct Harness {
    pub store: Arc<OfferBookStore>,
    pub syncer: Arc<OfferSyncer>,
    pub loader: BulkLoader,
    pub watcher: EventWatcher,
}

pub fn harness(ledger: Arc<dyn LedgerClient>) -> Harness {
    harness_with_concurrency(ledger, 4)
}

pub fn harness_with_concurrency(ledger: Arc<dyn LedgerClient>, concurrency: usize) -> Harness {
    let store = Arc::new(OfferBookStore::new(&[pair()]));
    let syncer = Arc::new(OfferSyncer::new(
        ledger,
        store.clone(),
        Arc::new(directory()),
        PriceRounding::new(2, RoundingPolicy::HalfUp),
        SyncMetrics::new(),
    ));
    Harness {
        store,
        loader: BulkLoader::new(syncer.clone(), concurrency),
        watcher: EventWatcher::new(
            syncer.clone(),
            EventFilter::default(),
            Duration::from_millis(10),
        ),
        syncer,
    }
}

/// The example book: sells 42 then 41, buys 7 then 8
pub fn seeded_ledger() -> Arc<FakeLedger> {
    let ledger = FakeLedger::new();
    ledger.place(42, DAI, 10, ETH, 20);
    ledger.place(41, DAI, 5, ETH, 15);
    ledger.place(7, ETH, 2, DAI, 1);
    ledger.place(8, ETH, 3, DAI, 1);
    ledger.chain(DAI, ETH, &[42, 41]);
    ledger.chain(ETH, DAI, &[7, 8]);
    ledger.set_latest_block(100);
    ledger
}
