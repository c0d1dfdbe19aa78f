//! End-to-end reconciliation against a scripted ledger

mod common;

use rust_decimal_macros::dec;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use common::{harness, harness_with_concurrency, pair, seeded_ledger, FakeLedger, DAI, ETH, MKR};
use offer_book_sync::error::SyncError;
use offer_book_sync::ledger::{EventKind, LedgerClient, LedgerEvent, OfferKilled};
use offer_book_sync::offers::{
    OfferSide, OfferStatus, SideLoadStatus, StoreUpdate, SyncStatus, TradingPair,
};
use offer_book_sync::sync::{
    CancellationCoordinator, EventWatcher, LoadOutcome, ReconcileOutcome, SubscriptionStatus, SyncMode,
    TransactionRecord, TransactionTracker,
};
use offer_book_sync::TimedLedgerClient;

fn ids(offers: &[offer_book_sync::Offer]) -> Vec<u64> {
    offers.iter().map(|o| o.id).collect()
}

fn killed(id: u64, sell_token: &str, buy_token: &str) -> LedgerEvent {
    LedgerEvent::OfferKilled(OfferKilled {
        id,
        pair: String::new(),
        owner: "0x0000000000000000000000000000000000000001".to_string(),
        sell_token: sell_token.to_string(),
        buy_token: buy_token.to_string(),
        timestamp: 0,
        block_number: 101,
    })
}

fn spawn_watcher(
    watcher: EventWatcher,
    from_block: u64,
) -> (Arc<EventWatcher>, watch::Sender<bool>, JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = Arc::new(watcher);
    let task = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run(from_block, shutdown_rx).await })
    };
    (watcher, shutdown_tx, task)
}

async fn stop_watcher(shutdown_tx: watch::Sender<bool>, task: JoinHandle<()>) {
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();
}

/// Poll `check` until it holds, giving up after two seconds
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

fn drain_fills(rx: &mut broadcast::Receiver<StoreUpdate>) -> Vec<StoreUpdate> {
    let mut fills = Vec::new();
    while let Ok(update) = rx.try_recv() {
        if matches!(
            update,
            StoreUpdate::PartiallyFilled(_) | StoreUpdate::CompletelyFilled(_)
        ) {
            fills.push(update);
        }
    }
    fills
}

#[tokio::test]
async fn test_bulk_load_follows_best_to_worse_chain() {
    let ledger = seeded_ledger();
    let h = harness(ledger);

    let outcome = h.loader.load_pair(&pair()).await.unwrap();
    assert_eq!(
        outcome,
        LoadOutcome::Loaded {
            status: SyncStatus::Completed,
            buy: SideLoadStatus::Completed,
            sell: SideLoadStatus::Completed,
        }
    );

    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41]);
    assert_eq!(ids(&book.buy_offers), vec![7, 8]);
    assert_eq!(book.buy_offer_count, Some(2));
    assert_eq!(book.sell_offer_count, Some(2));
    assert_eq!(book.initial_sync_status, SyncStatus::Completed);
    assert_eq!(book.loading_sell_offers, Some(SideLoadStatus::Completed));

    let best = &book.sell_offers[0];
    assert_eq!(best.side, OfferSide::Sell);
    assert_eq!(best.sell_token, "DAI");
    assert_eq!(best.sell_amount, dec!(10));
    assert_eq!(best.ask_price, dec!(2));
    assert_eq!(best.bid_price, dec!(0.5));
}

#[tokio::test]
async fn test_second_load_is_a_no_op() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());

    h.loader.load_pair(&pair()).await.unwrap();
    ledger.place(43, DAI, 1, ETH, 3);
    ledger.chain(DAI, ETH, &[43, 42, 41]);

    assert_eq!(
        h.loader.load_pair(&pair()).await.unwrap(),
        LoadOutcome::AlreadyLoaded
    );
    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41]);
}

#[tokio::test]
async fn test_untracked_pair_is_rejected() {
    let h = harness(seeded_ledger());
    let result = h.loader.load_pair(&TradingPair::new("MKR", "DAI")).await;
    assert!(matches!(result, Err(SyncError::UnknownPair(_))));
}

#[tokio::test]
async fn test_empty_side_completes_without_traversal() {
    let ledger = seeded_ledger();
    ledger.chain(ETH, DAI, &[]);
    let h = harness(ledger);

    h.loader.load_pair(&pair()).await.unwrap();
    let book = h.store.book_state(&pair()).await.unwrap();
    assert!(book.buy_offers.is_empty());
    assert_eq!(book.buy_offer_count, Some(0));
    assert_eq!(book.loading_buy_offers, Some(SideLoadStatus::Completed));
}

#[tokio::test]
async fn test_chain_ending_early_stops_traversal() {
    let ledger = seeded_ledger();
    ledger.set_count(DAI, ETH, 5);
    let h = harness(ledger);

    h.loader.load_pair(&pair()).await.unwrap();
    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41]);
    assert_eq!(book.loading_sell_offers, Some(SideLoadStatus::Completed));
}

#[tokio::test]
async fn test_mid_traversal_failure_keeps_partial_progress() {
    let ledger = seeded_ledger();
    ledger.place(40, DAI, 1, ETH, 4);
    ledger.chain(DAI, ETH, &[42, 41, 40]);
    ledger.fail_worse(41);
    let h = harness(ledger);

    let outcome = h.loader.load_pair(&pair()).await.unwrap();
    assert_eq!(
        outcome,
        LoadOutcome::Loaded {
            status: SyncStatus::Completed,
            buy: SideLoadStatus::Completed,
            sell: SideLoadStatus::Error,
        }
    );

    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41]);
    assert_eq!(ids(&book.buy_offers), vec![7, 8]);
    assert_eq!(book.initial_sync_status, SyncStatus::Completed);
}

#[tokio::test]
async fn test_offer_fetch_failure_marks_side_error() {
    let ledger = seeded_ledger();
    ledger.fail_offer(8);
    let h = harness(ledger);

    h.loader.load_pair(&pair()).await.unwrap();
    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.buy_offers), vec![7]);
    assert_eq!(book.loading_buy_offers, Some(SideLoadStatus::Error));
    assert_eq!(book.loading_sell_offers, Some(SideLoadStatus::Completed));
}

#[tokio::test]
async fn test_counts_failure_fails_whole_pair() {
    let ledger = seeded_ledger();
    ledger.fail_counts(true);
    let h = harness(ledger);

    let outcome = h.loader.load_pair(&pair()).await.unwrap();
    assert_eq!(
        outcome,
        LoadOutcome::Loaded {
            status: SyncStatus::Error,
            buy: SideLoadStatus::Error,
            sell: SideLoadStatus::Error,
        }
    );
    let book = h.store.book_state(&pair()).await.unwrap();
    assert!(book.sell_offers.is_empty());
    assert_eq!(book.initial_sync_status, SyncStatus::Error);
}

#[tokio::test]
async fn test_concurrent_fetches_preserve_traversal_order() {
    let ledger = seeded_ledger();
    for id in 30..36 {
        ledger.place(id, DAI, 1, ETH, 1 + id as u128);
    }
    ledger.chain(DAI, ETH, &[30, 31, 32, 33, 34, 35]);
    // Earlier offers answer last
    ledger.delay_offer(30, Duration::from_millis(40));
    ledger.delay_offer(31, Duration::from_millis(20));
    let h = harness_with_concurrency(ledger, 6);

    h.loader.load_pair(&pair()).await.unwrap();
    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![30, 31, 32, 33, 34, 35]);
}

#[tokio::test]
async fn test_stalled_fetch_times_out() {
    let ledger = seeded_ledger();
    ledger.stall_offer(41);
    let timed: Arc<dyn LedgerClient> =
        Arc::new(TimedLedgerClient::new(ledger, Duration::from_millis(50)));
    let h = harness(timed);

    let outcome = h.loader.load_pair(&pair()).await.unwrap();
    assert_eq!(
        outcome,
        LoadOutcome::Loaded {
            status: SyncStatus::Completed,
            buy: SideLoadStatus::Completed,
            sell: SideLoadStatus::Error,
        }
    );
    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42]);
}

#[tokio::test]
async fn test_offers_for_untracked_tokens_are_ignored() {
    let ledger = seeded_ledger();
    ledger.place(90, MKR, 1, DAI, 500);
    let h = harness(ledger);

    let outcome = h.syncer.reconcile(90, SyncMode::New, None).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Ignored);
    assert!(h.store.find_offer(90).await.is_none());
}

#[tokio::test]
async fn test_partial_fill_notifies_with_both_snapshots() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();
    let mut updates = h.store.subscribe();

    ledger.place(42, DAI, 4, ETH, 10);
    h.watcher
        .handle(LedgerEvent::ItemUpdated {
            id: 42,
            block_number: 101,
        })
        .await
        .unwrap();

    let offer = h.store.find_offer(42).await.unwrap();
    assert_eq!(offer.status, OfferStatus::PartiallyFilled);
    assert_eq!(offer.sell_amount, dec!(4));
    assert_eq!(offer.ask_price, dec!(2.5));
    assert_eq!(offer.bid_price, dec!(0.4));

    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41]);

    match drain_fills(&mut updates).as_slice() {
        [StoreUpdate::PartiallyFilled(fill)] => {
            assert_eq!(fill.offer_id, 42);
            assert_eq!(fill.previous.as_ref().unwrap().sell_amount, dec!(10));
            assert_eq!(fill.updated.sell_amount, dec!(4));
        }
        other => panic!("Expected one partial fill, got {:?}", other),
    }
}

#[tokio::test]
async fn test_complete_fill_removes_offer() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();
    let mut updates = h.store.subscribe();

    ledger.place(42, DAI, 0, ETH, 0);
    h.watcher
        .handle(LedgerEvent::ItemUpdated {
            id: 42,
            block_number: 101,
        })
        .await
        .unwrap();

    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![41]);
    match drain_fills(&mut updates).as_slice() {
        [StoreUpdate::CompletelyFilled(fill)] => assert_eq!(fill.offer_id, 42),
        other => panic!("Expected one complete fill, got {:?}", other),
    }
}

#[tokio::test]
async fn test_update_for_inactive_offer_is_ignored() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();

    ledger.place(42, DAI, 1, ETH, 2);
    ledger.deactivate(42);
    h.watcher
        .handle(LedgerEvent::ItemUpdated {
            id: 42,
            block_number: 101,
        })
        .await
        .unwrap();

    assert_eq!(h.store.find_offer(42).await.unwrap().sell_amount, dec!(10));
}

#[tokio::test]
async fn test_kill_removes_buy_offer_idempotently() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();

    ledger.chain(ETH, DAI, &[8]);
    h.watcher.handle(killed(7, ETH, DAI)).await.unwrap();

    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.buy_offers), vec![8]);
    assert_eq!(book.buy_offer_count, Some(1));

    h.watcher.handle(killed(7, ETH, DAI)).await.unwrap();
    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.buy_offers), vec![8]);
}

#[tokio::test]
async fn test_kill_for_untracked_pair_is_ignored() {
    let h = harness(seeded_ledger());
    h.loader.load_pair(&pair()).await.unwrap();

    h.watcher.handle(killed(99, MKR, DAI)).await.unwrap();
    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(book.buy_offers.len() + book.sell_offers.len(), 4);
}

#[tokio::test]
async fn test_duplicate_and_out_of_order_events_converge() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();

    ledger.place(43, DAI, 2, ETH, 3);
    ledger.chain(DAI, ETH, &[43, 42, 41]);

    // Update arrives before the offer's creation event, then creation twice
    h.watcher
        .handle(LedgerEvent::ItemUpdated {
            id: 43,
            block_number: 102,
        })
        .await
        .unwrap();
    for _ in 0..2 {
        h.watcher
            .handle(LedgerEvent::NewOffer {
                id: 43,
                block_number: 101,
            })
            .await
            .unwrap();
    }

    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41, 43]);
    assert_eq!(book.sell_offer_count, Some(3));
    // The first sighting came through the update path but was unseen, so it is open
    assert_eq!(
        h.store.find_offer(43).await.unwrap().status,
        OfferStatus::Open
    );
}

#[tokio::test]
async fn test_event_before_bulk_load_is_not_duplicated() {
    let ledger = seeded_ledger();
    let h = harness(ledger);

    h.watcher
        .handle(LedgerEvent::NewOffer {
            id: 42,
            block_number: 100,
        })
        .await
        .unwrap();
    assert_eq!(
        h.store.initial_sync_status(&pair()).await,
        Some(SyncStatus::Pristine)
    );

    h.loader.load_pair(&pair()).await.unwrap();
    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41]);
}

#[tokio::test]
async fn test_best_offer_ids_for_active_pair() {
    let h = harness(seeded_ledger());
    let best = h.syncer.refresh_best_offer_ids(&pair()).await.unwrap();
    assert_eq!(best.best_sell_offer_id, Some(42));
    assert_eq!(best.best_buy_offer_id, Some(7));
    assert_eq!(h.store.best_offer_ids().await, best);
}

#[tokio::test]
async fn test_watcher_routes_streamed_events_until_shutdown() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();

    ledger.place(44, DAI, 1, ETH, 5);
    ledger.chain(DAI, ETH, &[42, 41, 44]);
    ledger.chain(ETH, DAI, &[8]);
    ledger.script_events(
        EventKind::NewOffer,
        vec![LedgerEvent::NewOffer {
            id: 44,
            block_number: 105,
        }],
    );
    ledger.script_events(EventKind::OfferKilled, vec![killed(7, ETH, DAI)]);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let store = h.store.clone();
    let watcher = Arc::new(h.watcher);
    let task = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run(100, shutdown_rx).await })
    };

    let converged = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let book = store.book_state(&pair()).await.unwrap();
            if ids(&book.sell_offers) == vec![42, 41, 44] && ids(&book.buy_offers) == vec![8] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(converged.is_ok());
    assert_eq!(
        watcher.subscription_status(EventKind::NewOffer).await,
        SubscriptionStatus::Active { from_block: 100 }
    );

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap();

    let subscribed = ledger.subscriptions();
    assert_eq!(subscribed.len(), 3);
    assert!(subscribed.iter().all(|(_, block)| *block == 100));
}

#[tokio::test]
async fn test_cancellation_leaves_book_to_kill_event() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel::<TransactionRecord>();
    let tracker: Arc<dyn TransactionTracker> = Arc::new(tx);
    let coordinator = CancellationCoordinator::new(ledger.clone(), tracker, 1_000_000);

    let offer = h.store.find_offer(41).await.unwrap();
    let record = coordinator.cancel(&offer).await;
    assert!(matches!(record, TransactionRecord::Completed { offer_id: 41, .. }));
    assert_eq!(ledger.cancels(), vec![(41, 1_000_000)]);
    assert_eq!(rx.recv().await.unwrap(), record);
    assert!(h.store.find_offer(41).await.is_some());

    ledger.reject_cancel(true);
    let record = coordinator.cancel(&offer).await;
    assert!(matches!(
        record,
        TransactionRecord::Rejected {
            offer_id: 41,
            block_at_rejection: Some(100),
            ..
        }
    ));
}

#[tokio::test]
async fn test_fake_ledger_is_shared_between_clients() {
    // Sanity check of the double itself: counts follow the scripted chain
    let ledger = FakeLedger::new();
    ledger.chain(DAI, ETH, &[1, 2, 3]);
    assert_eq!(ledger.offer_count(DAI, ETH).await.unwrap(), 3);
    assert_eq!(ledger.worse_offer(3).await.unwrap(), 0);
}

#[tokio::test]
async fn test_kill_during_bulk_fetch_is_not_undone() {
    let ledger = seeded_ledger();
    // 41 is reached by the traversal but its fetch lands late
    ledger.delay_offer(41, Duration::from_millis(50));
    let h = harness(ledger.clone());
    let pair = pair();

    let (loaded, _) = tokio::join!(h.loader.load_pair(&pair), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            h.store.initial_sync_status(&pair).await,
            Some(SyncStatus::Pending)
        );
        ledger.chain(DAI, ETH, &[42]);
        h.watcher.handle(killed(41, DAI, ETH)).await.unwrap();
    });
    loaded.unwrap();

    let book = h.store.book_state(&pair).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42]);
    assert_eq!(book.sell_offer_count, Some(1));
    assert_eq!(book.initial_sync_status, SyncStatus::Completed);
}

#[tokio::test]
async fn test_update_during_bulk_fetch_keeps_newer_amounts() {
    let ledger = seeded_ledger();
    ledger.delay_offer(41, Duration::from_millis(50));
    let h = harness(ledger.clone());
    let pair = pair();

    let (loaded, _) = tokio::join!(h.loader.load_pair(&pair), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Partial fill seen live while the traversal still holds the old tuple
        ledger.delay_offer(41, Duration::ZERO);
        ledger.place(41, DAI, 2, ETH, 6);
        h.watcher
            .handle(LedgerEvent::ItemUpdated {
                id: 41,
                block_number: 101,
            })
            .await
            .unwrap();
    });
    loaded.unwrap();

    let book = h.store.book_state(&pair).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41]);
    assert_eq!(h.store.find_offer(41).await.unwrap().sell_amount, dec!(2));
}

#[tokio::test]
async fn test_best_offer_ids_refresh_after_best_offer_killed() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();
    h.syncer.refresh_best_offer_ids(&pair()).await.unwrap();
    let mut rx = h.store.subscribe();

    ledger.chain(DAI, ETH, &[41]);
    h.watcher.handle(killed(42, DAI, ETH)).await.unwrap();
    assert!(matches!(rx.recv().await.unwrap(), StoreUpdate::BookChanged(p) if p == pair()));

    // What the publisher does for the active pair on every book change
    let best = h.syncer.refresh_best_offer_ids(&pair()).await.unwrap();
    assert_eq!(best.best_sell_offer_id, Some(41));
    assert_eq!(best.best_buy_offer_id, Some(7));

    let mut announced = None;
    while let Ok(update) = rx.try_recv() {
        if let StoreUpdate::BestOfferIdsChanged(ids) = update {
            announced = Some(ids);
        }
    }
    assert_eq!(announced, Some(best));
}

#[tokio::test]
async fn test_failed_subscribe_is_recorded_and_retried() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();

    ledger.place(44, DAI, 1, ETH, 5);
    ledger.chain(DAI, ETH, &[42, 41, 44]);
    ledger.fail_subscriptions(EventKind::NewOffer, 1);
    ledger.script_events(
        EventKind::NewOffer,
        vec![LedgerEvent::NewOffer {
            id: 44,
            block_number: 105,
        }],
    );
    // Never comes up
    ledger.fail_subscriptions(EventKind::ItemUpdated, u32::MAX);

    let store = &h.store;
    let (watcher, shutdown_tx, task) = spawn_watcher(h.watcher, 100);
    let w = &*watcher;

    assert!(eventually(move || async move { store.find_offer(44).await.is_some() }).await);
    assert!(
        eventually(move || async move {
            matches!(
                w.subscription_status(EventKind::ItemUpdated).await,
                SubscriptionStatus::Failed(_)
            )
        })
        .await
    );
    assert_eq!(
        watcher.subscription_status(EventKind::NewOffer).await,
        SubscriptionStatus::Active { from_block: 100 }
    );
    assert_eq!(ledger.subscriptions_to(EventKind::NewOffer), vec![100, 100]);

    let failures = &h.syncer.metrics().subscription_failures;
    assert_eq!(failures.with_label_values(&["LogMake"]).get(), 1);
    assert!(failures.with_label_values(&["LogItemUpdate"]).get() >= 1);

    stop_watcher(shutdown_tx, task).await;
}

#[tokio::test]
async fn test_resubscribe_resumes_from_highest_block_seen() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();

    ledger.place(43, DAI, 2, ETH, 3);
    ledger.place(44, DAI, 1, ETH, 5);
    ledger.chain(DAI, ETH, &[42, 41, 44, 43]);
    // Out of order blocks, then the connection drops
    ledger.script_stream(
        EventKind::NewOffer,
        vec![
            Ok(LedgerEvent::NewOffer {
                id: 44,
                block_number: 105,
            }),
            Ok(LedgerEvent::NewOffer {
                id: 43,
                block_number: 103,
            }),
            Err(SyncError::SubscriptionFailed("connection reset".to_string())),
        ],
        false,
    );

    let (watcher, shutdown_tx, task) = spawn_watcher(h.watcher, 100);
    let w = &*watcher;
    assert!(
        eventually(move || async move {
            w.subscription_status(EventKind::NewOffer).await
                == SubscriptionStatus::Active { from_block: 105 }
        })
        .await
    );
    assert_eq!(ledger.subscriptions_to(EventKind::NewOffer), vec![100, 105]);

    let book = h.store.book_state(&pair()).await.unwrap();
    assert_eq!(ids(&book.sell_offers), vec![42, 41, 44, 43]);

    stop_watcher(shutdown_tx, task).await;
}

#[tokio::test]
async fn test_undecodable_event_is_skipped_without_resubscribing() {
    let ledger = seeded_ledger();
    let h = harness(ledger.clone());
    h.loader.load_pair(&pair()).await.unwrap();

    ledger.place(44, DAI, 1, ETH, 5);
    ledger.chain(DAI, ETH, &[42, 41, 44]);
    ledger.script_stream(
        EventKind::NewOffer,
        vec![
            Err(SyncError::ParseError("truncated LogMake data".to_string())),
            Ok(LedgerEvent::NewOffer {
                id: 44,
                block_number: 105,
            }),
        ],
        true,
    );

    let store = &h.store;
    let (watcher, shutdown_tx, task) = spawn_watcher(h.watcher, 100);
    assert!(eventually(move || async move { store.find_offer(44).await.is_some() }).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(ledger.subscriptions_to(EventKind::NewOffer), vec![100]);
    assert_eq!(
        watcher.subscription_status(EventKind::NewOffer).await,
        SubscriptionStatus::Active { from_block: 100 }
    );
    assert_eq!(
        h.syncer
            .metrics()
            .subscription_failures
            .with_label_values(&["LogMake"])
            .get(),
        0
    );

    stop_watcher(shutdown_tx, task).await;
}

#[tokio::test]
async fn test_backoff_grows_while_subscriptions_fail_empty() {
    let ledger = seeded_ledger();
    // Each subscribe succeeds, then the stream fails before any event
    ledger.break_streams(EventKind::OfferKilled);
    let h = harness(ledger.clone());

    let (watcher, shutdown_tx, task) = spawn_watcher(h.watcher, 100);
    tokio::time::sleep(Duration::from_millis(250)).await;

    // 10ms base: retries at ~20, 60 and 140ms. Without growth it would be ~12.
    let attempts = ledger.subscriptions_to(EventKind::OfferKilled).len();
    assert!((2..=6).contains(&attempts), "attempts: {}", attempts);
    assert!(matches!(
        watcher.subscription_status(EventKind::OfferKilled).await,
        SubscriptionStatus::Failed(_)
    ));

    stop_watcher(shutdown_tx, task).await;
}
