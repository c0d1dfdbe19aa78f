//! Offer Book Sync
//!
//! Mirrors an on-chain offer ledger into a local offer book per trading pair,
//! publishes book snapshots to other system components and serves them over HTTP.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offer_book_sync::ledger::EventFilter;
use offer_book_sync::offers::OfferId;
use offer_book_sync::sync::{TransactionRecord, TransactionTracker};
use offer_book_sync::{
    AppState, BulkLoader, CancellationCoordinator, Config, EventWatcher, HttpLedgerClient,
    LedgerClient, OfferBookStore, OfferSyncer, Publisher, StoreUpdate, SyncMetrics,
    TimedLedgerClient,
};

/// State behind the HTTP surface
struct ServerState {
    app: Arc<AppState>,
    cancellations: Arc<CancellationCoordinator>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Offer Book Sync");

    let config = Arc::new(Config::load()?);
    info!(pairs = ?config.trading_pairs, active_pair = ?config.active_pair, "Configuration loaded");

    let tokens = Arc::new(config.token_directory()?);
    let ledger: Arc<dyn LedgerClient> = Arc::new(TimedLedgerClient::new(
        Arc::new(HttpLedgerClient::new(
            &config.ledger_rpc_endpoint,
            &config.ledger_ws_endpoint,
        )),
        config.ledger_call_timeout(),
    ));

    let store = Arc::new(OfferBookStore::new(&config.trading_pairs));
    let metrics = SyncMetrics::new();
    metrics.register(prometheus::default_registry())?;

    let publisher = Arc::new(Publisher::new(&config.ipc_socket_path).await?);

    let state = Arc::new(AppState {
        store: store.clone(),
        publisher: publisher.clone(),
        config: config.clone(),
        metrics: metrics.clone(),
    });

    let syncer = Arc::new(OfferSyncer::new(
        ledger.clone(),
        store.clone(),
        tokens,
        config.price_rounding(),
        metrics,
    ));

    // Transaction outcomes are only logged here
    let (tracker_tx, mut tracker_rx) = mpsc::unbounded_channel::<TransactionRecord>();
    let tracker: Arc<dyn TransactionTracker> = Arc::new(tracker_tx);
    tokio::spawn(async move {
        while let Some(record) = tracker_rx.recv().await {
            info!(offer_id = record.offer_id(), record = ?record, "Transaction recorded");
        }
    });
    let cancellations = Arc::new(CancellationCoordinator::new(
        ledger.clone(),
        tracker,
        config.cancel_gas,
    ));

    // Publish every changed book; active pair changes also move the best ids
    let publish_state = state.clone();
    let best_ids_syncer = syncer.clone();
    let active_pair = config.active_pair.clone();
    let mut updates = store.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(StoreUpdate::BookChanged(pair)) => {
                    if let Some(book) = publish_state.store.book_state(&pair).await {
                        publish_state.metrics.observe_book(&book);
                        if let Err(e) = publish_state.publisher.publish(&book).await {
                            warn!(pair = %pair, error = %e, "Failed to publish offer book");
                        }
                    }
                    if active_pair.as_ref() == Some(&pair) {
                        if let Err(e) = best_ids_syncer.refresh_best_offer_ids(&pair).await {
                            warn!(pair = %pair, error = %e, "Failed to refresh best offer ids");
                        }
                    }
                }
                Ok(StoreUpdate::PartiallyFilled(fill)) => {
                    info!(offer_id = fill.offer_id, pair = %fill.pair, side = %fill.side, "Offer partially filled");
                }
                Ok(StoreUpdate::CompletelyFilled(fill)) => {
                    info!(offer_id = fill.offer_id, pair = %fill.pair, side = %fill.side, "Offer completely filled");
                }
                Ok(StoreUpdate::BestOfferIdsChanged(ids)) => {
                    info!(best_buy = ?ids.best_buy_offer_id, best_sell = ?ids.best_sell_offer_id, "Best offer ids updated");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Publisher lagged behind store updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let health_state = Arc::new(ServerState {
        app: state.clone(),
        cancellations,
    });
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    // Subscribe before loading so nothing between the two is missed
    let from_block = ledger.latest_block().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = Arc::new(EventWatcher::new(
        syncer.clone(),
        EventFilter::default(),
        config.reconnect_delay(),
    ));
    let watcher_task = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run(from_block, shutdown_rx).await })
    };

    let loader = BulkLoader::new(syncer.clone(), config.bulk_load_concurrency);
    for pair in &config.trading_pairs {
        match loader.load_pair(pair).await {
            Ok(outcome) => info!(pair = %pair, outcome = ?outcome, "Trading pair loaded"),
            Err(e) => error!(pair = %pair, error = %e, "Trading pair load failed"),
        }
    }

    if let Some(pair) = &config.active_pair {
        if let Err(e) = syncer.refresh_best_offer_ids(pair).await {
            warn!(pair = %pair, error = %e, "Failed to fetch best offer ids");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    watcher_task.await?;

    Ok(())
}

/// Start HTTP server for health checks, metrics and book queries
async fn start_health_server(state: Arc<ServerState>) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/books", get(books))
        .route("/offers/:id/cancel", post(cancel_offer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.app.config.health_port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "offer-book-sync",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> Result<String, StatusCode> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn books(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    let books = state.app.store.all_states().await;
    let best = state.app.store.best_offer_ids().await;
    Json(serde_json::json!({
        "books": books,
        "best_offer_ids": best,
    }))
}

async fn cancel_offer(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<OfferId>,
) -> Result<Json<TransactionRecord>, StatusCode> {
    let offer = state
        .app
        .store
        .find_offer(id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(state.cancellations.cancel(&offer).await))
}
