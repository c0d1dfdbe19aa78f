//! Configuration module for the offer book synchronizer

use std::env;
use std::time::Duration;

use crate::error::SyncError;
use crate::numeric::RoundingPolicy;
use crate::offers::{PriceRounding, TradingPair};
use crate::tokens::{Token, TokenDirectory};

const DEFAULT_TOKENS: &str = "WETH:0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2:18,\
DAI:0x6b175474e89094c44da98b954eedeac495271d0f:18";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Ledger gateway HTTP endpoint
    pub ledger_rpc_endpoint: String,

    /// Ledger gateway event stream endpoint
    pub ledger_ws_endpoint: String,

    /// Tokens in `SYMBOL:address:decimals` form
    pub tokens: String,

    /// Trading pairs to mirror
    pub trading_pairs: Vec<TradingPair>,

    /// Pair whose best offer ids are tracked
    pub active_pair: Option<TradingPair>,

    /// Display precision; sort keys use at least five places
    pub display_precision: u32,
    pub price_rounding: RoundingPolicy,

    /// Deadline for any single ledger call
    pub ledger_call_timeout_ms: u64,

    /// In-flight offer fetches per side during bulk load
    pub bulk_load_concurrency: usize,

    /// Gas limit for cancellation transactions
    pub cancel_gas: u64,

    /// Base delay before resubscribing; doubles per failure up to one minute
    pub reconnect_delay_ms: u64,

    /// IPC socket path for publishing book state
    pub ipc_socket_path: String,

    /// Port of the health/metrics server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let trading_pairs = match env::var("TRADING_PAIRS") {
            Ok(raw) => parse_pairs(&raw)?,
            Err(_) => defaults.trading_pairs,
        };
        let active_pair = match env::var("ACTIVE_PAIR") {
            Ok(raw) => Some(raw.parse::<TradingPair>()?),
            Err(_) => trading_pairs.first().cloned(),
        };
        let price_rounding = match env::var("PRICE_ROUNDING") {
            Ok(raw) => raw.parse::<RoundingPolicy>()?,
            Err(_) => defaults.price_rounding,
        };

        let config = Self {
            ledger_rpc_endpoint: env::var("LEDGER_RPC_ENDPOINT")
                .unwrap_or(defaults.ledger_rpc_endpoint),
            ledger_ws_endpoint: env::var("LEDGER_WS_ENDPOINT")
                .unwrap_or(defaults.ledger_ws_endpoint),
            tokens: env::var("TOKENS").unwrap_or(defaults.tokens),
            trading_pairs,
            active_pair,
            display_precision: parse_env("DISPLAY_PRECISION", defaults.display_precision),
            price_rounding,
            ledger_call_timeout_ms: parse_env(
                "LEDGER_CALL_TIMEOUT_MS",
                defaults.ledger_call_timeout_ms,
            ),
            bulk_load_concurrency: parse_env(
                "BULK_LOAD_CONCURRENCY",
                defaults.bulk_load_concurrency,
            )
            .max(1),
            cancel_gas: parse_env("CANCEL_GAS", defaults.cancel_gas),
            reconnect_delay_ms: parse_env("RECONNECT_DELAY_MS", defaults.reconnect_delay_ms),
            ipc_socket_path: env::var("IPC_SOCKET_PATH").unwrap_or(defaults.ipc_socket_path),
            health_port: parse_env("HEALTH_PORT", defaults.health_port),
        };

        // Fail early on token/pair mismatches
        config.token_directory()?;
        Ok(config)
    }

    /// Build the token directory for the configured tokens and pairs
    pub fn token_directory(&self) -> Result<TokenDirectory, SyncError> {
        let tokens: Vec<Token> = TokenDirectory::parse_tokens(&self.tokens)?;
        TokenDirectory::new(tokens, self.trading_pairs.clone())
    }

    pub fn price_rounding(&self) -> PriceRounding {
        PriceRounding::new(self.display_precision, self.price_rounding)
    }

    pub fn ledger_call_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_call_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger_rpc_endpoint: "http://localhost:8545/gateway".to_string(),
            ledger_ws_endpoint: "ws://localhost:8546/gateway".to_string(),
            tokens: DEFAULT_TOKENS.to_string(),
            trading_pairs: vec![TradingPair::new("WETH", "DAI")],
            active_pair: Some(TradingPair::new("WETH", "DAI")),
            display_precision: 2,
            price_rounding: RoundingPolicy::HalfUp,
            ledger_call_timeout_ms: 10_000,
            bulk_load_concurrency: 8,
            cancel_gas: 1_000_000,
            reconnect_delay_ms: 1000,
            ipc_socket_path: "/tmp/offer-book-sync.sock".to_string(),
            health_port: 9090,
        }
    }
}

/// Parse a comma separated `BASE/QUOTE` list
pub fn parse_pairs(raw: &str) -> Result<Vec<TradingPair>, SyncError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<TradingPair>)
        .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
