//! Error types for the offer book synchronizer

use thiserror::Error;

use crate::offers::TradingPair;

/// Offer book synchronization errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Unknown token pair: sell {sell_token}, buy {buy_token}")]
    UnknownTokenPair { sell_token: String, buy_token: String },

    #[error("Trading pair {0} is not tracked")]
    UnknownPair(TradingPair),

    #[error("Ledger call failed: {0}")]
    LedgerCallFailed(String),

    #[error("Event subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Cancellation of offer {offer_id} rejected: {reason}")]
    CancellationRejected { offer_id: u64, reason: String },

    #[error("Ledger call {operation} timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    #[error("Failed to parse ledger payload: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SyncError {
    /// Whether the error came from the ledger side (failed call or timeout)
    pub fn is_ledger_failure(&self) -> bool {
        matches!(
            self,
            SyncError::LedgerCallFailed(_) | SyncError::Timeout { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::SubscriptionFailed(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::LedgerCallFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::IpcError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
