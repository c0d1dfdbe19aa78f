//! Parser module for ledger gateway payloads
//!
//! Handles deserialization of offer tuples, scalar query responses and
//! event notifications. Ledger integers arrive either as JSON numbers,
//! decimal strings or `0x`-prefixed hex strings.

use serde::{Deserialize, Deserializer};

use crate::ledger::{BlockNumber, EventKind, LedgerEvent, OfferKilled, RawOffer};
use crate::offers::OfferId;
use crate::tokens::normalize_address;

/// Offer tuple from `GET /offers/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct OfferTuple {
    #[serde(rename = "sellAmount", deserialize_with = "deserialize_uint")]
    pub sell_amount: u128,

    #[serde(rename = "sellToken")]
    pub sell_token: String,

    #[serde(rename = "buyAmount", deserialize_with = "deserialize_uint")]
    pub buy_amount: u128,

    #[serde(rename = "buyToken")]
    pub buy_token: String,

    pub owner: String,

    #[serde(deserialize_with = "deserialize_u64")]
    pub timestamp: u64,
}

impl From<OfferTuple> for RawOffer {
    fn from(tuple: OfferTuple) -> Self {
        RawOffer {
            sell_amount: tuple.sell_amount,
            sell_token: normalize_address(&tuple.sell_token),
            buy_amount: tuple.buy_amount,
            buy_token: normalize_address(&tuple.buy_token),
            owner: normalize_address(&tuple.owner),
            timestamp: tuple.timestamp,
        }
    }
}

/// `{"id": ...}` responses (best/worse offer)
#[derive(Debug, Clone, Deserialize)]
pub struct IdResponse {
    #[serde(deserialize_with = "deserialize_u64")]
    pub id: OfferId,
}

/// `{"count": ...}` responses
#[derive(Debug, Clone, Deserialize)]
pub struct CountResponse {
    #[serde(deserialize_with = "deserialize_u64")]
    pub count: u64,
}

/// `{"active": ...}` responses
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveResponse {
    pub active: bool,
}

/// Submitted transaction
#[derive(Debug, Clone, Deserialize)]
pub struct TxResponse {
    #[serde(rename = "txHash")]
    pub tx_hash: String,
}

/// `{"number": ...}` latest block
#[derive(Debug, Clone, Deserialize)]
pub struct BlockResponse {
    #[serde(deserialize_with = "deserialize_u64")]
    pub number: BlockNumber,
}

/// Event notification envelope from the stream endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    /// Log name
    pub event: String,

    #[serde(rename = "blockNumber", deserialize_with = "deserialize_u64")]
    pub block_number: BlockNumber,

    /// Log arguments
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct IdArgs {
    #[serde(deserialize_with = "deserialize_u64")]
    id: OfferId,
}

#[derive(Debug, Clone, Deserialize)]
struct KillArgs {
    #[serde(deserialize_with = "deserialize_u64")]
    id: OfferId,
    #[serde(default)]
    pair: String,
    maker: String,
    pay_gem: String,
    buy_gem: String,
    #[serde(default, deserialize_with = "deserialize_u64")]
    timestamp: u64,
}

/// Parsed stream message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    Event(LedgerEvent),
    /// Subscription acknowledgements, heartbeats and unknown logs
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw stream message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let message = match serde_json::from_str::<EventMessage>(raw) {
            Ok(message) => message,
            Err(_) => return Ok(ParsedMessage::Unknown(raw.to_string())),
        };

        let kind = match EventKind::from_log_name(&message.event) {
            Some(kind) => kind,
            None => return Ok(ParsedMessage::Unknown(raw.to_string())),
        };

        Self::parse_event(kind, message.block_number, message.args).map(ParsedMessage::Event)
    }

    fn parse_event(
        kind: EventKind,
        block_number: BlockNumber,
        args: serde_json::Value,
    ) -> Result<LedgerEvent, serde_json::Error> {
        match kind {
            EventKind::NewOffer => {
                let args: IdArgs = serde_json::from_value(args)?;
                Ok(LedgerEvent::NewOffer {
                    id: args.id,
                    block_number,
                })
            }
            EventKind::ItemUpdated => {
                let args: IdArgs = serde_json::from_value(args)?;
                Ok(LedgerEvent::ItemUpdated {
                    id: args.id,
                    block_number,
                })
            }
            EventKind::OfferKilled => {
                let args: KillArgs = serde_json::from_value(args)?;
                Ok(LedgerEvent::OfferKilled(OfferKilled {
                    id: args.id,
                    pair: args.pair,
                    owner: normalize_address(&args.maker),
                    sell_token: normalize_address(&args.pay_gem),
                    buy_token: normalize_address(&args.buy_gem),
                    timestamp: args.timestamp,
                    block_number,
                }))
            }
        }
    }
}

/// Parse a ledger integer from a decimal or `0x` hex string
pub fn parse_uint(s: &str) -> Result<u128, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() => u128::from_str_radix(hex, 16),
        Some(_) => return Err(format!("Empty hex integer '{}'", s)),
        None => s.parse::<u128>(),
    };
    parsed.map_err(|e| format!("Invalid integer '{}': {}", s, e))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawUint {
    Number(u64),
    Text(String),
}

/// Custom deserializer for ledger integers (number, decimal or hex string)
fn deserialize_uint<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    match RawUint::deserialize(deserializer)? {
        RawUint::Number(n) => Ok(n as u128),
        RawUint::Text(s) => parse_uint(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = deserialize_uint(deserializer)?;
    u64::try_from(value).map_err(serde::de::Error::custom)
}
