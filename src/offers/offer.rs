//! Offer entity and price derivation

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OfferId, OfferSide, TradingPair};
use crate::error::Result;
use crate::ledger::RawOffer;
use crate::numeric::{self, RoundingPolicy};
use crate::tokens::PairResolution;

/// Precision and rounding used for price sort keys
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriceRounding {
    pub display_precision: u32,
    pub policy: RoundingPolicy,
}

impl PriceRounding {
    pub fn new(display_precision: u32, policy: RoundingPolicy) -> Self {
        Self {
            display_precision,
            policy,
        }
    }

    /// Rounded sort key for a price
    pub fn sort_key(&self, price: Decimal) -> Decimal {
        self.policy
            .round(price, numeric::sort_precision(self.display_precision))
    }
}

/// Lifecycle marker for an offer held in the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    Open,
    PartiallyFilled,
}

/// A standing ledger offer, normalized for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub owner: String,
    pub pair: TradingPair,
    pub side: OfferSide,
    pub status: OfferStatus,
    pub sell_token: String,
    pub sell_token_address: String,
    pub sell_amount: Decimal,
    pub buy_token: String,
    pub buy_token_address: String,
    pub buy_amount: Decimal,
    /// Lossy float views used by UI filters
    pub sell_amount_filter: f64,
    pub buy_amount_filter: f64,
    /// buy_amount / sell_amount
    pub ask_price: Decimal,
    /// sell_amount / buy_amount
    pub bid_price: Decimal,
    pub ask_price_sort: Decimal,
    pub bid_price_sort: Decimal,
    pub timestamp: u64,
}

impl Offer {
    /// Build an offer from its raw ledger tuple and resolved placement
    pub fn from_ledger(
        id: OfferId,
        raw: &RawOffer,
        resolution: &PairResolution,
        rounding: &PriceRounding,
    ) -> Result<Self> {
        let sell_amount = numeric::normalize(raw.sell_amount, resolution.sell_token.decimals)?;
        let buy_amount = numeric::normalize(raw.buy_amount, resolution.buy_token.decimals)?;

        // Zero amounts leave the affected price at zero; such offers never reach a side
        let ask_price = buy_amount
            .checked_div(sell_amount)
            .unwrap_or(Decimal::ZERO);
        let bid_price = sell_amount
            .checked_div(buy_amount)
            .unwrap_or(Decimal::ZERO);

        Ok(Self {
            id,
            owner: raw.owner.clone(),
            pair: resolution.pair.clone(),
            side: resolution.side,
            status: OfferStatus::Open,
            sell_token: resolution.sell_token.symbol.clone(),
            sell_token_address: resolution.sell_token.address.clone(),
            sell_amount,
            buy_token: resolution.buy_token.symbol.clone(),
            buy_token_address: resolution.buy_token.address.clone(),
            buy_amount,
            sell_amount_filter: sell_amount.to_f64().unwrap_or_default(),
            buy_amount_filter: buy_amount.to_f64().unwrap_or_default(),
            ask_price,
            bid_price,
            ask_price_sort: rounding.sort_key(ask_price),
            bid_price_sort: rounding.sort_key(bid_price),
            timestamp: raw.timestamp,
        })
    }

    /// True once nothing is left to sell
    pub fn is_filled(&self) -> bool {
        self.sell_amount.is_zero()
    }

    pub fn with_status(mut self, status: OfferStatus) -> Self {
        self.status = status;
        self
    }
}
