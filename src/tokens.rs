//! Token directory
//!
//! Maps ledger token addresses to symbols and precisions, and resolves which
//! tracked trading pair and side an offer belongs to.

use std::collections::HashMap;

use crate::error::{Result, SyncError};
use crate::numeric::MAX_TOKEN_DECIMALS;
use crate::offers::{OfferSide, TradingPair};

/// A token known to the directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub symbol: String,
    /// Lowercased ledger address
    pub address: String,
    pub decimals: u32,
}

impl Token {
    pub fn new(symbol: &str, address: &str, decimals: u32) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            address: normalize_address(address),
            decimals,
        }
    }
}

/// Canonical placement of an offer: its pair, side and resolved tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairResolution {
    pub pair: TradingPair,
    pub side: OfferSide,
    pub sell_token: Token,
    pub buy_token: Token,
}

/// Address/symbol lookup over the configured tokens and trading pairs
#[derive(Debug, Clone, Default)]
pub struct TokenDirectory {
    by_address: HashMap<String, Token>,
    by_symbol: HashMap<String, Token>,
    pairs: Vec<TradingPair>,
}

impl TokenDirectory {
    /// Build a directory; every pair must reference known symbols
    pub fn new(tokens: Vec<Token>, pairs: Vec<TradingPair>) -> Result<Self> {
        let mut directory = Self::default();

        for token in tokens {
            if token.decimals > MAX_TOKEN_DECIMALS {
                return Err(SyncError::ConfigError(format!(
                    "Token {} precision {} exceeds {}",
                    token.symbol, token.decimals, MAX_TOKEN_DECIMALS
                )));
            }
            directory
                .by_address
                .insert(token.address.clone(), token.clone());
            directory.by_symbol.insert(token.symbol.clone(), token);
        }

        for pair in &pairs {
            for symbol in [&pair.base_token, &pair.quote_token] {
                if !directory.by_symbol.contains_key(symbol) {
                    return Err(SyncError::ConfigError(format!(
                        "Trading pair {} references unknown token {}",
                        pair, symbol
                    )));
                }
            }
        }
        directory.pairs = pairs;

        Ok(directory)
    }

    /// Parse `SYMBOL:address:decimals` entries separated by commas
    pub fn parse_tokens(spec: &str) -> Result<Vec<Token>> {
        spec.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
                match parts.as_slice() {
                    [symbol, address, decimals] if !symbol.is_empty() && !address.is_empty() => {
                        let decimals = decimals.parse::<u32>().map_err(|e| {
                            SyncError::ConfigError(format!(
                                "Invalid decimals for {}: {}",
                                symbol, e
                            ))
                        })?;
                        Ok(Token::new(symbol, address, decimals))
                    }
                    _ => Err(SyncError::ConfigError(format!(
                        "Invalid token entry '{}', expected SYMBOL:address:decimals",
                        entry
                    ))),
                }
            })
            .collect()
    }

    pub fn token_by_address(&self, address: &str) -> Option<&Token> {
        self.by_address.get(&normalize_address(address))
    }

    pub fn token_by_symbol(&self, symbol: &str) -> Option<&Token> {
        self.by_symbol.get(&symbol.to_uppercase())
    }

    /// Ledger address for a symbol
    pub fn address_of(&self, symbol: &str) -> Result<&str> {
        self.token_by_symbol(symbol)
            .map(|t| t.address.as_str())
            .ok_or_else(|| SyncError::ConfigError(format!("Unknown token symbol {}", symbol)))
    }

    /// Tracked trading pairs
    pub fn pairs(&self) -> &[TradingPair] {
        &self.pairs
    }

    pub fn is_tracked(&self, pair: &TradingPair) -> bool {
        self.pairs.contains(pair)
    }

    /// Place an offer selling `sell_address` for `buy_address`.
    ///
    /// Selling base for quote is a SELL offer, selling quote for base a BUY
    /// offer. Returns `None` when either token is unknown or the tokens do not
    /// form a tracked pair in either orientation.
    pub fn resolve(&self, sell_address: &str, buy_address: &str) -> Option<PairResolution> {
        let sell_token = self.token_by_address(sell_address)?;
        let buy_token = self.token_by_address(buy_address)?;

        self.pairs.iter().find_map(|pair| {
            let side = if pair.base_token == sell_token.symbol && pair.quote_token == buy_token.symbol
            {
                OfferSide::Sell
            } else if pair.base_token == buy_token.symbol && pair.quote_token == sell_token.symbol {
                OfferSide::Buy
            } else {
                return None;
            };
            Some(PairResolution {
                pair: pair.clone(),
                side,
                sell_token: sell_token.clone(),
                buy_token: buy_token.clone(),
            })
        })
    }
}

/// Lowercase and trim an address for lookups
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}
