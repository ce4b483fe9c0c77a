//! Accepted payment tokens and on-chain amount scaling.

use std::collections::HashMap;

use common::ChainAddress;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Decimals of the tokens the checkout accepts, keyed by symbol.
pub const KNOWN_DECIMALS: &[(&str, u32)] = &[("USDT", 6), ("USDC", 6), ("ETH", 18), ("LINK", 18)];

/// A token accepted by the payment contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub address: ChainAddress,
    pub decimals: u32,
}

impl TokenInfo {
    pub fn new(symbol: impl Into<String>, address: ChainAddress, decimals: u32) -> Self {
        Self {
            symbol: symbol.into().to_ascii_uppercase(),
            address,
            decimals,
        }
    }

    /// Converts a raw on-chain integer amount into token units.
    pub fn scale(&self, raw: u128) -> Result<Decimal> {
        scale_amount(raw, self.decimals)
    }
}

/// Lookup table from token contract address to token metadata.
///
/// Native ETH is always registered under the zero address.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    by_address: HashMap<ChainAddress, TokenInfo>,
}

impl TokenRegistry {
    /// Creates a registry containing only native ETH.
    pub fn new() -> Self {
        let mut registry = Self {
            by_address: HashMap::new(),
        };
        registry.register(TokenInfo::new("ETH", ChainAddress::zero(), 18));
        registry
    }

    /// Registers a token, replacing any previous entry for the same address.
    pub fn register(&mut self, token: TokenInfo) {
        self.by_address.insert(token.address.clone(), token);
    }

    /// Builder-style registration of a token with known decimals.
    pub fn with_known_token(mut self, symbol: &str, address: ChainAddress) -> Result<Self> {
        let decimals = known_decimals(symbol)
            .ok_or_else(|| DomainError::UnknownToken(symbol.to_string()))?;
        self.register(TokenInfo::new(symbol, address, decimals));
        Ok(self)
    }

    pub fn by_address(&self, address: &ChainAddress) -> Option<&TokenInfo> {
        self.by_address.get(address)
    }

    /// Case-insensitive lookup by symbol.
    pub fn by_symbol(&self, symbol: &str) -> Option<&TokenInfo> {
        self.by_address
            .values()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Returns true if payments in `symbol` can be accepted.
    pub fn accepts(&self, symbol: &str) -> bool {
        self.by_symbol(symbol).is_some()
    }

    /// Resolves the token of a payment event.
    ///
    /// The contract address is authoritative. When it is not registered the
    /// event's `currency` string is used with the known decimals table, but
    /// only for symbols with no registered contract: an unknown contract
    /// claiming a registered symbol keeps its address as its symbol, so it
    /// never matches a transaction priced in the genuine token.
    pub fn resolve(&self, address: &ChainAddress, currency: &str) -> Result<TokenInfo> {
        if let Some(token) = self.by_address(address) {
            return Ok(token.clone());
        }
        let decimals = known_decimals(currency)
            .ok_or_else(|| DomainError::UnknownToken(format!("{address} ({currency})")))?;
        if self.accepts(currency) {
            return Ok(TokenInfo {
                symbol: address.to_string(),
                address: address.clone(),
                decimals,
            });
        }
        Ok(TokenInfo::new(currency, address.clone(), decimals))
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the decimals of a known token symbol.
pub fn known_decimals(symbol: &str) -> Option<u32> {
    KNOWN_DECIMALS
        .iter()
        .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
        .map(|(_, d)| *d)
}

/// Scales a raw integer amount by `10^-decimals`.
pub fn scale_amount(raw: u128, decimals: u32) -> Result<Decimal> {
    let out_of_range = || DomainError::AmountOutOfRange { raw, decimals };
    let signed = i128::try_from(raw).map_err(|_| out_of_range())?;
    Decimal::try_from_i128_with_scale(signed, decimals)
        .map(|d| d.normalize())
        .map_err(|_| out_of_range())
}
