//! Hex-encoded chain identifiers: account/contract addresses and transaction hashes.
//!
//! Both types are normalized to lower case on construction, so equality is
//! case-insensitive: `0xABC…` and `0xabc…` are the same address.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing a malformed hex identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexIdError {
    #[error("missing 0x prefix: {0}")]
    MissingPrefix(String),

    #[error("expected {expected} hex digits, got {actual}: {value}")]
    WrongLength {
        value: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid hex digit in {0}")]
    InvalidDigit(String),
}

fn normalize(raw: &str, digits: usize) -> Result<String, HexIdError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| HexIdError::MissingPrefix(trimmed.to_string()))?;

    if body.len() != digits {
        return Err(HexIdError::WrongLength {
            value: trimmed.to_string(),
            expected: digits,
            actual: body.len(),
        });
    }
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(HexIdError::InvalidDigit(trimmed.to_string()));
    }

    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

/// A 20-byte EVM address (wallet or token contract).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainAddress(String);

impl ChainAddress {
    /// The zero address, used by the payment contract to denote native ETH.
    pub const ZERO: &'static str = "0x0000000000000000000000000000000000000000";

    /// Parses and normalizes an address.
    pub fn parse(raw: &str) -> Result<Self, HexIdError> {
        normalize(raw, 40).map(Self)
    }

    /// Returns the zero address.
    pub fn zero() -> Self {
        Self(Self::ZERO.to_string())
    }

    /// Returns the lower-case `0x`-prefixed representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO
    }
}

impl std::fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ChainAddress {
    type Err = HexIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChainAddress {
    type Error = HexIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChainAddress> for String {
    fn from(address: ChainAddress) -> Self {
        address.0
    }
}

/// A 32-byte transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    /// Parses and normalizes a transaction hash.
    pub fn parse(raw: &str) -> Result<Self, HexIdError> {
        normalize(raw, 64).map(Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TxHash {
    type Err = HexIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TxHash {
    type Error = HexIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(hash: TxHash) -> Self {
        hash.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "0xAbCdEf0123456789aBcDeF0123456789ABCDEF01";

    #[test]
    fn address_comparison_ignores_case() {
        let upper = ChainAddress::parse(MIXED).unwrap();
        let lower = ChainAddress::parse(&MIXED.to_lowercase()).unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), MIXED.to_lowercase());
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = ChainAddress::parse("0xabc").unwrap_err();
        assert!(matches!(err, HexIdError::WrongLength { actual: 3, .. }));
    }

    #[test]
    fn address_rejects_missing_prefix() {
        let err = ChainAddress::parse(&MIXED[2..]).unwrap_err();
        assert!(matches!(err, HexIdError::MissingPrefix(_)));
    }

    #[test]
    fn address_rejects_non_hex() {
        let bad = format!("0x{}", "z".repeat(40));
        assert!(matches!(
            ChainAddress::parse(&bad),
            Err(HexIdError::InvalidDigit(_))
        ));
    }

    #[test]
    fn zero_address_is_recognized() {
        assert!(ChainAddress::zero().is_zero());
        assert!(!ChainAddress::parse(MIXED).unwrap().is_zero());
    }

    #[test]
    fn tx_hash_requires_64_digits() {
        let ok = format!("0x{}", "AB".repeat(32));
        assert_eq!(TxHash::parse(&ok).unwrap().as_str(), ok.to_lowercase());
        assert!(TxHash::parse("0x1234").is_err());
    }

    #[test]
    fn address_deserialization_validates() {
        let parsed: Result<ChainAddress, _> = serde_json::from_str("\"0x12\"");
        assert!(parsed.is_err());
        let parsed: ChainAddress = serde_json::from_str(&format!("\"{MIXED}\"")).unwrap();
        assert_eq!(parsed.as_str(), MIXED.to_lowercase());
    }
}
