//! Decoded `PaymentReceived` events.

use common::{ChainAddress, TransactionId, TxHash};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::token::TokenRegistry;

/// Log fields as emitted by the payment contract, before token scaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayment {
    pub transaction_id: u64,
    pub sender: ChainAddress,
    pub raw_amount: u128,
    pub token_address: ChainAddress,
    pub currency: String,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
}

impl RawPayment {
    /// Resolves the token and scales the amount into token units.
    pub fn decode(self, tokens: &TokenRegistry) -> Result<PaymentEvent> {
        let transaction_id = i64::try_from(self.transaction_id)
            .map_err(|_| DomainError::TransactionIdOutOfRange(self.transaction_id))?;
        let token = tokens.resolve(&self.token_address, &self.currency)?;
        let amount = token.scale(self.raw_amount)?;

        Ok(PaymentEvent {
            transaction_id: TransactionId::new(transaction_id),
            sender: self.sender,
            token_address: self.token_address,
            token_symbol: token.symbol,
            currency: self.currency,
            raw_amount: self.raw_amount,
            amount,
            tx_hash: self.tx_hash,
            block_number: self.block_number,
            log_index: self.log_index,
        })
    }
}

/// A payment event ready for correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub transaction_id: TransactionId,
    pub sender: ChainAddress,
    pub token_address: ChainAddress,
    /// Symbol resolved from the token address, or the currency string as
    /// fallback. Unknown contracts claiming a registered symbol carry their
    /// own address here.
    pub token_symbol: String,
    pub currency: String,
    pub raw_amount: u128,
    pub amount: Decimal,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
}

impl PaymentEvent {
    /// Position of the log on chain; lower positions win ties.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    /// True if this event was sent by `wallet` (addresses are normalized).
    pub fn is_from(&self, wallet: &ChainAddress) -> bool {
        &self.sender == wallet
    }

    pub fn pays_in(&self, token_symbol: &str) -> bool {
        self.token_symbol.eq_ignore_ascii_case(token_symbol)
    }
}
