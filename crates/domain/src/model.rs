//! Records held by the payment store.

use chrono::{DateTime, Utc};
use common::{CartId, ChainAddress, OrderItemId, ProductId, TransactionId, TxHash, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::status::{FulfillmentStatus, TransactionStatus};
use crate::summary::PurchaseSummary;

/// A payment intent and, once reconciled, its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// On-chain hash; absent until the wallet broadcast is reported or an event is matched.
    pub tx_hash: Option<TxHash>,
    pub wallet_address: ChainAddress,
    /// Upper-case token symbol, e.g. `USDT`.
    pub token: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub block_number: Option<u64>,
    pub cart_id: Option<CartId>,
    pub purchase_summary: Option<PurchaseSummary>,
}

impl Transaction {
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// Time elapsed since the intent was recorded.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Input for recording a new payment intent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub wallet_address: ChainAddress,
    pub token: String,
    pub amount: Decimal,
    pub tx_hash: Option<TxHash>,
}

impl NewTransaction {
    pub fn new(wallet_address: ChainAddress, token: impl Into<String>, amount: Decimal) -> Self {
        Self {
            wallet_address,
            token: token.into().to_ascii_uppercase(),
            amount,
            tx_hash: None,
        }
    }

    pub fn with_hash(mut self, hash: TxHash) -> Self {
        self.tx_hash = Some(hash);
        self
    }
}

/// A registered customer, identified by wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub wallet_address: ChainAddress,
    pub created_at: DateTime<Utc>,
}

/// A catalog product with its available stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price_usd: Decimal,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Stock left after selling `ordered` units, floored at zero.
    pub fn stock_after(&self, ordered: u32) -> i64 {
        (self.quantity - i64::from(ordered)).max(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub price_usd: Decimal,
    pub quantity: i64,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, price_usd: Decimal, quantity: i64) -> Self {
        Self {
            name: name.into(),
            price_usd,
            quantity,
        }
    }
}

/// A user's shopping cart. At most one per user is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub is_active: bool,
    /// The transaction that consumed (or is paying for) this cart.
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Immutable record of a sold line, created once at settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub transaction_id: TransactionId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub price_at_sale: Decimal,
    pub status: FulfillmentStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn subtotal(&self) -> Decimal {
        self.price_at_sale * Decimal::from(self.quantity)
    }
}
