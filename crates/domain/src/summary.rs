//! Settlement planning: what a confirmed payment turns a cart into.
//!
//! The plan is computed from a snapshot of the cart lines and product rows
//! taken inside the store's atomic boundary; stores then apply it verbatim.

use chrono::{DateTime, Utc};
use common::{ProductId, TxHash};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::model::Product;

/// The on-chain facts a settlement records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedPayment {
    pub tx_hash: TxHash,
    /// Event-decoded amount; replaces the amount recorded at intent time.
    pub amount: Decimal,
    pub block_number: u64,
    pub confirmed_at: DateTime<Utc>,
}

/// A cart line joined with the current product row.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementLine {
    pub product: Product,
    pub quantity: u32,
}

/// One line of the persisted purchase summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Denormalized snapshot of what was bought, stored on the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseSummary {
    pub lines: Vec<PurchaseLine>,
    pub total_items: u32,
    pub total_usd: Decimal,
    pub token: String,
    pub token_amount: Decimal,
    pub tx_hash: TxHash,
    pub confirmed_at: DateTime<Utc>,
}

impl PurchaseSummary {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub price_at_sale: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: ProductId,
    pub quantity: u32,
    pub before: i64,
    pub after: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPlan {
    pub order_items: Vec<PlannedOrderItem>,
    pub stock_changes: Vec<StockChange>,
    pub summary: PurchaseSummary,
}

/// Plans the settlement of `lines` paid for with `payment` in `token`.
///
/// Prices are taken from the product rows as they are at confirmation time.
/// Stock is floored at zero. An empty cart produces an empty plan.
pub fn plan_settlement(
    lines: &[SettlementLine],
    token: &str,
    payment: &ConfirmedPayment,
) -> Result<SettlementPlan> {
    let mut order_items = Vec::with_capacity(lines.len());
    let mut stock_changes = Vec::with_capacity(lines.len());
    let mut purchase_lines = Vec::with_capacity(lines.len());
    let mut total_items: u32 = 0;
    let mut total_usd = Decimal::ZERO;

    for line in lines {
        if line.quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                product: line.product.name.clone(),
                quantity: 0,
            });
        }

        let unit_price = line.product.price_usd;
        let subtotal = unit_price * Decimal::from(line.quantity);

        order_items.push(PlannedOrderItem {
            product_id: line.product.id,
            quantity: line.quantity,
            price_at_sale: unit_price,
        });
        stock_changes.push(StockChange {
            product_id: line.product.id,
            quantity: line.quantity,
            before: line.product.quantity,
            after: line.product.stock_after(line.quantity),
        });
        purchase_lines.push(PurchaseLine {
            product_id: line.product.id,
            product_name: line.product.name.clone(),
            quantity: line.quantity,
            unit_price,
            subtotal,
        });

        total_items = total_items.saturating_add(line.quantity);
        total_usd += subtotal;
    }

    Ok(SettlementPlan {
        order_items,
        stock_changes,
        summary: PurchaseSummary {
            lines: purchase_lines,
            total_items,
            total_usd,
            token: token.to_ascii_uppercase(),
            token_amount: payment.amount,
            tx_hash: payment.tx_hash.clone(),
            confirmed_at: payment.confirmed_at,
        },
    })
}
