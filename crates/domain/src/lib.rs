//! Domain layer for the payment reconciler.
//!
//! This crate provides the rules shared by the store and the reconciliation
//! engine:
//! - Transaction status machine (pending, confirmed, failed)
//! - Accepted tokens and on-chain amount scaling
//! - Decoded payment events
//! - Settlement planning (order items, stock, purchase summary)

pub mod error;
pub mod event;
pub mod model;
pub mod status;
pub mod summary;
pub mod token;

pub use error::DomainError;
pub use event::{PaymentEvent, RawPayment};
pub use model::{
    Cart, CartItem, NewProduct, NewTransaction, OrderItem, Product, Transaction, UserProfile,
};
pub use status::{FulfillmentStatus, TransactionStatus};
pub use summary::{
    ConfirmedPayment, PlannedOrderItem, PurchaseLine, PurchaseSummary, SettlementLine,
    SettlementPlan, StockChange, plan_settlement,
};
pub use token::{TokenInfo, TokenRegistry, known_decimals, scale_amount};
