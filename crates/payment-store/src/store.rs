use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, ChainAddress, ProductId, TransactionId, TxHash, UserId};
use domain::{
    Cart, CartItem, ConfirmedPayment, NewProduct, NewTransaction, OrderItem, Product, Transaction,
    UserProfile,
};

use crate::{Result, TransactionQuery};

/// Result of a settlement attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// The transaction moved to confirmed and its cart became order items.
    Settled {
        transaction: Transaction,
        order_items: Vec<OrderItem>,
    },

    /// The transaction was already confirmed; nothing changed.
    AlreadyConfirmed(Transaction),

    /// The transaction is failed; nothing changed.
    NotPending(Transaction),
}

impl SettlementOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            SettlementOutcome::Settled { transaction, .. } => transaction,
            SettlementOutcome::AlreadyConfirmed(transaction) => transaction,
            SettlementOutcome::NotPending(transaction) => transaction,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementOutcome::Settled { .. })
    }
}

/// Result of a conditional pending to failed transition.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    Failed(Transaction),
    /// Status was no longer pending; nothing changed.
    NotPending(Transaction),
}

impl FailOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            FailOutcome::Failed(transaction) | FailOutcome::NotPending(transaction) => transaction,
        }
    }
}

/// Core trait for payment store implementations.
///
/// Every operation that changes a transaction's status or materializes
/// order items is atomic: either all of its writes land or none do.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Returns the profile for `wallet`, creating it on first use.
    async fn upsert_user(&self, wallet: &ChainAddress) -> Result<UserProfile>;

    async fn get_user_by_wallet(&self, wallet: &ChainAddress) -> Result<Option<UserProfile>>;

    async fn create_product(&self, product: NewProduct) -> Result<Product>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Replaces the items of the user's active cart, creating the cart if
    /// the user has none.
    async fn save_cart(&self, user_id: UserId, items: &[(ProductId, u32)]) -> Result<Cart>;

    async fn get_active_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    async fn get_cart(&self, id: CartId) -> Result<Option<Cart>>;

    async fn get_cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>>;

    /// Records a pending transaction and links the paying user's active cart.
    ///
    /// Fails with `DuplicateHash` if the hash is already recorded.
    async fn insert_transaction(&self, transaction: NewTransaction) -> Result<Transaction>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>>;

    async fn get_transaction_by_hash(&self, hash: &TxHash) -> Result<Option<Transaction>>;

    /// Looks up a transaction by id and wallet, regardless of status.
    async fn find_transaction(
        &self,
        id: TransactionId,
        wallet: &ChainAddress,
    ) -> Result<Option<Transaction>>;

    async fn query_transactions(&self, query: TransactionQuery) -> Result<Vec<Transaction>>;

    /// Attaches a broadcast hash to a pending transaction.
    ///
    /// Attaching the hash the transaction already carries is a no-op.
    async fn attach_hash(&self, id: TransactionId, hash: &TxHash) -> Result<Transaction>;

    /// Moves a transaction from pending to failed, if it is still pending.
    async fn mark_failed(&self, id: TransactionId) -> Result<FailOutcome>;

    /// Confirms a pending transaction and converts its cart into order items.
    ///
    /// Re-checks the status under the store's lock; a confirmed transaction
    /// yields `AlreadyConfirmed` and is left untouched.
    async fn settle(&self, id: TransactionId, payment: ConfirmedPayment)
    -> Result<SettlementOutcome>;

    async fn get_order_items(&self, transaction_id: TransactionId) -> Result<Vec<OrderItem>>;
}

/// Extension trait providing convenience queries for payment stores.
#[async_trait]
pub trait PaymentStoreExt: PaymentStore {
    /// Pending transactions created more than `age` before `now`.
    async fn get_pending_older_than(
        &self,
        age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        self.query_transactions(TransactionQuery::pending_before(now - age))
            .await
    }

    async fn get_transactions_by_wallet(&self, wallet: &ChainAddress) -> Result<Vec<Transaction>> {
        self.query_transactions(TransactionQuery::for_wallet(wallet.clone()))
            .await
    }

    async fn transaction_exists(&self, id: TransactionId) -> Result<bool> {
        Ok(self.get_transaction(id).await?.is_some())
    }
}

// Blanket implementation for all PaymentStore implementations
impl<T: PaymentStore + ?Sized> PaymentStoreExt for T {}

/// Validates cart lines and merges repeated products.
pub(crate) fn merge_cart_items(items: &[(ProductId, u32)]) -> Result<Vec<(ProductId, u32)>> {
    let mut merged: BTreeMap<ProductId, u32> = BTreeMap::new();
    for (product_id, quantity) in items {
        if *quantity == 0 {
            return Err(domain::DomainError::InvalidQuantity {
                product: product_id.to_string(),
                quantity: 0,
            }
            .into());
        }
        let line = merged.entry(*product_id).or_default();
        *line = line.saturating_add(*quantity);
    }
    Ok(merged.into_iter().collect())
}
