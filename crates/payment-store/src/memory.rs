use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, ChainAddress, OrderItemId, ProductId, TransactionId, TxHash, UserId};
use domain::{
    Cart, CartItem, ConfirmedPayment, FulfillmentStatus, NewProduct, NewTransaction, OrderItem,
    Product, SettlementLine, Transaction, TransactionStatus, UserProfile, plan_settlement,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError, TransactionQuery,
    store::{FailOutcome, PaymentStore, SettlementOutcome, merge_cart_items},
};

#[derive(Debug, Clone, Default)]
struct State {
    last_id: i64,
    users: BTreeMap<UserId, UserProfile>,
    products: BTreeMap<ProductId, Product>,
    carts: BTreeMap<CartId, Cart>,
    cart_items: BTreeMap<CartId, Vec<CartItem>>,
    transactions: BTreeMap<TransactionId, Transaction>,
    order_items: Vec<OrderItem>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn user_by_wallet(&self, wallet: &ChainAddress) -> Option<&UserProfile> {
        self.users.values().find(|u| &u.wallet_address == wallet)
    }

    fn active_cart_id(&self, user_id: UserId) -> Option<CartId> {
        self.carts
            .values()
            .find(|c| c.user_id == user_id && c.is_active)
            .map(|c| c.id)
    }

    /// The most recent cart pointing at `id`.
    fn linked_cart(&self, id: TransactionId) -> Option<&Cart> {
        self.carts
            .values()
            .filter(|c| c.transaction_id == Some(id))
            .max_by_key(|c| c.id)
    }

    fn hash_owner(&self, hash: &TxHash) -> Option<TransactionId> {
        self.transactions
            .values()
            .find(|t| t.tx_hash.as_ref() == Some(hash))
            .map(|t| t.id)
    }

    /// Returns the transaction with its cart link resolved.
    fn view(&self, transaction: &Transaction) -> Transaction {
        let mut view = transaction.clone();
        view.cart_id = self.linked_cart(transaction.id).map(|c| c.id);
        view
    }

    fn view_by_id(&self, id: TransactionId) -> Result<Transaction> {
        self.transactions
            .get(&id)
            .map(|t| self.view(t))
            .ok_or(StoreError::TransactionNotFound(id))
    }
}

/// In-memory payment store implementation for testing and local runs.
///
/// Mutating operations take a single write lock, so each one is atomic with
/// respect to every other operation. Settlement builds the new state on a
/// copy and swaps it in only when every step succeeded.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<State>>,
    fail_next_settlement: Arc<AtomicBool>,
}

impl InMemoryPaymentStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next settlement fail after all of its writes were staged.
    pub fn fail_next_settlement(&self) {
        self.fail_next_settlement.store(true, Ordering::SeqCst);
    }

    /// Overrides the creation time of a transaction.
    pub async fn backdate_transaction(
        &self,
        id: TransactionId,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let transaction = state
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound(id))?;
        transaction.created_at = created_at;
        Ok(())
    }

    /// Returns the total number of order items stored.
    pub async fn order_item_count(&self) -> usize {
        self.state.read().await.order_items.len()
    }

    /// Clears all records.
    pub async fn clear(&self) {
        *self.state.write().await = State::default();
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn upsert_user(&self, wallet: &ChainAddress) -> Result<UserProfile> {
        let mut state = self.state.write().await;
        if let Some(user) = state.user_by_wallet(wallet) {
            return Ok(user.clone());
        }

        let user = UserProfile {
            id: UserId::new(state.next_id()),
            wallet_address: wallet.clone(),
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user_by_wallet(&self, wallet: &ChainAddress) -> Result<Option<UserProfile>> {
        Ok(self.state.read().await.user_by_wallet(wallet).cloned())
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        if product.quantity < 0 {
            return Err(domain::DomainError::InvalidQuantity {
                product: product.name,
                quantity: product.quantity,
            }
            .into());
        }

        let mut state = self.state.write().await;
        let product = Product {
            id: ProductId::new(state.next_id()),
            name: product.name,
            price_usd: product.price_usd,
            quantity: product.quantity,
            created_at: Utc::now(),
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn save_cart(&self, user_id: UserId, items: &[(ProductId, u32)]) -> Result<Cart> {
        let items = merge_cart_items(items)?;
        let mut state = self.state.write().await;

        if !state.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound(user_id));
        }
        if let Some((missing, _)) = items
            .iter()
            .find(|(product_id, _)| !state.products.contains_key(product_id))
        {
            return Err(StoreError::ProductNotFound(*missing));
        }

        let now = Utc::now();
        let cart_id = match state.active_cart_id(user_id) {
            Some(id) => id,
            None => {
                let cart = Cart {
                    id: CartId::new(state.next_id()),
                    user_id,
                    is_active: true,
                    transaction_id: None,
                    created_at: now,
                    updated_at: now,
                };
                let id = cart.id;
                state.carts.insert(id, cart);
                id
            }
        };

        let lines = items
            .into_iter()
            .map(|(product_id, quantity)| CartItem {
                cart_id,
                product_id,
                quantity,
            })
            .collect();
        state.cart_items.insert(cart_id, lines);

        let cart = state
            .carts
            .get_mut(&cart_id)
            .ok_or_else(|| StoreError::Unavailable(format!("cart {cart_id} vanished")))?;
        cart.updated_at = now;
        Ok(cart.clone())
    }

    async fn get_active_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let state = self.state.read().await;
        Ok(state
            .active_cart_id(user_id)
            .and_then(|id| state.carts.get(&id))
            .cloned())
    }

    async fn get_cart(&self, id: CartId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&id).cloned())
    }

    async fn get_cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>> {
        Ok(self
            .state
            .read()
            .await
            .cart_items
            .get(&cart_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction> {
        let mut state = self.state.write().await;

        if let Some(hash) = &new.tx_hash
            && let Some(owner) = state.hash_owner(hash)
        {
            return Err(StoreError::DuplicateHash {
                hash: hash.clone(),
                owner: Some(owner),
            });
        }

        let cart_id = state
            .user_by_wallet(&new.wallet_address)
            .map(|u| u.id)
            .and_then(|user_id| state.active_cart_id(user_id));
        if let Some(cart_id) = cart_id
            && let Some(owner) = state.carts.get(&cart_id).and_then(|c| c.transaction_id)
            && state.transactions.get(&owner).is_some_and(|t| t.is_pending())
        {
            return Err(StoreError::CartInUse {
                cart: cart_id,
                transaction: owner,
            });
        }

        let transaction = Transaction {
            id: TransactionId::new(state.next_id()),
            tx_hash: new.tx_hash,
            wallet_address: new.wallet_address,
            token: new.token,
            amount: new.amount,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
            confirmed_at: None,
            block_number: None,
            cart_id: None,
            purchase_summary: None,
        };
        let id = transaction.id;

        if let Some(cart_id) = cart_id
            && let Some(cart) = state.carts.get_mut(&cart_id)
        {
            cart.transaction_id = Some(id);
            cart.updated_at = transaction.created_at;
        }

        state.transactions.insert(id, transaction);
        state.view_by_id(id)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(&id).map(|t| state.view(t)))
    }

    async fn get_transaction_by_hash(&self, hash: &TxHash) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .find(|t| t.tx_hash.as_ref() == Some(hash))
            .map(|t| state.view(t)))
    }

    async fn find_transaction(
        &self,
        id: TransactionId,
        wallet: &ChainAddress,
    ) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .get(&id)
            .filter(|t| &t.wallet_address == wallet)
            .map(|t| state.view(t)))
    }

    async fn query_transactions(&self, query: TransactionQuery) -> Result<Vec<Transaction>> {
        let state = self.state.read().await;
        let mut transactions: Vec<_> = state
            .transactions
            .values()
            .filter(|t| {
                if let Some(ref wallet) = query.wallet_address
                    && &t.wallet_address != wallet
                {
                    return false;
                }
                if let Some(status) = query.status
                    && t.status != status
                {
                    return false;
                }
                if let Some(ref hash) = query.tx_hash
                    && t.tx_hash.as_ref() != Some(hash)
                {
                    return false;
                }
                if let Some(after) = query.created_after
                    && t.created_at < after
                {
                    return false;
                }
                if let Some(before) = query.created_before
                    && t.created_at >= before
                {
                    return false;
                }
                true
            })
            .map(|t| state.view(t))
            .collect();

        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(transactions.into_iter().skip(offset).take(limit).collect())
    }

    async fn attach_hash(&self, id: TransactionId, hash: &TxHash) -> Result<Transaction> {
        let mut state = self.state.write().await;
        let current = state
            .transactions
            .get(&id)
            .ok_or(StoreError::TransactionNotFound(id))?;

        if !current.status.is_mutable() {
            return Err(StoreError::NotPending {
                id,
                status: current.status,
            });
        }
        match &current.tx_hash {
            Some(existing) if existing == hash => return state.view_by_id(id),
            Some(existing) => {
                return Err(StoreError::HashAlreadySet {
                    id,
                    existing: existing.clone(),
                });
            }
            None => {}
        }
        if let Some(owner) = state.hash_owner(hash) {
            return Err(StoreError::DuplicateHash {
                hash: hash.clone(),
                owner: Some(owner),
            });
        }

        if let Some(transaction) = state.transactions.get_mut(&id) {
            transaction.tx_hash = Some(hash.clone());
        }
        state.view_by_id(id)
    }

    async fn mark_failed(&self, id: TransactionId) -> Result<FailOutcome> {
        let mut state = self.state.write().await;
        let transaction = state
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound(id))?;

        if !transaction.status.can_fail() {
            return Ok(FailOutcome::NotPending(state.view_by_id(id)?));
        }
        transaction.status = transaction
            .status
            .transition_to(TransactionStatus::Failed)?;
        Ok(FailOutcome::Failed(state.view_by_id(id)?))
    }

    async fn settle(
        &self,
        id: TransactionId,
        payment: ConfirmedPayment,
    ) -> Result<SettlementOutcome> {
        let mut state = self.state.write().await;
        let current = state.view_by_id(id)?;

        match current.status {
            TransactionStatus::Confirmed => return Ok(SettlementOutcome::AlreadyConfirmed(current)),
            TransactionStatus::Failed => return Ok(SettlementOutcome::NotPending(current)),
            TransactionStatus::Pending => {}
        }
        if let Some(owner) = state.hash_owner(&payment.tx_hash)
            && owner != id
        {
            return Err(StoreError::DuplicateHash {
                hash: payment.tx_hash,
                owner: Some(owner),
            });
        }

        let mut next = State::clone(&state);

        let cart_id = next.linked_cart(id).filter(|c| c.is_active).map(|c| c.id);
        let lines = match cart_id {
            Some(cart_id) => next
                .cart_items
                .get(&cart_id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .map(|item| {
                    let product = next
                        .products
                        .get(&item.product_id)
                        .cloned()
                        .ok_or(StoreError::ProductNotFound(item.product_id))?;
                    Ok(SettlementLine {
                        product,
                        quantity: item.quantity,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let plan = plan_settlement(&lines, &current.token, &payment)?;
        let now = payment.confirmed_at;

        let mut order_items = Vec::with_capacity(plan.order_items.len());
        for planned in plan.order_items {
            let item = OrderItem {
                id: OrderItemId::new(next.next_id()),
                transaction_id: id,
                product_id: planned.product_id,
                quantity: planned.quantity,
                price_at_sale: planned.price_at_sale,
                status: FulfillmentStatus::Pending,
                created_at: now,
            };
            next.order_items.push(item.clone());
            order_items.push(item);
        }

        for change in &plan.stock_changes {
            if let Some(product) = next.products.get_mut(&change.product_id) {
                product.quantity = product.stock_after(change.quantity);
            }
        }

        if let Some(cart_id) = cart_id {
            next.cart_items.remove(&cart_id);
            if let Some(cart) = next.carts.get_mut(&cart_id) {
                cart.is_active = false;
                cart.updated_at = now;
            }
        }

        let transaction = next
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound(id))?;
        transaction.status = transaction
            .status
            .transition_to(TransactionStatus::Confirmed)?;
        transaction.tx_hash = Some(payment.tx_hash);
        transaction.amount = payment.amount;
        transaction.confirmed_at = Some(now);
        transaction.block_number = Some(payment.block_number);
        transaction.purchase_summary = Some(plan.summary);

        if self.fail_next_settlement.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected settlement failure".to_string(),
            ));
        }

        let transaction = next.view_by_id(id)?;
        *state = next;
        Ok(SettlementOutcome::Settled {
            transaction,
            order_items,
        })
    }

    async fn get_order_items(&self, transaction_id: TransactionId) -> Result<Vec<OrderItem>> {
        let state = self.state.read().await;
        Ok(state
            .order_items
            .iter()
            .filter(|item| item.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}
