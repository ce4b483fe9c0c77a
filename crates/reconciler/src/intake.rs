//! Inbound API for recording payment intents and reading their state.

use chrono::Utc;
use common::{ChainAddress, TransactionId, TxHash};
use domain::{NewTransaction, OrderItem, TokenRegistry, Transaction};
use payment_store::{PaymentStore, PaymentStoreExt, StoreError};
use rust_decimal::Decimal;

use crate::error::IntakeError;

type Result<T> = std::result::Result<T, IntakeError>;

/// Validating front of the payment store for the checkout flow.
///
/// Inputs arrive as strings from the wallet; every identifier is parsed and
/// normalized before it reaches the store.
pub struct PaymentIntake<S: PaymentStore> {
    store: S,
    tokens: TokenRegistry,
}

impl<S: PaymentStore> PaymentIntake<S> {
    pub fn new(store: S, tokens: TokenRegistry) -> Self {
        Self { store, tokens }
    }

    /// Records a pending payment intent for `wallet` and links the wallet's
    /// active cart to it. Fails with [`IntakeError::CartInUse`] while that
    /// cart is still awaiting payment by an earlier intent.
    #[tracing::instrument(skip(self))]
    pub async fn register_pending_transaction(
        &self,
        wallet: &str,
        amount: Decimal,
        token: &str,
    ) -> Result<TransactionId> {
        let wallet = ChainAddress::parse(wallet).map_err(IntakeError::InvalidAddress)?;
        if amount <= Decimal::ZERO {
            return Err(IntakeError::InvalidAmount(amount));
        }
        let token = self
            .tokens
            .by_symbol(token)
            .ok_or_else(|| IntakeError::UnsupportedToken(token.to_string()))?
            .symbol
            .clone();

        self.store.upsert_user(&wallet).await?;
        let transaction = self
            .store
            .insert_transaction(NewTransaction::new(wallet, token, amount))
            .await
            .map_err(|e| match e {
                StoreError::CartInUse { cart, transaction } => IntakeError::CartInUse {
                    cart,
                    pending: transaction,
                },
                other => IntakeError::Store(other),
            })?;

        tracing::info!(transaction_id = %transaction.id, cart_id = ?transaction.cart_id, "Payment intent registered");
        Ok(transaction.id)
    }

    /// Attaches the hash the wallet broadcast to a pending transaction.
    #[tracing::instrument(skip(self))]
    pub async fn update_transaction(
        &self,
        id: TransactionId,
        wallet: &str,
        hash: &str,
    ) -> Result<Transaction> {
        let wallet = ChainAddress::parse(wallet).map_err(IntakeError::InvalidAddress)?;
        let hash = TxHash::parse(hash).map_err(IntakeError::InvalidHash)?;

        let transaction = self
            .store
            .get_transaction(id)
            .await?
            .ok_or(IntakeError::NotFound(id))?;
        if transaction.wallet_address != wallet {
            return Err(IntakeError::AddressMismatch(id));
        }
        if !transaction.is_pending() {
            return Err(IntakeError::NotPending {
                id,
                status: transaction.status,
            });
        }

        self.store.attach_hash(id, &hash).await.map_err(|e| match e {
            StoreError::DuplicateHash { hash, .. } => IntakeError::HashConflict { id, hash },
            StoreError::HashAlreadySet { .. } => IntakeError::HashConflict {
                id,
                hash: hash.clone(),
            },
            StoreError::NotPending { id, status } => IntakeError::NotPending { id, status },
            other => IntakeError::Store(other),
        })
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
        let hash = TxHash::parse(hash).map_err(IntakeError::InvalidHash)?;
        Ok(self.store.get_transaction_by_hash(&hash).await?)
    }

    pub async fn get_by_wallet(&self, wallet: &str) -> Result<Vec<Transaction>> {
        let wallet = ChainAddress::parse(wallet).map_err(IntakeError::InvalidAddress)?;
        Ok(self.store.get_transactions_by_wallet(&wallet).await?)
    }

    pub async fn get_pending_older_than(&self, age: chrono::Duration) -> Result<Vec<Transaction>> {
        Ok(self.store.get_pending_older_than(age, Utc::now()).await?)
    }

    pub async fn order_items(&self, id: TransactionId) -> Result<Vec<OrderItem>> {
        Ok(self.store.get_order_items(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use domain::{NewProduct, TransactionStatus};
    use payment_store::InMemoryPaymentStore;

    use super::*;

    const WALLET: &str = "0xAbC0000000000000000000000000000000000042";

    fn intake() -> PaymentIntake<InMemoryPaymentStore> {
        let usdt = ChainAddress::parse("0xdAC17F958D2ee523a2206206994597C13D831ec7").unwrap();
        let tokens = TokenRegistry::new().with_known_token("USDT", usdt).unwrap();
        PaymentIntake::new(InMemoryPaymentStore::new(), tokens)
    }

    fn hash(digit: char) -> String {
        format!("0x{}", digit.to_string().repeat(64))
    }

    #[tokio::test]
    async fn registers_normalized_intent() {
        let intake = intake();
        let id = intake
            .register_pending_transaction(WALLET, Decimal::from(100), "usdt")
            .await
            .unwrap();

        let found = intake.get_by_wallet(&WALLET.to_lowercase()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].token, "USDT");
        assert_eq!(found[0].status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn rejects_malformed_input() {
        let intake = intake();
        assert!(matches!(
            intake.register_pending_transaction("0x123", Decimal::ONE, "USDT").await,
            Err(IntakeError::InvalidAddress(_))
        ));
        assert!(matches!(
            intake.register_pending_transaction(WALLET, Decimal::ZERO, "USDT").await,
            Err(IntakeError::InvalidAmount(_))
        ));
        assert!(matches!(
            intake.register_pending_transaction(WALLET, Decimal::ONE, "DOGE").await,
            Err(IntakeError::UnsupportedToken(_))
        ));
    }

    #[tokio::test]
    async fn update_transaction_validates_owner_and_hash() {
        let intake = intake();
        let id = intake
            .register_pending_transaction(WALLET, Decimal::ONE, "ETH")
            .await
            .unwrap();

        assert!(matches!(
            intake.update_transaction(id, WALLET, "0xnothex").await,
            Err(IntakeError::InvalidHash(_))
        ));
        assert!(matches!(
            intake
                .update_transaction(id, "0x0000000000000000000000000000000000000001", &hash('a'))
                .await,
            Err(IntakeError::AddressMismatch(_))
        ));
        assert!(matches!(
            intake.update_transaction(TransactionId::new(999), WALLET, &hash('a')).await,
            Err(IntakeError::NotFound(_))
        ));

        let updated = intake.update_transaction(id, WALLET, &hash('a')).await.unwrap();
        assert_eq!(updated.tx_hash.unwrap().as_str(), hash('a'));
        assert!(intake.get_by_hash(&hash('a')).await.unwrap().is_some());

        assert!(matches!(
            intake.update_transaction(id, WALLET, &hash('b')).await,
            Err(IntakeError::HashConflict { .. })
        ));
    }

    #[tokio::test]
    async fn hash_owned_by_another_transaction_conflicts() {
        let intake = intake();
        let first = intake
            .register_pending_transaction(WALLET, Decimal::ONE, "ETH")
            .await
            .unwrap();
        let second = intake
            .register_pending_transaction(WALLET, Decimal::ONE, "ETH")
            .await
            .unwrap();

        intake.update_transaction(first, WALLET, &hash('c')).await.unwrap();
        assert!(matches!(
            intake.update_transaction(second, WALLET, &hash('c')).await,
            Err(IntakeError::HashConflict { .. })
        ));
    }

    #[tokio::test]
    async fn second_intent_for_a_pending_cart_is_rejected() {
        let store = InMemoryPaymentStore::new();
        let intake = PaymentIntake::new(store.clone(), TokenRegistry::new());
        let wallet = ChainAddress::parse(WALLET).unwrap();
        let user = store.upsert_user(&wallet).await.unwrap();
        let mug = store
            .create_product(NewProduct::new("Mug", Decimal::ONE, 3))
            .await
            .unwrap();
        let cart = store.save_cart(user.id, &[(mug.id, 1)]).await.unwrap();

        let first = intake
            .register_pending_transaction(WALLET, Decimal::ONE, "ETH")
            .await
            .unwrap();
        let second = intake
            .register_pending_transaction(WALLET, Decimal::ONE, "ETH")
            .await;

        assert!(matches!(
            second,
            Err(IntakeError::CartInUse { cart: c, pending }) if c == cart.id && pending == first
        ));
        assert_eq!(intake.get_by_wallet(WALLET).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_transaction_rejects_updates() {
        let store = InMemoryPaymentStore::new();
        let intake = PaymentIntake::new(store.clone(), TokenRegistry::new());
        let id = intake
            .register_pending_transaction(WALLET, Decimal::ONE, "ETH")
            .await
            .unwrap();
        store.mark_failed(id).await.unwrap();

        assert!(matches!(
            intake.update_transaction(id, WALLET, &hash('d')).await,
            Err(IntakeError::NotPending { .. })
        ));
    }
}
