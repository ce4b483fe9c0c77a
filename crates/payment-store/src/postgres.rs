use async_trait::async_trait;
use common::{CartId, ChainAddress, OrderItemId, ProductId, TransactionId, TxHash, UserId};
use domain::{
    Cart, CartItem, ConfirmedPayment, NewProduct, NewTransaction, OrderItem, Product,
    SettlementLine, Transaction, TransactionStatus, UserProfile, plan_settlement,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};

use crate::{
    Result, StoreError, TransactionQuery,
    store::{FailOutcome, PaymentStore, SettlementOutcome, merge_cart_items},
};

const TRANSACTION_COLUMNS: &str = r#"
    t.id, t.tx_hash, t.wallet_address, t.token, t.amount, t.status, t.created_at,
    t.confirmed_at, t.block_number, t.purchase_summary,
    (SELECT c.id FROM carts c WHERE c.transaction_id = t.id ORDER BY c.id DESC LIMIT 1) AS cart_id
"#;

const CART_COLUMNS: &str = "id, user_id, is_active, transaction_id, created_at, updated_at";

const ORDER_ITEM_COLUMNS: &str =
    "id, transaction_id, product_id, quantity, price_at_sale, status, created_at";

/// PostgreSQL-backed payment store implementation.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Creates a new PostgreSQL payment store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_transaction(row: PgRow) -> Result<Transaction> {
        let tx_hash: Option<String> = row.try_get("tx_hash")?;
        let wallet: String = row.try_get("wallet_address")?;
        let status: String = row.try_get("status")?;
        let block_number: Option<i64> = row.try_get("block_number")?;
        let summary: Option<serde_json::Value> = row.try_get("purchase_summary")?;

        Ok(Transaction {
            id: TransactionId::new(row.try_get("id")?),
            tx_hash: tx_hash.as_deref().map(TxHash::parse).transpose()?,
            wallet_address: ChainAddress::parse(&wallet)?,
            token: row.try_get("token")?,
            amount: row.try_get("amount")?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            confirmed_at: row.try_get("confirmed_at")?,
            block_number: block_number.map(from_db_block).transpose()?,
            cart_id: row.try_get::<Option<i64>, _>("cart_id")?.map(CartId::new),
            purchase_summary: summary.map(serde_json::from_value).transpose()?,
        })
    }

    fn row_to_user(row: PgRow) -> Result<UserProfile> {
        let wallet: String = row.try_get("wallet_address")?;
        Ok(UserProfile {
            id: UserId::new(row.try_get("id")?),
            wallet_address: ChainAddress::parse(&wallet)?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            price_usd: row.try_get("price_usd")?,
            quantity: row.try_get("quantity")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_cart(row: PgRow) -> Result<Cart> {
        Ok(Cart {
            id: CartId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            is_active: row.try_get("is_active")?,
            transaction_id: row
                .try_get::<Option<i64>, _>("transaction_id")?
                .map(TransactionId::new),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_order_item(row: PgRow) -> Result<OrderItem> {
        let status: String = row.try_get("status")?;
        Ok(OrderItem {
            id: OrderItemId::new(row.try_get("id")?),
            transaction_id: TransactionId::new(row.try_get("transaction_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: from_db_quantity(row.try_get("quantity")?)?,
            price_at_sale: row.try_get("price_at_sale")?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn fetch_transaction<'e, E>(executor: E, id: TransactionId) -> Result<Option<Transaction>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(executor)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn hash_owner<'e, E>(executor: E, hash: &TxHash) -> Result<Option<TransactionId>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let owner: Option<i64> = sqlx::query_scalar("SELECT id FROM transactions WHERE tx_hash = $1")
            .bind(hash.as_str())
            .fetch_optional(executor)
            .await?;
        Ok(owner.map(TransactionId::new))
    }
}

fn from_db_block(block: i64) -> Result<u64> {
    u64::try_from(block).map_err(|_| StoreError::OutOfRange(format!("block number {block}")))
}

fn to_db_block(block: u64) -> Result<i64> {
    i64::try_from(block).map_err(|_| StoreError::OutOfRange(format!("block number {block}")))
}

fn from_db_quantity(quantity: i32) -> Result<u32> {
    u32::try_from(quantity).map_err(|_| StoreError::OutOfRange(format!("quantity {quantity}")))
}

fn to_db_quantity(quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StoreError::OutOfRange(format!("quantity {quantity}")))
}

/// Maps a unique violation on the hash column to `DuplicateHash`.
fn map_hash_conflict(err: sqlx::Error, hash: Option<&TxHash>) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_unique_violation()
        && db_err.constraint() == Some("transactions_tx_hash_key")
        && let Some(hash) = hash
    {
        return StoreError::DuplicateHash {
            hash: hash.clone(),
            owner: None,
        };
    }
    StoreError::Database(err)
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn upsert_user(&self, wallet: &ChainAddress) -> Result<UserProfile> {
        let row = sqlx::query(
            r#"
            INSERT INTO user_profiles (wallet_address)
            VALUES ($1)
            ON CONFLICT (wallet_address) DO UPDATE SET wallet_address = EXCLUDED.wallet_address
            RETURNING id, wallet_address, created_at
            "#,
        )
        .bind(wallet.as_str())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_user(row)
    }

    async fn get_user_by_wallet(&self, wallet: &ChainAddress) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT id, wallet_address, created_at FROM user_profiles WHERE wallet_address = $1",
        )
        .bind(wallet.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        if product.quantity < 0 {
            return Err(domain::DomainError::InvalidQuantity {
                product: product.name,
                quantity: product.quantity,
            }
            .into());
        }

        let row = sqlx::query(
            r#"
            INSERT INTO products (name, price_usd, quantity)
            VALUES ($1, $2, $3)
            RETURNING id, name, price_usd, quantity, created_at
            "#,
        )
        .bind(&product.name)
        .bind(product.price_usd)
        .bind(product.quantity)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_product(row)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, price_usd, quantity, created_at FROM products WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn save_cart(&self, user_id: UserId, items: &[(ProductId, u32)]) -> Result<Cart> {
        let items = merge_cart_items(items)?;
        let mut tx = self.pool.begin().await?;

        let user_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_profiles WHERE id = $1)")
                .bind(user_id.as_i64())
                .fetch_one(&mut *tx)
                .await?;
        if !user_exists {
            return Err(StoreError::UserNotFound(user_id));
        }

        for (product_id, _) in &items {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
                    .bind(product_id.as_i64())
                    .fetch_one(&mut *tx)
                    .await?;
            if !exists {
                return Err(StoreError::ProductNotFound(*product_id));
            }
        }

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM carts WHERE user_id = $1 AND is_active FOR UPDATE",
        )
        .bind(user_id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let cart_id = match existing {
            Some(id) => id,
            None => {
                sqlx::query_scalar("INSERT INTO carts (user_id) VALUES ($1) RETURNING id")
                    .bind(user_id.as_i64())
                    .fetch_one(&mut *tx)
                    .await?
            }
        };

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *tx)
            .await?;

        for (product_id, quantity) in &items {
            sqlx::query("INSERT INTO cart_items (cart_id, product_id, quantity) VALUES ($1, $2, $3)")
                .bind(cart_id)
                .bind(product_id.as_i64())
                .bind(to_db_quantity(*quantity)?)
                .execute(&mut *tx)
                .await?;
        }

        let row = sqlx::query(&format!(
            "UPDATE carts SET updated_at = NOW() WHERE id = $1 RETURNING {CART_COLUMNS}"
        ))
        .bind(cart_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Self::row_to_cart(row)
    }

    async fn get_active_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        let row = sqlx::query(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1 AND is_active"
        ))
        .bind(user_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_cart).transpose()
    }

    async fn get_cart(&self, id: CartId) -> Result<Option<Cart>> {
        let row = sqlx::query(&format!("SELECT {CART_COLUMNS} FROM carts WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_cart).transpose()
    }

    async fn get_cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(
            "SELECT product_id, quantity FROM cart_items WHERE cart_id = $1 ORDER BY product_id",
        )
        .bind(cart_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(CartItem {
                    cart_id,
                    product_id: ProductId::new(row.try_get("product_id")?),
                    quantity: from_db_quantity(row.try_get("quantity")?)?,
                })
            })
            .collect()
    }

    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction> {
        if let Some(hash) = &new.tx_hash
            && let Some(owner) = Self::hash_owner(&self.pool, hash).await?
        {
            return Err(StoreError::DuplicateHash {
                hash: hash.clone(),
                owner: Some(owner),
            });
        }

        let mut tx = self.pool.begin().await?;

        // Lock the active cart so concurrent intents cannot both claim it
        let cart: Option<(i64, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT c.id, c.transaction_id
            FROM carts c
            JOIN user_profiles u ON u.id = c.user_id
            WHERE c.is_active AND u.wallet_address = $1
            FOR UPDATE OF c
            "#,
        )
        .bind(new.wallet_address.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((cart_id, Some(owner))) = cart {
            let status: Option<String> =
                sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1")
                    .bind(owner)
                    .fetch_optional(&mut *tx)
                    .await?;
            if status.as_deref() == Some(TransactionStatus::Pending.as_str()) {
                return Err(StoreError::CartInUse {
                    cart: CartId::new(cart_id),
                    transaction: TransactionId::new(owner),
                });
            }
        }

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO transactions (tx_hash, wallet_address, token, amount, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(new.tx_hash.as_ref().map(TxHash::as_str))
        .bind(new.wallet_address.as_str())
        .bind(&new.token)
        .bind(new.amount)
        .bind(TransactionStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_hash_conflict(e, new.tx_hash.as_ref()))?;

        if let Some((cart_id, _)) = cart {
            sqlx::query("UPDATE carts SET transaction_id = $1, updated_at = NOW() WHERE id = $2")
                .bind(id)
                .bind(cart_id)
                .execute(&mut *tx)
                .await?;
        }

        let transaction = Self::fetch_transaction(&mut *tx, TransactionId::new(id))
            .await?
            .ok_or(StoreError::TransactionNotFound(TransactionId::new(id)))?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Self::fetch_transaction(&self.pool, id).await
    }

    async fn get_transaction_by_hash(&self, hash: &TxHash) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.tx_hash = $1"
        ))
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn find_transaction(
        &self,
        id: TransactionId,
        wallet: &ChainAddress,
    ) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE t.id = $1 AND t.wallet_address = $2"
        ))
        .bind(id.as_i64())
        .bind(wallet.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }

    async fn query_transactions(&self, query: TransactionQuery) -> Result<Vec<Transaction>> {
        let mut sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.wallet_address.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.wallet_address = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.status = ${param_count}"));
        }
        if query.tx_hash.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.tx_hash = ${param_count}"));
        }
        if query.created_after.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.created_at >= ${param_count}"));
        }
        if query.created_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND t.created_at < ${param_count}"));
        }

        sql.push_str(" ORDER BY t.created_at ASC, t.id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(wallet) = &query.wallet_address {
            sqlx_query = sqlx_query.bind(wallet.as_str());
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(hash) = &query.tx_hash {
            sqlx_query = sqlx_query.bind(hash.as_str());
        }
        if let Some(after) = query.created_after {
            sqlx_query = sqlx_query.bind(after);
        }
        if let Some(before) = query.created_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn attach_hash(&self, id: TransactionId, hash: &TxHash) -> Result<Transaction> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, tx_hash FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(id.as_i64())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::TransactionNotFound(id))?;

        let status: TransactionStatus = row.try_get::<String, _>("status")?.parse()?;
        let existing: Option<String> = row.try_get("tx_hash")?;

        if !status.is_mutable() {
            return Err(StoreError::NotPending { id, status });
        }
        if let Some(existing) = existing.as_deref().map(TxHash::parse).transpose()? {
            if &existing != hash {
                return Err(StoreError::HashAlreadySet { id, existing });
            }
        } else {
            if let Some(owner) = Self::hash_owner(&mut *tx, hash).await? {
                return Err(StoreError::DuplicateHash {
                    hash: hash.clone(),
                    owner: Some(owner),
                });
            }

            sqlx::query("UPDATE transactions SET tx_hash = $1 WHERE id = $2")
                .bind(hash.as_str())
                .bind(id.as_i64())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_hash_conflict(e, Some(hash)))?;
        }

        let transaction = Self::fetch_transaction(&mut *tx, id)
            .await?
            .ok_or(StoreError::TransactionNotFound(id))?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn mark_failed(&self, id: TransactionId) -> Result<FailOutcome> {
        let updated = sqlx::query(
            "UPDATE transactions SET status = $1 WHERE id = $2 AND status = $3",
        )
        .bind(TransactionStatus::Failed.as_str())
        .bind(id.as_i64())
        .bind(TransactionStatus::Pending.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let transaction = Self::fetch_transaction(&self.pool, id)
            .await?
            .ok_or(StoreError::TransactionNotFound(id))?;

        if updated == 1 {
            Ok(FailOutcome::Failed(transaction))
        } else {
            Ok(FailOutcome::NotPending(transaction))
        }
    }

    #[tracing::instrument(skip(self, payment), fields(tx_hash = %payment.tx_hash))]
    async fn settle(
        &self,
        id: TransactionId,
        payment: ConfirmedPayment,
    ) -> Result<SettlementOutcome> {
        let mut tx = self.pool.begin().await?;

        // Lock the row, then re-check the status under the lock
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM transactions WHERE id = $1 FOR UPDATE")
                .bind(id.as_i64())
                .fetch_optional(&mut *tx)
                .await?;
        let status: TransactionStatus = status.ok_or(StoreError::TransactionNotFound(id))?.parse()?;

        if status != TransactionStatus::Pending {
            let current = Self::fetch_transaction(&mut *tx, id)
                .await?
                .ok_or(StoreError::TransactionNotFound(id))?;
            tx.rollback().await?;
            return Ok(match status {
                TransactionStatus::Confirmed => SettlementOutcome::AlreadyConfirmed(current),
                _ => SettlementOutcome::NotPending(current),
            });
        }

        if let Some(owner) = Self::hash_owner(&mut *tx, &payment.tx_hash).await?
            && owner != id
        {
            return Err(StoreError::DuplicateHash {
                hash: payment.tx_hash,
                owner: Some(owner),
            });
        }

        let token: String = sqlx::query_scalar("SELECT token FROM transactions WHERE id = $1")
            .bind(id.as_i64())
            .fetch_one(&mut *tx)
            .await?;

        let cart_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM carts
            WHERE transaction_id = $1 AND is_active
            ORDER BY id DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let mut lines = Vec::new();
        if let Some(cart_id) = cart_id {
            let rows = sqlx::query(
                r#"
                SELECT ci.quantity AS line_quantity,
                       p.id, p.name, p.price_usd, p.quantity, p.created_at
                FROM cart_items ci
                JOIN products p ON p.id = ci.product_id
                WHERE ci.cart_id = $1
                ORDER BY p.id
                FOR UPDATE OF p
                "#,
            )
            .bind(cart_id)
            .fetch_all(&mut *tx)
            .await?;

            for row in rows {
                let quantity = from_db_quantity(row.try_get("line_quantity")?)?;
                lines.push(SettlementLine {
                    product: Self::row_to_product(row)?,
                    quantity,
                });
            }
        }

        let plan = plan_settlement(&lines, &token, &payment)?;

        let mut order_items = Vec::with_capacity(plan.order_items.len());
        for planned in &plan.order_items {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO order_items (transaction_id, product_id, quantity, price_at_sale, created_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING {ORDER_ITEM_COLUMNS}
                "#
            ))
            .bind(id.as_i64())
            .bind(planned.product_id.as_i64())
            .bind(to_db_quantity(planned.quantity)?)
            .bind(planned.price_at_sale)
            .bind(payment.confirmed_at)
            .fetch_one(&mut *tx)
            .await?;
            order_items.push(Self::row_to_order_item(row)?);
        }

        for change in &plan.stock_changes {
            sqlx::query("UPDATE products SET quantity = GREATEST(quantity - $1, 0) WHERE id = $2")
                .bind(i64::from(change.quantity))
                .bind(change.product_id.as_i64())
                .execute(&mut *tx)
                .await?;
        }

        if let Some(cart_id) = cart_id {
            sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
                .bind(cart_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE carts SET is_active = FALSE, updated_at = $2 WHERE id = $1")
                .bind(cart_id)
                .bind(payment.confirmed_at)
                .execute(&mut *tx)
                .await?;
        }

        let summary = serde_json::to_value(&plan.summary)?;
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1, tx_hash = $2, amount = $3, confirmed_at = $4,
                block_number = $5, purchase_summary = $6
            WHERE id = $7
            "#,
        )
        .bind(status.transition_to(TransactionStatus::Confirmed)?.as_str())
        .bind(payment.tx_hash.as_str())
        .bind(payment.amount)
        .bind(payment.confirmed_at)
        .bind(to_db_block(payment.block_number)?)
        .bind(summary)
        .bind(id.as_i64())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_hash_conflict(e, Some(&payment.tx_hash)))?;

        let transaction = Self::fetch_transaction(&mut *tx, id)
            .await?
            .ok_or(StoreError::TransactionNotFound(id))?;

        tx.commit().await?;

        tracing::debug!(
            transaction_id = %id,
            order_items = order_items.len(),
            "Settlement committed"
        );

        Ok(SettlementOutcome::Settled {
            transaction,
            order_items,
        })
    }

    async fn get_order_items(&self, transaction_id: TransactionId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE transaction_id = $1 ORDER BY id"
        ))
        .bind(transaction_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order_item).collect()
    }
}
