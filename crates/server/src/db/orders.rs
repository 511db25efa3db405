//! `PostgreSQL` implementation of [`OrderStore`].
//!
//! Queries are built at runtime with `sqlx::query`/`query_as` so the crate
//! builds without a live database or an offline query cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderline_core::{DeliveryInfo, Item, Order, OrderUid, Payment};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument, warn};

use super::{OrderStore, RepositoryError};

const INSERT_ORDER: &str = r"
    INSERT INTO orders (
        order_uid, track_number, entry, locale, internal_signature,
        customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
";

const INSERT_DELIVERY: &str = r"
    INSERT INTO delivery_info (
        order_uid, name, phone, zip, city, address, region, email
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
";

const INSERT_PAYMENT: &str = r"
    INSERT INTO payments (
        transaction_uid, request_id, currency, provider, amount,
        payment_dt, bank, delivery_cost, goods_total, custom_fee
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
";

const INSERT_ITEM: &str = r"
    INSERT INTO items (
        order_uid, chrt_id, track_number, price, rid, name,
        sale, size, total_price, nm_id, brand, status
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
";

/// Order header columns.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    track_number: String,
    entry: String,
    locale: String,
    internal_signature: String,
    customer_id: String,
    delivery_service: String,
    shardkey: String,
    sm_id: i64,
    date_created: DateTime<Utc>,
    oof_shard: String,
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    name: String,
    phone: String,
    zip: String,
    city: String,
    address: String,
    region: String,
    email: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    request_id: i64,
    currency: String,
    provider: String,
    amount: i64,
    payment_dt: i64,
    bank: String,
    delivery_cost: i64,
    goods_total: i64,
    custom_fee: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    chrt_id: i64,
    track_number: String,
    price: i64,
    rid: String,
    name: String,
    sale: i32,
    size: String,
    total_price: i64,
    nm_id: i64,
    brand: String,
    status: i32,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Self {
            chrt_id: row.chrt_id,
            track_number: row.track_number,
            price: row.price,
            rid: row.rid,
            name: row.name,
            sale: row.sale,
            size: row.size,
            total_price: row.total_price,
            nm_id: row.nm_id,
            brand: row.brand,
            status: row.status,
        }
    }
}

/// Order store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a new store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_children(
        tx: &mut Transaction<'_, Postgres>,
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let delivery = &order.delivery;
        sqlx::query(INSERT_DELIVERY)
            .bind(&order.order_uid)
            .bind(&delivery.name)
            .bind(&delivery.phone)
            .bind(&delivery.zip)
            .bind(&delivery.city)
            .bind(&delivery.address)
            .bind(&delivery.region)
            .bind(&delivery.email)
            .execute(&mut **tx)
            .await?;

        let payment = &order.payment;
        sqlx::query(INSERT_PAYMENT)
            .bind(&payment.transaction)
            .bind(payment.request_id)
            .bind(&payment.currency)
            .bind(&payment.provider)
            .bind(payment.amount)
            .bind(payment.payment_dt)
            .bind(&payment.bank)
            .bind(payment.delivery_cost)
            .bind(payment.goods_total)
            .bind(payment.custom_fee)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_insert_error(e, &order.order_uid))?;

        for (index, item) in order.items.iter().enumerate() {
            sqlx::query(INSERT_ITEM)
                .bind(&order.order_uid)
                .bind(item.chrt_id)
                .bind(&item.track_number)
                .bind(item.price)
                .bind(&item.rid)
                .bind(&item.name)
                .bind(item.sale)
                .bind(&item.size)
                .bind(item.total_price)
                .bind(item.nm_id)
                .bind(&item.brand)
                .bind(item.status)
                .execute(&mut **tx)
                .await
                .inspect_err(|e| warn!(item_index = index, error = %e, "Failed to insert item"))?;
        }

        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    /// Insert all four relations in one transaction.
    ///
    /// The transaction is rolled back when dropped, so any early return via
    /// `?` leaves no partial rows behind. It is committed only after the last
    /// item row is written.
    #[instrument(skip(self, order), fields(order_uid = %order.order_uid, items = order.items.len()))]
    async fn add(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(INSERT_ORDER)
            .bind(&order.order_uid)
            .bind(&order.track_number)
            .bind(&order.entry)
            .bind(&order.locale)
            .bind(&order.internal_signature)
            .bind(&order.customer_id)
            .bind(&order.delivery_service)
            .bind(&order.shardkey)
            .bind(order.sm_id)
            .bind(order.date_created)
            .bind(&order.oof_shard)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error(e, &order.order_uid))?;

        Self::insert_children(&mut tx, order).await?;

        tx.commit().await?;

        info!("Order stored");
        Ok(())
    }

    #[instrument(skip(self, uid), fields(order_uid = %uid))]
    async fn get_info(&self, uid: &OrderUid) -> Result<Order, RepositoryError> {
        // One snapshot for all four reads, so a concurrent delete cannot leave
        // us with a header but no items.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let header = sqlx::query_as::<_, OrderRow>(
            r"
            SELECT track_number, entry, locale, internal_signature, customer_id,
                   delivery_service, shardkey, sm_id, date_created, oof_shard
            FROM orders
            WHERE order_uid = $1
            ",
        )
        .bind(uid)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        let delivery = sqlx::query_as::<_, DeliveryRow>(
            r"
            SELECT name, phone, zip, city, address, region, email
            FROM delivery_info
            WHERE order_uid = $1
            ",
        )
        .bind(uid)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::DataCorruption(format!("order {uid} has no delivery info")))?;

        let payment = sqlx::query_as::<_, PaymentRow>(
            r"
            SELECT request_id, currency, provider, amount, payment_dt,
                   bank, delivery_cost, goods_total, custom_fee
            FROM payments
            WHERE transaction_uid = $1
            ",
        )
        .bind(uid)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::DataCorruption(format!("order {uid} has no payment")))?;

        let items = sqlx::query_as::<_, ItemRow>(
            r"
            SELECT chrt_id, track_number, price, rid, name,
                   sale, size, total_price, nm_id, brand, status
            FROM items
            WHERE order_uid = $1
            ORDER BY id
            ",
        )
        .bind(uid)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(items = items.len(), "Order loaded");

        Ok(Order {
            order_uid: uid.clone(),
            track_number: header.track_number,
            entry: header.entry,
            delivery: DeliveryInfo {
                name: delivery.name,
                phone: delivery.phone,
                zip: delivery.zip,
                city: delivery.city,
                address: delivery.address,
                region: delivery.region,
                email: delivery.email,
            },
            payment: Payment {
                transaction: uid.to_string(),
                request_id: payment.request_id,
                currency: payment.currency,
                provider: payment.provider,
                amount: payment.amount,
                payment_dt: payment.payment_dt,
                bank: payment.bank,
                delivery_cost: payment.delivery_cost,
                goods_total: payment.goods_total,
                custom_fee: payment.custom_fee,
            },
            items: items.into_iter().map(Item::from).collect(),
            locale: header.locale,
            internal_signature: header.internal_signature,
            customer_id: header.customer_id,
            delivery_service: header.delivery_service,
            shardkey: header.shardkey,
            sm_id: header.sm_id,
            date_created: header.date_created,
            oof_shard: header.oof_shard,
        })
    }

    /// Child rows go with the header via `ON DELETE CASCADE`.
    #[instrument(skip(self, uid), fields(order_uid = %uid))]
    async fn delete(&self, uid: &OrderUid) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM orders WHERE order_uid = $1")
            .bind(uid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        info!("Order deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_keys(&self) -> Result<Vec<OrderUid>, RepositoryError> {
        let keys = sqlx::query_scalar::<_, OrderUid>("SELECT order_uid FROM orders ORDER BY order_uid")
            .fetch_all(&self.pool)
            .await?;

        debug!(count = keys.len(), "Listed order keys");
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Map a unique-key violation to `Conflict`; everything else stays a database error.
fn map_insert_error(e: sqlx::Error, uid: &OrderUid) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return RepositoryError::Conflict(format!("order {uid} already exists"));
    }
    RepositoryError::Database(e)
}
