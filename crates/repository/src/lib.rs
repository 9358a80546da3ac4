//! # Data Repository Layer
//!
//! Repository traits and PostgreSQL implementations for the two
//! aggregates of the engine: orders (with their line items) and the
//! payment ledger. The order store's create/delete paths run as a single
//! database transaction; the ledger only ever needs single-statement
//! writes. Implementations own the connection pool, so every operation
//! acquires a scoped connection and releases it on all exit paths
//! (dropping an uncommitted transaction rolls it back).

use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolError};
use model::{
    MethodCounts, NewOrder, NewPayment, Order, OrderFilter, OrderItem, OrderStats, OrderStatus,
    Payment, PaymentFilter, PaymentStats, PaymentStatus, PaymentWindowStats, WindowStats,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Row, Transaction};

/// # RepositoryError
///
/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// Failed to obtain a database connection from the pool.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
    /// A stored status or method string is outside the fixed vocabulary.
    #[error("Corrupt row: {0}")]
    Decode(#[from] model::UnknownValue),
    /// No result found.
    #[error("Not found")]
    NotFound,
}

/// # OrdersRepository
///
/// Repository interface for the order store. Orders are created and
/// deleted together with their items as one atomic unit; after creation
/// only the status may change.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    /// Insert the order row and all item rows in one transaction.
    /// The returned order is built from the inserted rows, not re-queried.
    async fn create(&self, new: &NewOrder, status: OrderStatus) -> Result<Order, RepositoryError>;

    /// Read an order and its items as one joined read.
    async fn get_by_id(&self, id: i64) -> Result<Order, RepositoryError>;

    /// List orders matching the conjunctive filter, newest first.
    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError>;

    /// Set the order status and bump `updated_at`.
    async fn update_status(&self, id: i64, status: OrderStatus)
        -> Result<Order, RepositoryError>;

    /// Delete item rows then the order row in one transaction.
    /// Returns `false` when the order did not exist.
    async fn delete(&self, id: i64) -> Result<bool, RepositoryError>;

    /// Lifetime and rolling-window aggregates over all orders.
    async fn stats(&self) -> Result<OrderStats, RepositoryError>;
}

/// # PaymentsRepository
///
/// Repository interface for the append-only payment ledger. Historical
/// rows are never mutated except for `update_status`; refunds are new
/// rows with negative amounts.
#[async_trait]
pub trait PaymentsRepository: Send + Sync {
    /// Append one ledger row.
    async fn insert(&self, new: &NewPayment) -> Result<Payment, RepositoryError>;

    /// Read a single ledger row.
    async fn get_by_id(&self, id: i64) -> Result<Payment, RepositoryError>;

    /// List ledger rows matching the conjunctive filter, newest first.
    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, RepositoryError>;

    /// All ledger rows for one order, newest first.
    async fn list_by_order(&self, order_id: i64) -> Result<Vec<Payment>, RepositoryError>;

    /// Flip the status of one row, optionally replacing the diagnostic text.
    async fn update_status(
        &self,
        id: i64,
        status: PaymentStatus,
        gateway_response: Option<&str>,
    ) -> Result<Payment, RepositoryError>;

    /// Lifetime and rolling-window aggregates over the ledger.
    async fn stats(&self) -> Result<PaymentStats, RepositoryError>;
}

const ORDER_COLUMNS: &str =
    "id, customer_email, total, status, delivery_address, payment_method, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, order_id, amount, method, status, transaction_id, \
     gateway_payment_id, gateway_response, created_at, updated_at";

fn order_from_row(row: &Row, items: Vec<OrderItem>) -> Result<Order, RepositoryError> {
    let status: String = row.get("status");
    Ok(Order {
        id: row.get("id"),
        customer_email: row.get("customer_email"),
        total: row.get("total"),
        status: status.parse()?,
        delivery_address: row.get("delivery_address"),
        payment_method: row.get("payment_method"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        items,
    })
}

fn item_from_row(row: &Row) -> OrderItem {
    OrderItem {
        id: row.get("id"),
        product_id: row.get("product_id"),
        name: row.get("name"),
        price: row.get("price"),
        quantity: row.get("quantity"),
    }
}

fn payment_from_row(row: &Row) -> Result<Payment, RepositoryError> {
    let method: String = row.get("method");
    let status: String = row.get("status");
    Ok(Payment {
        id: row.get("id"),
        order_id: row.get("order_id"),
        amount: row.get("amount"),
        method: method.parse()?,
        status: status.parse()?,
        transaction_id: row.get("transaction_id"),
        gateway_payment_id: row.get("gateway_payment_id"),
        gateway_response: row.get("gateway_response"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Builds the SQL for a filtered order listing. Placeholders are numbered
/// in declaration order (email, status, from, to) with the limit last.
fn order_list_sql(filter: &OrderFilter) -> String {
    let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders");
    let mut conditions: Vec<String> = Vec::new();
    let mut n = 0;

    if filter.customer_email.is_some() {
        n += 1;
        conditions.push(format!("customer_email = ${n}"));
    }
    if filter.status.is_some() {
        n += 1;
        conditions.push(format!("status = ${n}"));
    }
    if filter.from.is_some() {
        n += 1;
        conditions.push(format!("created_at >= ${n}"));
    }
    if filter.to.is_some() {
        n += 1;
        conditions.push(format!("created_at <= ${n}"));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ${}", n + 1));
    sql
}

/// Builds the SQL for a filtered ledger listing. Placeholders are numbered
/// in declaration order (order_id, method, status, from, to), limit last.
fn payment_list_sql(filter: &PaymentFilter) -> String {
    let mut sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments");
    let mut conditions: Vec<String> = Vec::new();
    let mut n = 0;

    if filter.order_id.is_some() {
        n += 1;
        conditions.push(format!("order_id = ${n}"));
    }
    if filter.method.is_some() {
        n += 1;
        conditions.push(format!("method = ${n}"));
    }
    if filter.status.is_some() {
        n += 1;
        conditions.push(format!("status = ${n}"));
    }
    if filter.from.is_some() {
        n += 1;
        conditions.push(format!("created_at >= ${n}"));
    }
    if filter.to.is_some() {
        n += 1;
        conditions.push(format!("created_at <= ${n}"));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ${}", n + 1));
    sql
}

const DEFAULT_LIST_LIMIT: i64 = 100;

/// PostgreSQL implementation of the [`OrdersRepository`] trait.
pub struct PgOrdersRepository {
    pool: Pool,
}

impl PgOrdersRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn insert_order_tx(
        tx: &Transaction<'_>,
        new: &NewOrder,
        status: OrderStatus,
    ) -> Result<Row, RepositoryError> {
        let query = format!(
            r#"
            INSERT INTO orders (customer_email, total, status, delivery_address, payment_method)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORDER_COLUMNS}
        "#
        );
        let row = tx
            .query_one(
                &query,
                &[
                    &new.customer_email,
                    &new.total,
                    &status.as_str(),
                    &new.delivery_address,
                    &new.payment_method,
                ],
            )
            .await?;
        Ok(row)
    }

    async fn insert_items_tx(
        tx: &Transaction<'_>,
        order_id: i64,
        new: &NewOrder,
    ) -> Result<Vec<OrderItem>, RepositoryError> {
        let query = r#"
            INSERT INTO order_items (order_id, product_id, name, price, quantity)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, product_id, name, price, quantity
        "#;
        let mut items = Vec::with_capacity(new.items.len());
        for item in &new.items {
            let row = tx
                .query_one(
                    query,
                    &[
                        &order_id,
                        &item.product_id,
                        &item.name,
                        &item.price,
                        &item.quantity,
                    ],
                )
                .await?;
            items.push(item_from_row(&row));
        }
        Ok(items)
    }

    /// Fetches items for a set of orders and groups them by order id.
    async fn items_for_orders(
        client: &deadpool_postgres::Object,
        order_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<OrderItem>>, RepositoryError> {
        let query = r#"
            SELECT id, order_id, product_id, name, price, quantity
            FROM order_items WHERE order_id = ANY($1)
        "#;
        let rows = client.query(query, &[&order_ids]).await?;
        let mut grouped: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let order_id: i64 = row.get("order_id");
            grouped.entry(order_id).or_default().push(item_from_row(&row));
        }
        Ok(grouped)
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn create(&self, new: &NewOrder, status: OrderStatus) -> Result<Order, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let order_row = Self::insert_order_tx(&tx, new, status).await?;
        let order_id: i64 = order_row.get("id");
        let items = Self::insert_items_tx(&tx, order_id, new).await?;

        tx.commit().await?;

        order_from_row(&order_row, items)
    }

    async fn get_by_id(&self, id: i64) -> Result<Order, RepositoryError> {
        let client = self.pool.get().await?;
        // One joined read; LEFT JOIN keeps zero-item orders visible with
        // NULL item columns, represented as an empty item list.
        let query = r#"
            SELECT o.id, o.customer_email, o.total, o.status, o.delivery_address,
                   o.payment_method, o.created_at, o.updated_at,
                   i.id AS item_id, i.product_id, i.name, i.price, i.quantity
            FROM orders o
            LEFT JOIN order_items i ON i.order_id = o.id
            WHERE o.id = $1
        "#;
        let rows = client.query(query, &[&id]).await?;
        let first = rows.first().ok_or(RepositoryError::NotFound)?;

        let mut items = Vec::new();
        for row in &rows {
            let item_id: Option<i64> = row.get("item_id");
            if let Some(item_id) = item_id {
                items.push(OrderItem {
                    id: item_id,
                    product_id: row.get("product_id"),
                    name: row.get("name"),
                    price: row.get("price"),
                    quantity: row.get("quantity"),
                });
            }
        }

        order_from_row(first, items)
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = order_list_sql(filter);

        let status = filter.status.map(|s| s.as_str());
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(ref email) = filter.customer_email {
            params.push(email);
        }
        if let Some(ref status) = status {
            params.push(status);
        }
        if let Some(ref from) = filter.from {
            params.push(from);
        }
        if let Some(ref to) = filter.to {
            params.push(to);
        }
        params.push(&limit);

        let rows = client.query(&query, &params).await?;

        let ids: Vec<i64> = rows.iter().map(|r| r.get("id")).collect();
        let mut items = Self::items_for_orders(&client, &ids).await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.get("id");
            orders.push(order_from_row(row, items.remove(&id).unwrap_or_default())?);
        }
        Ok(orders)
    }

    async fn update_status(
        &self,
        id: i64,
        status: OrderStatus,
    ) -> Result<Order, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            UPDATE orders SET status = $1, updated_at = NOW()
            WHERE id = $2
            RETURNING {ORDER_COLUMNS}
        "#
        );
        let row = client
            .query_opt(&query, &[&status.as_str(), &id])
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let items = Self::items_for_orders(&client, &[id])
            .await?
            .remove(&id)
            .unwrap_or_default();
        order_from_row(&row, items)
    }

    async fn delete(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let exists = tx
            .query_opt("SELECT id FROM orders WHERE id = $1", &[&id])
            .await?;
        if exists.is_none() {
            // Nothing written yet; dropping the transaction releases it.
            return Ok(false);
        }

        tx.execute("DELETE FROM order_items WHERE order_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM orders WHERE id = $1", &[&id]).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn stats(&self) -> Result<OrderStats, RepositoryError> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT
                COUNT(*) AS total_orders,
                COALESCE(SUM(total), 0) AS total_revenue,
                COUNT(CASE WHEN status = 'delivered' THEN 1 END) AS completed_orders,
                COUNT(CASE WHEN status = 'cancelled' THEN 1 END) AS cancelled_orders,
                COUNT(CASE WHEN created_at > (NOW() - INTERVAL '24 hours') THEN 1 END) AS orders_today,
                COALESCE(SUM(CASE WHEN created_at > (NOW() - INTERVAL '24 hours') THEN total ELSE 0 END), 0) AS revenue_today,
                COUNT(CASE WHEN created_at > (NOW() - INTERVAL '7 days') THEN 1 END) AS orders_week,
                COALESCE(SUM(CASE WHEN created_at > (NOW() - INTERVAL '7 days') THEN total ELSE 0 END), 0) AS revenue_week,
                COUNT(CASE WHEN created_at > (NOW() - INTERVAL '30 days') THEN 1 END) AS orders_month,
                COALESCE(SUM(CASE WHEN created_at > (NOW() - INTERVAL '30 days') THEN total ELSE 0 END), 0) AS revenue_month
            FROM orders
        "#;
        let row = client.query_one(query, &[]).await?;

        let total_orders: i64 = row.get("total_orders");
        let total_revenue: Decimal = row.get("total_revenue");
        let average_order_value = if total_orders > 0 {
            total_revenue / Decimal::from(total_orders)
        } else {
            Decimal::ZERO
        };

        Ok(OrderStats {
            total_orders,
            total_revenue,
            completed_orders: row.get("completed_orders"),
            cancelled_orders: row.get("cancelled_orders"),
            daily: WindowStats {
                orders: row.get("orders_today"),
                revenue: row.get("revenue_today"),
            },
            weekly: WindowStats {
                orders: row.get("orders_week"),
                revenue: row.get("revenue_week"),
            },
            monthly: WindowStats {
                orders: row.get("orders_month"),
                revenue: row.get("revenue_month"),
            },
            average_order_value,
        })
    }
}

/// PostgreSQL implementation of the [`PaymentsRepository`] trait.
pub struct PgPaymentsRepository {
    pool: Pool,
}

impl PgPaymentsRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentsRepository for PgPaymentsRepository {
    async fn insert(&self, new: &NewPayment) -> Result<Payment, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            INSERT INTO payments (
                order_id, amount, method, status, transaction_id,
                gateway_payment_id, gateway_response
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PAYMENT_COLUMNS}
        "#
        );
        let row = client
            .query_one(
                &query,
                &[
                    &new.order_id,
                    &new.amount,
                    &new.method.as_str(),
                    &new.status.as_str(),
                    &new.transaction_id,
                    &new.gateway_payment_id,
                    &new.gateway_response,
                ],
            )
            .await?;
        payment_from_row(&row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Payment, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = client
            .query_opt(&query, &[&id])
            .await?
            .ok_or(RepositoryError::NotFound)?;
        payment_from_row(&row)
    }

    async fn list(&self, filter: &PaymentFilter) -> Result<Vec<Payment>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = payment_list_sql(filter);

        let method = filter.method.map(|m| m.as_str());
        let status = filter.status.map(|s| s.as_str());
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(ref order_id) = filter.order_id {
            params.push(order_id);
        }
        if let Some(ref method) = method {
            params.push(method);
        }
        if let Some(ref status) = status {
            params.push(status);
        }
        if let Some(ref from) = filter.from {
            params.push(from);
        }
        if let Some(ref to) = filter.to {
            params.push(to);
        }
        params.push(&limit);

        let rows = client.query(&query, &params).await?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn list_by_order(&self, order_id: i64) -> Result<Vec<Payment>, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY created_at DESC"
        );
        let rows = client.query(&query, &[&order_id]).await?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn update_status(
        &self,
        id: i64,
        status: PaymentStatus,
        gateway_response: Option<&str>,
    ) -> Result<Payment, RepositoryError> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            UPDATE payments
            SET status = $1,
                gateway_response = COALESCE($2, gateway_response),
                updated_at = NOW()
            WHERE id = $3
            RETURNING {PAYMENT_COLUMNS}
        "#
        );
        let row = client
            .query_opt(&query, &[&status.as_str(), &gateway_response, &id])
            .await?
            .ok_or(RepositoryError::NotFound)?;
        payment_from_row(&row)
    }

    async fn stats(&self) -> Result<PaymentStats, RepositoryError> {
        let client = self.pool.get().await?;
        // Net revenue counts completed rows only: captures are positive,
        // refunds negative, so summing completed amounts nets them out.
        let query = r#"
            SELECT
                COUNT(*) AS total_payments,
                COALESCE(SUM(CASE WHEN status = 'completed' AND amount > 0 THEN amount ELSE 0 END), 0) AS total_revenue,
                COALESCE(SUM(CASE WHEN status = 'completed' AND amount < 0 THEN -amount ELSE 0 END), 0) AS total_refunds,
                COUNT(CASE WHEN status = 'completed' AND amount > 0 THEN 1 END) AS completed_payments,
                COUNT(CASE WHEN status = 'failed' THEN 1 END) AS failed_payments,
                COUNT(CASE WHEN status = 'pending' THEN 1 END) AS pending_payments,
                COUNT(CASE WHEN method = 'card' THEN 1 END) AS card_payments,
                COUNT(CASE WHEN method = 'cod' THEN 1 END) AS cod_payments,
                COUNT(CASE WHEN created_at > (NOW() - INTERVAL '24 hours') THEN 1 END) AS payments_today,
                COALESCE(SUM(CASE WHEN status = 'completed' AND created_at > (NOW() - INTERVAL '24 hours') THEN amount ELSE 0 END), 0) AS net_today,
                COUNT(CASE WHEN created_at > (NOW() - INTERVAL '7 days') THEN 1 END) AS payments_week,
                COALESCE(SUM(CASE WHEN status = 'completed' AND created_at > (NOW() - INTERVAL '7 days') THEN amount ELSE 0 END), 0) AS net_week,
                COUNT(CASE WHEN created_at > (NOW() - INTERVAL '30 days') THEN 1 END) AS payments_month,
                COALESCE(SUM(CASE WHEN status = 'completed' AND created_at > (NOW() - INTERVAL '30 days') THEN amount ELSE 0 END), 0) AS net_month
            FROM payments
        "#;
        let row = client.query_one(query, &[]).await?;

        let total_revenue: Decimal = row.get("total_revenue");
        let total_refunds: Decimal = row.get("total_refunds");

        Ok(PaymentStats {
            total_payments: row.get("total_payments"),
            total_revenue,
            total_refunds,
            completed_payments: row.get("completed_payments"),
            failed_payments: row.get("failed_payments"),
            pending_payments: row.get("pending_payments"),
            payment_methods: MethodCounts {
                card: row.get("card_payments"),
                cod: row.get("cod_payments"),
            },
            daily: PaymentWindowStats {
                payments: row.get("payments_today"),
                net: row.get("net_today"),
            },
            weekly: PaymentWindowStats {
                payments: row.get("payments_week"),
                net: row.get("net_week"),
            },
            monthly: PaymentWindowStats {
                payments: row.get("payments_month"),
                net: row.get("net_month"),
            },
            net_revenue: total_revenue - total_refunds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_order_list_sql_without_filters() {
        let sql = order_list_sql(&OrderFilter::default());
        assert_eq!(
            sql,
            format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC LIMIT $1")
        );
    }

    #[test]
    fn test_order_list_sql_with_all_filters() {
        let filter = OrderFilter {
            customer_email: Some("a@b.c".into()),
            status: Some(OrderStatus::Shipped),
            from: Some(Utc::now()),
            to: Some(Utc::now()),
            limit: Some(10),
        };
        let sql = order_list_sql(&filter);
        assert!(sql.contains("customer_email = $1"));
        assert!(sql.contains("status = $2"));
        assert!(sql.contains("created_at >= $3"));
        assert!(sql.contains("created_at <= $4"));
        assert!(sql.ends_with("ORDER BY created_at DESC LIMIT $5"));
        // Filters are conjunctive.
        assert_eq!(sql.matches(" AND ").count(), 3);
    }

    #[test]
    fn test_payment_list_sql_skips_absent_filters() {
        let filter = PaymentFilter {
            status: Some(PaymentStatus::Completed),
            ..Default::default()
        };
        let sql = payment_list_sql(&filter);
        assert!(sql.contains("WHERE status = $1"));
        assert!(!sql.contains("order_id"));
        assert!(sql.ends_with("LIMIT $2"));
    }
}
