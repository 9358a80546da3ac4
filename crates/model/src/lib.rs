//! Domain types shared across the order–payment engine: orders with their
//! line items, payment ledger rows, status/method enums, listing filters
//! and aggregate statistics records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a status or method string is not part of the
/// fixed vocabulary. Boundaries turn this into a validation failure.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

/// Order lifecycle status. The store enforces membership in this set,
/// not a transition graph; transition policy belongs to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(UnknownValue {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

/// How a payment is settled: through the card gateway or collected as
/// cash on delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Cod,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Cod => "cod",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(PaymentMethod::Card),
            "cod" => Ok(PaymentMethod::Cod),
            other => Err(UnknownValue {
                kind: "payment method",
                value: other.to_string(),
            }),
        }
    }
}

/// Status of a single ledger row. `Completed` and `Failed` are terminal
/// for the row; refunds are appended as new rows, never mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(UnknownValue {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

/// One line of an order, snapshotting product name and unit price at
/// the time the order was placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: i64,
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

/// Order item as supplied by the caller, before the store assigns an id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderItem {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

/// Order aggregate. The item list is immutable after creation; only
/// `status` (and `updated_at`) may change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub customer_email: String,
    pub total: Decimal,
    pub status: OrderStatus,
    pub delivery_address: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

/// Payload for creating an order. `total` is a caller contract: the
/// engine persists it as given and does not recompute it from the items.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer_email: String,
    pub items: Vec<NewOrderItem>,
    pub total: Decimal,
    /// Initial status; defaults to `pending` when absent. Any valid
    /// status is accepted — the store is agnostic about why it was chosen.
    #[serde(default)]
    pub status: Option<OrderStatus>,
    pub delivery_address: String,
    pub payment_method: String,
}

/// Conjunctive listing filters for orders. Results are ordered by
/// creation time, newest first.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub customer_email: Option<String>,
    pub status: Option<OrderStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// One immutable ledger row: a payment or refund attempt and its outcome.
/// Positive `amount` is a capture, negative a refund.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_response: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger row as written by the orchestrator, before the ledger assigns
/// an id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub order_id: i64,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub gateway_payment_id: Option<String>,
    pub gateway_response: String,
}

/// Payload for driving a payment. `card_token` is required for card
/// payments and ignored for cash on delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    pub order_id: i64,
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[serde(default)]
    pub card_token: Option<String>,
}

/// Payload for refunding a completed payment. A missing amount means a
/// full refund of the original.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Conjunctive listing filters for ledger rows.
#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub order_id: Option<i64>,
    pub method: Option<PaymentMethod>,
    pub status: Option<PaymentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Order counts and revenue over one rolling window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowStats {
    pub orders: i64,
    pub revenue: Decimal,
}

/// Read-side aggregate over all orders: lifetime totals plus rolling
/// windows for today, the last 7 days and the last 30 days.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderStats {
    pub total_orders: i64,
    pub total_revenue: Decimal,
    pub completed_orders: i64,
    pub cancelled_orders: i64,
    pub daily: WindowStats,
    pub weekly: WindowStats,
    pub monthly: WindowStats,
    pub average_order_value: Decimal,
}

/// Ledger row counts per settlement method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MethodCounts {
    pub card: i64,
    pub cod: i64,
}

/// Completed ledger activity over one rolling window: row count and net
/// captured amount (captures minus refunds).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWindowStats {
    pub payments: i64,
    pub net: Decimal,
}

/// Read-side aggregate over the payment ledger. `net_revenue` is
/// completed captures minus completed refunds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStats {
    pub total_payments: i64,
    pub total_revenue: Decimal,
    pub total_refunds: Decimal,
    pub completed_payments: i64,
    pub failed_payments: i64,
    pub pending_payments: i64,
    pub payment_methods: MethodCounts,
    pub daily: PaymentWindowStats,
    pub weekly: PaymentWindowStats,
    pub monthly: PaymentWindowStats,
    pub net_revenue: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deserialize_new_order_from_json() {
        let json = r#"
        {
           "customerEmail": "jane@example.com",
           "items": [
              {
                 "productId": "prod-17",
                 "name": "Espresso beans 1kg",
                 "price": 12.50,
                 "quantity": 2
              },
              {
                 "productId": "prod-3",
                 "name": "Filter paper",
                 "price": 4.00,
                 "quantity": 1
              }
           ],
           "total": 29.00,
           "deliveryAddress": "12 Rue de la Paix, Paris",
           "paymentMethod": "card"
        }
        "#;
        let order: NewOrder = serde_json::from_str(json).unwrap();
        assert_eq!(order.customer_email, "jane@example.com");
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].price, dec!(12.50));
        assert_eq!(order.total, dec!(29.00));
        assert_eq!(order.status, None);
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "processing", "shipped", "delivered", "cancelled"] {
            let parsed: OrderStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("refunded".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_payment_enums_parse() {
        assert_eq!("card".parse::<PaymentMethod>().unwrap(), PaymentMethod::Card);
        assert_eq!("cod".parse::<PaymentMethod>().unwrap(), PaymentMethod::Cod);
        assert!("paypal".parse::<PaymentMethod>().is_err());

        assert_eq!(
            "completed".parse::<PaymentStatus>().unwrap(),
            PaymentStatus::Completed
        );
        assert!("authorized".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn test_payment_serializes_camel_case() {
        let payment = Payment {
            id: 7,
            order_id: 42,
            amount: dec!(-10.00),
            method: PaymentMethod::Card,
            status: PaymentStatus::Completed,
            transaction_id: "REF1700000000000abc123def".to_string(),
            gateway_payment_id: Some("re_123".to_string()),
            gateway_response: "Refund processed".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(&payment).unwrap();
        assert_eq!(json["orderId"], 42);
        assert_eq!(json["method"], "card");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["gatewayPaymentId"], "re_123");
    }
}
