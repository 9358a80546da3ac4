//! Business logic layer for the order–payment engine.
//!
//! Defines the [`OrderService`] and [`PaymentService`] traits with their
//! async implementations. The order side coordinates validated, atomic
//! order persistence; the payment side is the orchestrator that drives a
//! payment or refund to a terminal status, talks to the card gateway for
//! card payments, and appends exactly one ledger row per attempt.
//!
//! A gateway failure is not an error here: "the payment failed" is a
//! valid business outcome, recorded as a `failed` ledger row and returned
//! as a normal result.

use async_trait::async_trait;
use chrono::Utc;
use gateway::{to_minor_units, CardGateway, ChargeRequest, GatewayOutcome};
use model::{
    NewOrder, NewPayment, Order, OrderFilter, OrderStats, OrderStatus, Payment, PaymentFilter,
    PaymentMethod, PaymentStats, PaymentStatus, ProcessPaymentRequest, RefundRequest,
};
use rand::Rng;
use repository::{OrdersRepository, PaymentsRepository, RepositoryError};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Diagnostic text stored for cash-on-delivery captures; no gateway call
/// happens for this method.
const COD_RESPONSE: &str = "Payment will be collected upon delivery.";

/// Diagnostic text stored for refunds of non-card payments, which settle
/// outside the gateway.
const MANUAL_REFUND_RESPONSE: &str = "Manual refund processed for non-card payment.";

/// The main error type for all service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The input is malformed or missing a required field; caller-fixable.
    #[error("{0}")]
    Validation(String),
    /// The referenced entity does not exist.
    #[error("Not found")]
    NotFound,
    /// A repository (database) operation failed.
    #[error("Database error: {0}")]
    Db(RepositoryError),
}

impl From<RepositoryError> for ServiceError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => ServiceError::NotFound,
            other => ServiceError::Db(other),
        }
    }
}

fn validation(msg: &str) -> ServiceError {
    ServiceError::Validation(msg.to_string())
}

const TXN_SUFFIX_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TXN_SUFFIX_LEN: usize = 9;

/// Generates a transaction identifier: prefix, millisecond timestamp and
/// a random base36 suffix. Globally unique for audit purposes; this is
/// not a request-level idempotency key, so two calls with the same intent
/// produce two ledger rows.
fn generate_transaction_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TXN_SUFFIX_LEN)
        .map(|_| TXN_SUFFIX_CHARS[rng.gen_range(0..TXN_SUFFIX_CHARS.len())] as char)
        .collect();
    format!("{prefix}{}{suffix}", Utc::now().timestamp_millis())
}

/// Trait describing business operations over the order store.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Validates and atomically persists the order with all its items.
    ///
    /// # Errors
    /// Returns [`ServiceError::Validation`] if a required field is missing
    /// or invalid, [`ServiceError::Db`] for storage failures (the store
    /// rolls the whole insert back, so no partial order becomes visible).
    async fn create_order(&self, new: NewOrder) -> Result<Order, ServiceError>;

    /// Retrieves the full order with its items.
    async fn get_order(&self, id: i64) -> Result<Order, ServiceError>;

    /// Lists orders, newest first, with conjunctive filters.
    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, ServiceError>;

    /// Lists all orders for one customer email.
    async fn orders_for_customer(&self, email: &str) -> Result<Vec<Order>, ServiceError>;

    /// Sets the order status. Membership in the status set is guaranteed
    /// by the type; no transition graph is enforced at this layer.
    async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
    ) -> Result<Order, ServiceError>;

    /// Deletes the order and its items atomically. `false` when absent.
    async fn delete_order(&self, id: i64) -> Result<bool, ServiceError>;

    /// Read-only aggregate statistics over all orders.
    async fn order_stats(&self) -> Result<OrderStats, ServiceError>;
}

/// Async implementation of [`OrderService`] over an injected repository.
pub struct OrderServiceImpl<R> {
    orders_repo: R,
}

impl<R> OrderServiceImpl<R>
where
    R: OrdersRepository,
{
    pub fn new(orders_repo: R) -> Self {
        Self { orders_repo }
    }

    /// Validates the structure and required fields of a new order.
    ///
    /// The total is persisted as given: verifying it equals the item sum
    /// is the caller's contract, not re-checked here.
    fn validate_new_order(new: &NewOrder) -> Result<(), ServiceError> {
        if new.customer_email.is_empty() {
            return Err(validation("Customer email is required"));
        }
        if new.items.is_empty() {
            return Err(validation("Order must have at least one item"));
        }
        if new.total < Decimal::ZERO {
            return Err(validation("Valid total amount is required"));
        }
        if new.items.iter().any(|item| item.quantity < 1) {
            return Err(validation("Item quantity must be at least 1"));
        }
        Ok(())
    }
}

#[async_trait]
impl<R> OrderService for OrderServiceImpl<R>
where
    R: OrdersRepository,
{
    #[instrument(skip(self, new))]
    async fn create_order(&self, new: NewOrder) -> Result<Order, ServiceError> {
        Self::validate_new_order(&new)?;

        // Initial status is caller-supplied; the store does not insist on
        // `pending`, it only insists on a valid member of the status set.
        let status = new.status.unwrap_or(OrderStatus::Pending);
        let order = self.orders_repo.create(&new, status).await?;

        info!(order_id = order.id, items = order.items.len(), "order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn get_order(&self, id: i64) -> Result<Order, ServiceError> {
        Ok(self.orders_repo.get_by_id(id).await?)
    }

    #[instrument(skip(self, filter))]
    async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders_repo.list(&filter).await?)
    }

    #[instrument(skip(self))]
    async fn orders_for_customer(&self, email: &str) -> Result<Vec<Order>, ServiceError> {
        let filter = OrderFilter {
            customer_email: Some(email.to_string()),
            ..Default::default()
        };
        Ok(self.orders_repo.list(&filter).await?)
    }

    #[instrument(skip(self))]
    async fn update_order_status(
        &self,
        id: i64,
        status: OrderStatus,
    ) -> Result<Order, ServiceError> {
        Ok(self.orders_repo.update_status(id, status).await?)
    }

    #[instrument(skip(self))]
    async fn delete_order(&self, id: i64) -> Result<bool, ServiceError> {
        Ok(self.orders_repo.delete(id).await?)
    }

    async fn order_stats(&self) -> Result<OrderStats, ServiceError> {
        Ok(self.orders_repo.stats().await?)
    }
}

/// Trait describing the payment orchestrator and ledger reads.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Drives one payment attempt to `pending`, `completed` or `failed`
    /// and appends exactly one ledger row for it — including failures,
    /// which are auditable data rather than exceptions.
    async fn process_payment(&self, req: ProcessPaymentRequest) -> Result<Payment, ServiceError>;

    /// Refunds a completed payment, fully by default. Appends one new
    /// ledger row with a negated amount; the original row is untouched.
    async fn process_refund(
        &self,
        payment_id: i64,
        req: RefundRequest,
    ) -> Result<Payment, ServiceError>;

    /// Reads a single ledger row.
    async fn get_payment(&self, id: i64) -> Result<Payment, ServiceError>;

    /// Lists ledger rows, newest first, with conjunctive filters.
    async fn list_payments(&self, filter: PaymentFilter) -> Result<Vec<Payment>, ServiceError>;

    /// All ledger rows for one order, newest first. This is the
    /// reconciliation read that correlates the two aggregates.
    async fn payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, ServiceError>;

    /// Read-only aggregate statistics over the ledger.
    async fn payment_stats(&self) -> Result<PaymentStats, ServiceError>;
}

/// Async implementation of [`PaymentService`] over an injected ledger
/// repository and card gateway.
pub struct PaymentServiceImpl<R, G> {
    ledger: R,
    gateway: G,
    currency: String,
}

impl<R, G> PaymentServiceImpl<R, G>
where
    R: PaymentsRepository,
    G: CardGateway,
{
    pub fn new(ledger: R, gateway: G, currency: String) -> Self {
        Self {
            ledger,
            gateway,
            currency,
        }
    }
}

#[async_trait]
impl<R, G> PaymentService for PaymentServiceImpl<R, G>
where
    R: PaymentsRepository,
    G: CardGateway,
{
    #[instrument(skip(self, req), fields(order_id = req.order_id))]
    async fn process_payment(&self, req: ProcessPaymentRequest) -> Result<Payment, ServiceError> {
        if req.amount <= Decimal::ZERO {
            return Err(validation("Valid amount is required"));
        }

        let transaction_id = generate_transaction_id("TXN");

        let (status, gateway_payment_id, gateway_response) = match req.method {
            PaymentMethod::Cod => (PaymentStatus::Pending, None, COD_RESPONSE.to_string()),
            PaymentMethod::Card => {
                let token = req
                    .card_token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| validation("Card token is required for card payments"))?;

                let charge = self
                    .gateway
                    .authorize_and_capture(&ChargeRequest {
                        amount_minor: to_minor_units(req.amount),
                        currency: self.currency.clone(),
                        payment_token: token.to_string(),
                        description: format!("Payment for Order #{}", req.order_id),
                        order_id: req.order_id,
                        transaction_id: transaction_id.clone(),
                    })
                    .await;

                let status = match charge.outcome {
                    GatewayOutcome::Succeeded => PaymentStatus::Completed,
                    GatewayOutcome::RequiresAction => PaymentStatus::Pending,
                    GatewayOutcome::Failed => PaymentStatus::Failed,
                };
                if status == PaymentStatus::Failed {
                    warn!(%transaction_id, message = %charge.message, "card payment failed");
                }
                // Keep the gateway id even on pending/failed outcomes so
                // the row can be reconciled against the gateway later.
                (status, charge.gateway_id, charge.message)
            }
        };

        let payment = self
            .ledger
            .insert(&NewPayment {
                order_id: req.order_id,
                amount: req.amount,
                method: req.method,
                status,
                transaction_id,
                gateway_payment_id,
                gateway_response,
            })
            .await?;

        info!(
            payment_id = payment.id,
            order_id = payment.order_id,
            status = %payment.status,
            "payment attempt recorded"
        );
        Ok(payment)
    }

    #[instrument(skip(self, req))]
    async fn process_refund(
        &self,
        payment_id: i64,
        req: RefundRequest,
    ) -> Result<Payment, ServiceError> {
        let original = self.ledger.get_by_id(payment_id).await?;

        if original.status != PaymentStatus::Completed {
            return Err(validation("Cannot refund non-completed payment"));
        }

        let refund_amount = req.amount.unwrap_or(original.amount);
        if refund_amount <= Decimal::ZERO {
            return Err(validation("Valid refund amount is required"));
        }
        // Validated against the single original row only; prior partial
        // refunds of the same payment are not accumulated.
        if refund_amount > original.amount {
            return Err(validation(
                "Refund amount cannot exceed original payment amount",
            ));
        }

        let transaction_id = generate_transaction_id("REF");

        let (status, gateway_refund_id, gateway_response) =
            match (original.method, original.gateway_payment_id.as_deref()) {
                (PaymentMethod::Card, Some(gateway_payment_id)) => {
                    let reason = req.reason.as_deref().unwrap_or("requested_by_customer");
                    let refund = self
                        .gateway
                        .refund(gateway_payment_id, to_minor_units(refund_amount), reason)
                        .await;
                    let status = match refund.outcome {
                        GatewayOutcome::Succeeded => PaymentStatus::Completed,
                        _ => PaymentStatus::Failed,
                    };
                    if status == PaymentStatus::Failed {
                        warn!(%transaction_id, message = %refund.message, "gateway refund failed");
                    }
                    (status, refund.gateway_refund_id, refund.message)
                }
                // Non-card (or card without a gateway id): settled
                // manually outside the gateway.
                _ => (
                    PaymentStatus::Completed,
                    None,
                    MANUAL_REFUND_RESPONSE.to_string(),
                ),
            };

        let refund = self
            .ledger
            .insert(&NewPayment {
                order_id: original.order_id,
                amount: -refund_amount,
                method: original.method,
                status,
                transaction_id,
                gateway_payment_id: gateway_refund_id,
                gateway_response,
            })
            .await?;

        info!(
            refund_id = refund.id,
            original_id = original.id,
            amount = %refund.amount,
            status = %refund.status,
            "refund recorded"
        );
        Ok(refund)
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, id: i64) -> Result<Payment, ServiceError> {
        Ok(self.ledger.get_by_id(id).await?)
    }

    #[instrument(skip(self, filter))]
    async fn list_payments(&self, filter: PaymentFilter) -> Result<Vec<Payment>, ServiceError> {
        Ok(self.ledger.list(&filter).await?)
    }

    #[instrument(skip(self))]
    async fn payments_for_order(&self, order_id: i64) -> Result<Vec<Payment>, ServiceError> {
        Ok(self.ledger.list_by_order(order_id).await?)
    }

    async fn payment_stats(&self) -> Result<PaymentStats, ServiceError> {
        Ok(self.ledger.stats().await?)
    }
}
