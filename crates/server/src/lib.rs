//! HTTP layer for the order and payment APIs.
//!
//! Exposes the order store and payment ledger over REST, translates
//! service errors into status codes with a `{"message": ...}` envelope,
//! and serves Prometheus metrics and a health probe.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use model::{
    NewOrder, OrderFilter, OrderStatus, PaymentFilter, PaymentMethod, PaymentStatus,
    ProcessPaymentRequest, RefundRequest,
};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use serde::Deserialize;
use serde_json::json;
use service::{OrderService, PaymentService, ServiceError};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Server represents the HTTP front of the engine.
pub struct Server {
    orders: Arc<dyn OrderService>,
    payments: Arc<dyn PaymentService>,
    port: u16,
    metrics: Arc<Metrics>,
}

/// Metrics collects and exposes HTTP server metrics.
struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("Failed to create http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )
        .expect("Failed to create http_request_duration_seconds metric");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )
        .expect("Failed to create errors_total metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("Failed to register http_requests_total metric");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("Failed to register http_request_duration_seconds metric");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("Failed to register errors_total metric");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
        }
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total
            .with_label_values(&[source, endpoint])
            .inc();
    }
}

/// Application state shared between request handlers
#[derive(Clone)]
struct AppState {
    orders: Arc<dyn OrderService>,
    payments: Arc<dyn PaymentService>,
    metrics: Arc<Metrics>,
}

/// An error already shaped for the wire: status code plus the
/// `{"message": ...}` envelope.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Validation(message) => Self {
                status: StatusCode::BAD_REQUEST,
                message,
            },
            ServiceError::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                message: "Not found".to_string(),
            },
            ServiceError::Db(err) => {
                error!("repository failure: {err}");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Internal server error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

/// Query parameters accepted by `GET /api/orders`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderListQuery {
    customer_email: Option<String>,
    status: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

impl OrderListQuery {
    fn into_filter(self) -> Result<OrderFilter, ApiError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<OrderStatus>)
            .transpose()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        Ok(OrderFilter {
            customer_email: self.customer_email,
            status,
            from: self.from,
            to: self.to,
            limit: self.limit,
        })
    }
}

/// Query parameters accepted by `GET /api/payments`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentListQuery {
    order_id: Option<i64>,
    method: Option<String>,
    status: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

impl PaymentListQuery {
    fn into_filter(self) -> Result<PaymentFilter, ApiError> {
        let method = self
            .method
            .as_deref()
            .map(str::parse::<PaymentMethod>)
            .transpose()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let status = self
            .status
            .as_deref()
            .map(str::parse::<PaymentStatus>)
            .transpose()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        Ok(PaymentFilter {
            order_id: self.order_id,
            method,
            status,
            from: self.from,
            to: self.to,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UpdateOrderStatusRequest {
    status: String,
}

impl Server {
    /// Creates a new Server instance over the injected services.
    pub fn new(
        port: u16,
        orders: Arc<dyn OrderService>,
        payments: Arc<dyn PaymentService>,
    ) -> Self {
        info!("Initializing HTTP server on port {}", port);

        Self {
            orders,
            payments,
            port,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Starts the server and blocks until it's shut down.
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let metrics = self.metrics.clone();

        Router::new()
            .route("/api/orders", get(Self::handle_list_orders))
            .route("/api/orders", post(Self::handle_create_order))
            .route("/api/orders/stats", get(Self::handle_order_stats))
            .route(
                "/api/orders/customer/{email}",
                get(Self::handle_orders_for_customer),
            )
            .route("/api/orders/{id}", get(Self::handle_get_order))
            .route("/api/orders/{id}", put(Self::handle_update_order_status))
            .route("/api/orders/{id}", delete(Self::handle_delete_order))
            .route("/api/payments", get(Self::handle_list_payments))
            .route("/api/payments", post(Self::handle_process_payment))
            .route("/api/payments/stats", get(Self::handle_payment_stats))
            .route(
                "/api/payments/order/{order_id}",
                get(Self::handle_payments_for_order),
            )
            .route("/api/payments/{id}", get(Self::handle_get_payment))
            .route("/api/payments/{id}/refund", post(Self::handle_refund))
            .route("/health", get(Self::handle_health))
            .route("/metrics", get(Self::handle_metrics))
            .layer(axum::middleware::from_fn_with_state(
                metrics.clone(),
                Self::metrics_middleware,
            ))
            .with_state(AppState {
                orders: self.orders.clone(),
                payments: self.payments.clone(),
                metrics,
            })
    }

    /// Middleware for collecting metrics on HTTP requests
    async fn metrics_middleware(
        State(metrics): State<Arc<Metrics>>,
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> Response {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let status = response.status().as_u16();

        metrics.record_request(&method, &path, status, start.elapsed());
        if status >= 400 {
            metrics.record_error("http", &path);
        }

        response
    }

    // ---- orders ------------------------------------------------------------

    async fn handle_create_order(
        State(state): State<AppState>,
        Json(new): Json<NewOrder>,
    ) -> Result<Response, ApiError> {
        let order = state.orders.create_order(new).await?;
        Ok((StatusCode::CREATED, Json(order)).into_response())
    }

    async fn handle_list_orders(
        State(state): State<AppState>,
        Query(query): Query<OrderListQuery>,
    ) -> Result<Response, ApiError> {
        let orders = state.orders.list_orders(query.into_filter()?).await?;
        Ok(Json(orders).into_response())
    }

    async fn handle_get_order(
        State(state): State<AppState>,
        Path(id): Path<i64>,
    ) -> Result<Response, ApiError> {
        let order = state.orders.get_order(id).await?;
        Ok(Json(order).into_response())
    }

    async fn handle_orders_for_customer(
        State(state): State<AppState>,
        Path(email): Path<String>,
    ) -> Result<Response, ApiError> {
        let orders = state.orders.orders_for_customer(&email).await?;
        Ok(Json(orders).into_response())
    }

    async fn handle_update_order_status(
        State(state): State<AppState>,
        Path(id): Path<i64>,
        Json(body): Json<UpdateOrderStatusRequest>,
    ) -> Result<Response, ApiError> {
        let status: OrderStatus = body
            .status
            .parse()
            .map_err(|e: model::UnknownValue| ApiError::bad_request(e.to_string()))?;
        let order = state.orders.update_order_status(id, status).await?;
        Ok(Json(order).into_response())
    }

    async fn handle_delete_order(
        State(state): State<AppState>,
        Path(id): Path<i64>,
    ) -> Result<Response, ApiError> {
        if state.orders.delete_order(id).await? {
            Ok(Json(json!({ "message": "Order deleted successfully" })).into_response())
        } else {
            warn!("delete requested for missing order {id}");
            Err(ServiceError::NotFound.into())
        }
    }

    async fn handle_order_stats(State(state): State<AppState>) -> Result<Response, ApiError> {
        let stats = state.orders.order_stats().await?;
        Ok(Json(stats).into_response())
    }

    // ---- payments ----------------------------------------------------------

    async fn handle_process_payment(
        State(state): State<AppState>,
        Json(req): Json<ProcessPaymentRequest>,
    ) -> Result<Response, ApiError> {
        let payment = state.payments.process_payment(req).await?;

        // A failed attempt is persisted but still reported as a client
        // error, with the ledger row embedded for reconciliation.
        if payment.status == PaymentStatus::Failed {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "message": "Payment processing failed",
                    "payment": payment,
                })),
            )
                .into_response());
        }
        Ok((StatusCode::CREATED, Json(payment)).into_response())
    }

    async fn handle_refund(
        State(state): State<AppState>,
        Path(id): Path<i64>,
        Json(req): Json<RefundRequest>,
    ) -> Result<Response, ApiError> {
        let refund = state.payments.process_refund(id, req).await?;

        if refund.status == PaymentStatus::Failed {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "message": "Refund processing failed",
                    "payment": refund,
                })),
            )
                .into_response());
        }
        Ok((StatusCode::CREATED, Json(refund)).into_response())
    }

    async fn handle_list_payments(
        State(state): State<AppState>,
        Query(query): Query<PaymentListQuery>,
    ) -> Result<Response, ApiError> {
        let payments = state.payments.list_payments(query.into_filter()?).await?;
        Ok(Json(payments).into_response())
    }

    async fn handle_get_payment(
        State(state): State<AppState>,
        Path(id): Path<i64>,
    ) -> Result<Response, ApiError> {
        let payment = state.payments.get_payment(id).await?;
        Ok(Json(payment).into_response())
    }

    async fn handle_payments_for_order(
        State(state): State<AppState>,
        Path(order_id): Path<i64>,
    ) -> Result<Response, ApiError> {
        let payments = state.payments.payments_for_order(order_id).await?;
        Ok(Json(payments).into_response())
    }

    async fn handle_payment_stats(State(state): State<AppState>) -> Result<Response, ApiError> {
        let stats = state.payments.payment_stats().await?;
        Ok(Json(stats).into_response())
    }

    async fn handle_health() -> &'static str {
        "OK"
    }

    async fn handle_metrics(State(state): State<AppState>) -> Response {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();

        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
        }

        match String::from_utf8(buffer) {
            Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
            Err(e) => {
                error!("Failed to convert metrics to UTF-8: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid metrics data").into_response()
            }
        }
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_query_parses_valid_status_filter() {
        let query = OrderListQuery {
            customer_email: Some("jane@example.com".to_string()),
            status: Some("shipped".to_string()),
            from: None,
            to: None,
            limit: Some(10),
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.status, Some(OrderStatus::Shipped));
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn order_query_rejects_unknown_status() {
        let query = OrderListQuery {
            customer_email: None,
            status: Some("teleported".to_string()),
            from: None,
            to: None,
            limit: None,
        };
        let err = query.into_filter().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("teleported"));
    }

    #[test]
    fn payment_query_rejects_unknown_method() {
        let query = PaymentListQuery {
            order_id: None,
            method: Some("barter".to_string()),
            status: None,
            from: None,
            to: None,
            limit: None,
        };
        let err = query.into_filter().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn service_errors_map_to_expected_status_codes() {
        let cases = [
            (
                ServiceError::Validation("bad input".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (ServiceError::NotFound, StatusCode::NOT_FOUND),
        ];
        for (err, expected) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status, expected);
        }
    }
}
