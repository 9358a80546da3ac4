/// Order–Payment Transaction Engine
///
/// Main entry point for the backend service. Wires the configuration,
/// database pool, repositories, card gateway and business services
/// together, then serves the REST API until shutdown.
///
/// # Architecture
///
/// - Repository layer for data access (orders store + payment ledger)
/// - Service layer for business logic (order lifecycle, payment
///   orchestration)
/// - Gateway adapter for the external card processor
/// - HTTP layer for the REST endpoints, health probe and metrics
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use app_config::AppConfig;
use gateway::StripeGateway;
use repository::{PgOrdersRepository, PgPaymentsRepository};
use server::Server;
use service::{OrderServiceImpl, PaymentServiceImpl};

/// Initialize the tracing subscriber for logging
fn init_logger() {
    tracing_subscriber::fmt::init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    info!("Order-payment engine starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;

    let db_pool = match db::init_db_pool(&config).await {
        Ok(pool) => {
            info!("Database initialized successfully");
            pool
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return Err(anyhow::anyhow!("Failed to initialize database"));
        }
    };

    let orders_repo = PgOrdersRepository::new(db_pool.clone());
    let payments_repo = PgPaymentsRepository::new(db_pool.clone());

    let card_gateway = StripeGateway::new(
        config.gateway_api_key.clone(),
        config.gateway_base_url.clone(),
        config.gateway_timeout,
    )
    .context("Failed to initialize card gateway")?;

    let order_service = Arc::new(OrderServiceImpl::new(orders_repo));
    let payment_service = Arc::new(PaymentServiceImpl::new(
        payments_repo,
        card_gateway,
        config.gateway_currency.clone(),
    ));

    let http_server = Server::new(config.http_port, order_service, payment_service);
    http_server.start().await?;

    info!("Application stopped");
    Ok(())
}
