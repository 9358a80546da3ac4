use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// `AppConfig` holds all configuration parameters required by the engine.
///
/// The configuration is loaded from environment variables (optionally via a
/// `.env` file) or falls back to defaults. Fields cover the database, the
/// HTTP server, graceful shutdown and the card-payment gateway.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Database settings ---
    /// Database hostname or service name (e.g. "postgres" in Docker Compose).
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,

    // --- Shutdown timeout ---
    /// Graceful shutdown timeout (human-friendly format, e.g. "5s", "1m").
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    // --- Card gateway ---
    /// Secret API key for the card-payment gateway.
    pub gateway_api_key: String,
    /// Base URL of the gateway REST API.
    pub gateway_base_url: String,
    /// Bound on each gateway request. The gateway call is the only
    /// network suspension point in a payment, so this caps request latency.
    #[serde(deserialize_with = "deserialize_duration")]
    pub gateway_timeout: Duration,
    /// ISO currency code charges are denominated in.
    pub gateway_currency: String,
}

/// Custom deserializer for duration fields.
/// Accepts human-readable formats like "5s", "1m", etc.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid or missing required values.
    pub fn load() -> Result<Self> {
        // Load from .env file (for Docker environment)
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "store_user")?
            .set_default("db_password", "securepassword")?
            .set_default("db_name", "store_db")?
            // HTTP
            .set_default("http_port", 8081)?
            // Shutdown
            .set_default("shutdown_timeout", "5s")?
            // Gateway
            .set_default("gateway_api_key", "sk_test_placeholder")?
            .set_default("gateway_base_url", "https://api.stripe.com")?
            .set_default("gateway_timeout", "15s")?
            .set_default("gateway_currency", "usd")?
            .add_source(config::Environment::default().separator("_"))
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }
}
