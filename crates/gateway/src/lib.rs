//! Gateway adapter for the external card-payment network.
//!
//! Wraps the gateway's authorize-and-capture and refund primitives behind
//! the [`CardGateway`] trait and classifies every outcome into the fixed
//! [`GatewayOutcome`] taxonomy. The adapter never propagates an error past
//! its boundary: transport and gateway-side failures are returned as
//! `Failed` outcomes with the error text preserved as diagnostic message,
//! so the orchestrator can always write a ledger row.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// Classification of a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// The amount was captured.
    Succeeded,
    /// The gateway accepted the call but is still finalizing
    /// (3-D Secure challenge, asynchronous confirmation, ...).
    RequiresAction,
    /// The capture or refund did not happen.
    Failed,
}

/// Input for an authorize-and-capture call. Amounts are integer minor
/// units; use [`to_minor_units`] at the decimal boundary.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub payment_token: String,
    pub description: String,
    pub order_id: i64,
    pub transaction_id: String,
}

/// Result of an authorize-and-capture call. `gateway_id` is surfaced
/// whenever the gateway issued one, including on pending outcomes, to
/// support later reconciliation.
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub gateway_id: Option<String>,
    pub outcome: GatewayOutcome,
    pub message: String,
}

/// Result of a refund call.
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub gateway_refund_id: Option<String>,
    pub outcome: GatewayOutcome,
    pub message: String,
}

/// Card-network primitives used by the payment orchestrator.
///
/// Implementations must be infallible at the type level: a broken network
/// or a declined card is a `Failed` outcome, not an `Err`.
#[async_trait]
pub trait CardGateway: Send + Sync {
    /// Authorize and capture `amount_minor` against the given payment token.
    async fn authorize_and_capture(&self, req: &ChargeRequest) -> ChargeOutcome;

    /// Refund `amount_minor` of a previously captured gateway payment.
    async fn refund(&self, gateway_payment_id: &str, amount_minor: i64, reason: &str)
        -> RefundOutcome;
}

/// Converts a decimal currency amount into integer minor units,
/// rounding half-up (midpoint away from zero). Every decimal amount
/// crossing into the adapter goes through this single conversion.
/// Amounts beyond the i64 minor-unit range are clamped.
pub fn to_minor_units(amount: Decimal) -> i64 {
    let minor = (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    match minor.to_i64() {
        Some(v) => v,
        None if minor.is_sign_negative() => i64::MIN,
        None => i64::MAX,
    }
}

/// Maps a payment-intent status string from the gateway into the outcome
/// taxonomy. Anything the gateway reports on a 2xx response that is not
/// `succeeded` is still in flight from our point of view.
pub fn map_intent_status(status: &str) -> GatewayOutcome {
    if status == "succeeded" {
        GatewayOutcome::Succeeded
    } else {
        GatewayOutcome::RequiresAction
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Stripe-backed [`CardGateway`] over the REST API.
///
/// Uses manual confirmation with immediate confirm, so a single call
/// performs authorize-and-capture. Each request carries the order id and
/// transaction id as metadata for gateway-side audit.
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl StripeGateway {
    /// Builds the gateway client with rustls and a bounded request timeout.
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .context("Failed to build gateway HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Extracts the gateway's error message from a non-2xx response body,
    /// falling back to the raw body text.
    fn error_message(body: &str) -> String {
        match serde_json::from_str::<ApiErrorResponse>(body) {
            Ok(parsed) => parsed.error.message,
            Err(_) => body.to_string(),
        }
    }
}

#[async_trait]
impl CardGateway for StripeGateway {
    async fn authorize_and_capture(&self, req: &ChargeRequest) -> ChargeOutcome {
        let url = format!("{}/v1/payment_intents", self.base_url);
        let order_id = req.order_id.to_string();
        let amount = req.amount_minor.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", req.currency.as_str()),
            ("payment_method", req.payment_token.as_str()),
            ("confirmation_method", "manual"),
            ("confirm", "true"),
            ("description", req.description.as_str()),
            ("metadata[order_id]", order_id.as_str()),
            ("metadata[transaction_id]", req.transaction_id.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                warn!(transaction_id = %req.transaction_id, error = %e, "gateway request failed");
                return ChargeOutcome {
                    gateway_id: None,
                    outcome: GatewayOutcome::Failed,
                    message: format!("Card payment failed: {e}"),
                };
            }
        };

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = Self::error_message(&body);
            warn!(transaction_id = %req.transaction_id, %message, "gateway declined payment");
            return ChargeOutcome {
                gateway_id: None,
                outcome: GatewayOutcome::Failed,
                message: format!("Card payment failed: {message}"),
            };
        }

        match response.json::<IntentResponse>().await {
            Ok(intent) => {
                let outcome = map_intent_status(&intent.status);
                let message = match outcome {
                    GatewayOutcome::Succeeded => format!(
                        "Payment processed successfully via gateway. Payment ID: {}",
                        intent.id
                    ),
                    _ => format!(
                        "Gateway payment is {}. Further action may be needed.",
                        intent.status
                    ),
                };
                ChargeOutcome {
                    gateway_id: Some(intent.id),
                    outcome,
                    message,
                }
            }
            Err(e) => ChargeOutcome {
                gateway_id: None,
                outcome: GatewayOutcome::Failed,
                message: format!("Card payment failed: unreadable gateway response: {e}"),
            },
        }
    }

    async fn refund(
        &self,
        gateway_payment_id: &str,
        amount_minor: i64,
        reason: &str,
    ) -> RefundOutcome {
        let url = format!("{}/v1/refunds", self.base_url);
        let amount = amount_minor.to_string();
        let form = [
            ("payment_intent", gateway_payment_id),
            ("amount", amount.as_str()),
            ("reason", reason),
        ];

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .form(&form)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                warn!(%gateway_payment_id, error = %e, "gateway refund request failed");
                return RefundOutcome {
                    gateway_refund_id: None,
                    outcome: GatewayOutcome::Failed,
                    message: format!("Gateway refund failed: {e}"),
                };
            }
        };

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = Self::error_message(&body);
            warn!(%gateway_payment_id, %message, "gateway rejected refund");
            return RefundOutcome {
                gateway_refund_id: None,
                outcome: GatewayOutcome::Failed,
                message: format!("Gateway refund failed: {message}"),
            };
        }

        match response.json::<IntentResponse>().await {
            Ok(refund) => RefundOutcome {
                gateway_refund_id: Some(refund.id.clone()),
                outcome: GatewayOutcome::Succeeded,
                message: format!(
                    "Refund processed successfully via gateway. Refund ID: {}",
                    refund.id
                ),
            },
            Err(e) => RefundOutcome {
                gateway_refund_id: None,
                outcome: GatewayOutcome::Failed,
                message: format!("Gateway refund failed: unreadable gateway response: {e}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_minor_units_rounds_half_up() {
        assert_eq!(to_minor_units(dec!(25)), 2500);
        assert_eq!(to_minor_units(dec!(10.004)), 1000);
        assert_eq!(to_minor_units(dec!(10.005)), 1001);
        assert_eq!(to_minor_units(dec!(12.345)), 1235);
        assert_eq!(to_minor_units(dec!(-10.005)), -1001);
        assert_eq!(to_minor_units(dec!(0)), 0);
    }

    #[test]
    fn test_map_intent_status() {
        assert_eq!(map_intent_status("succeeded"), GatewayOutcome::Succeeded);
        assert_eq!(
            map_intent_status("requires_action"),
            GatewayOutcome::RequiresAction
        );
        assert_eq!(
            map_intent_status("processing"),
            GatewayOutcome::RequiresAction
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error": {"message": "Your card was declined.", "type": "card_error"}}"#;
        assert_eq!(StripeGateway::error_message(body), "Your card was declined.");

        // Unparseable bodies are passed through verbatim.
        assert_eq!(StripeGateway::error_message("bad gateway"), "bad gateway");
    }
}
