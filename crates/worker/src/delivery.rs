//! Signed webhook delivery
//!
//! One POST per subscriber, no retries. The outcome of a delivery is logged and
//! returned; it never turns into an error for the caller, so one failing
//! endpoint cannot affect its siblings or the scan cycle.
//!
//! Every request, whichever job it belongs to, takes a permit from one shared
//! semaphore, so `max_in_flight` caps the outbound HTTP calls of the process.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use eventhook_core::models::WebhookSubscription;
use eventhook_core::payload::OutboundPayload;
use eventhook_core::signature::{sign_payload, SIGNATURE_HEADER};

/// Longest response body kept for logs
const MAX_LOGGED_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Per-request timeout
    pub timeout: Duration,
    /// Outbound requests allowed at the same time
    pub max_in_flight: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_in_flight: 16,
        }
    }
}

impl DeliveryConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Result of one POST to one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Subscriber answered 2xx
    Delivered { status: u16 },
    /// Subscriber answered with any other status
    Rejected { status: u16, body: String },
    /// Request never got a response (connect error, timeout, serialization)
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Posts payloads to subscriber endpoints
#[derive(Clone)]
pub struct DeliveryEngine {
    http: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl DeliveryEngine {
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("eventhook/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self {
            http,
            permits: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        })
    }

    /// Requests currently allowed to start
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stamp, serialize, sign and POST `payload` to `subscription`
    #[instrument(
        skip(self, subscription, payload),
        fields(
            subscription = %subscription.name,
            subscription_id = subscription.id,
            kind = %payload.event_type,
            events = payload.event_count
        )
    )]
    pub async fn deliver(
        &self,
        subscription: &WebhookSubscription,
        payload: &OutboundPayload,
    ) -> DeliveryOutcome {
        let addressed = payload.for_subscription(subscription.id);
        let body = match serde_json::to_vec(&addressed) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize webhook payload");
                return DeliveryOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let mut request = self
            .http
            .post(&subscription.url)
            .header(CONTENT_TYPE, "application/json");

        if let Some(secret) = subscription.signing_secret() {
            match sign_payload(secret, &body) {
                Ok(signature) => request = request.header(SIGNATURE_HEADER, signature),
                Err(e) => warn!(error = %e, "Failed to sign payload, sending unsigned"),
            }
        }

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "Delivery limiter closed");
                return DeliveryOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        info!(url = %subscription.url, "Sending webhook");

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %subscription.url, error = %e, "Failed to send webhook");
                return DeliveryOutcome::Failed {
                    error: e.to_string(),
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(status = status.as_u16(), "Webhook delivered");
            return DeliveryOutcome::Delivered {
                status: status.as_u16(),
            };
        }

        let body = response.text().await.unwrap_or_default();
        let body = truncate(&body, MAX_LOGGED_BODY);
        warn!(status = status.as_u16(), response = %body, "Webhook rejected");
        DeliveryOutcome::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    debug!(original_len = text.len(), "Truncated response body");
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        // 'é' is two bytes; cutting inside it must back off
        assert_eq!(truncate("aé", 2), "a...");
    }

    #[test]
    fn test_outcome_success() {
        assert!(DeliveryOutcome::Delivered { status: 204 }.is_delivered());
        assert!(!DeliveryOutcome::Rejected {
            status: 500,
            body: String::new()
        }
        .is_delivered());
    }

    #[test]
    fn test_max_in_flight_floor() {
        let config = DeliveryConfig::default().with_max_in_flight(0);
        assert_eq!(config.max_in_flight, 1);

        let engine = DeliveryEngine::new(&DeliveryConfig::default().with_max_in_flight(3)).unwrap();
        assert_eq!(engine.available_permits(), 3);
    }
}
