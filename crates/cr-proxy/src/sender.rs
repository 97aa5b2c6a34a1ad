//! Request Sender - broker addressing and retry
//!
//! Builds the broker destination and routing metadata for a proxy request
//! and drives the send through a configurable retry policy. A failure after
//! exhausting retries is a [`ProxyError::SendFailure`] - distinct from a
//! timeout, which is a successful send with no reply.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ProxyError;
use cr_broker::{BrokerSender, MessageAttributes};
use cr_common::ProxyRequest;

/// Broker addressing settings
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Exchange/topic the requests are published to
    pub exchange: String,
    /// Broker-dependent address prefix; empty means the exchange name is
    /// the destination directly
    pub exchange_prefix: String,
    /// Routing key prefix; the target proxy id is appended
    pub request_topic_prefix: String,
}

impl BrokerSettings {
    /// Destination the broker client publishes to. Some brokers route via
    /// the topic name directly, others via a prefixed address.
    pub fn destination(&self) -> String {
        format!("{}{}", self.exchange_prefix, self.exchange)
    }

    /// Per-proxy routing key, e.g. "proxy.agent-7"
    pub fn routing_key(&self, proxy_id: &str) -> String {
        format!("{}.{}", self.request_topic_prefix, proxy_id)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            exchange: "certrelay.requests".to_string(),
            exchange_prefix: String::new(),
            request_topic_prefix: "proxy".to_string(),
        }
    }
}

/// Retry policy for broker sends
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Disabled means a single attempt with no backoff
    pub enabled: bool,
    /// Maximum attempts including the first
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_interval: Duration::from_millis(500),
            multiplier: 2.0,
            max_interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    fn attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Next backoff interval after the given one
    fn backoff_after(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// Sends proxy requests to the broker
pub struct RequestSender {
    broker: Arc<dyn BrokerSender>,
    settings: BrokerSettings,
    retry: RetryPolicy,
}

impl RequestSender {
    pub fn new(broker: Arc<dyn BrokerSender>, settings: BrokerSettings, retry: RetryPolicy) -> Self {
        Self {
            broker,
            settings,
            retry,
        }
    }

    /// Send a request to its target proxy, retrying per policy.
    pub async fn send(&self, request: &ProxyRequest) -> Result<(), ProxyError> {
        let payload = serde_json::to_vec(request)?;
        let destination = self.settings.destination();
        let routing_key = self.settings.routing_key(&request.proxy_id);
        // Transport-level tags: the type attribute carries the routing key,
        // the correlation attribute carries the request correlation id
        let attributes = MessageAttributes {
            type_tag: routing_key.clone(),
            correlation_id: request.correlation_id.clone(),
        };

        let max_attempts = self.retry.attempts();
        let mut interval = self.retry.initial_interval;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self
                .broker
                .send(&destination, &routing_key, &attributes, &payload)
                .await
            {
                Ok(()) => {
                    if attempt > 1 {
                        info!(
                            correlation_id = %request.correlation_id,
                            attempt,
                            "Send succeeded after retries"
                        );
                    } else {
                        debug!(
                            correlation_id = %request.correlation_id,
                            proxy_id = %request.proxy_id,
                            routing_key = %routing_key,
                            "Request sent"
                        );
                    }
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        warn!(
                            correlation_id = %request.correlation_id,
                            attempt,
                            max_attempts,
                            delay_ms = interval.as_millis() as u64,
                            error = %last_error,
                            "Send failed, retrying"
                        );
                        tokio::time::sleep(interval).await;
                        interval = self.retry.backoff_after(interval);
                    }
                }
            }
        }

        Err(ProxyError::SendFailure(format!(
            "{} after {} attempt(s): {}",
            self.settings.destination(),
            max_attempts,
            last_error
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_with_prefix() {
        let settings = BrokerSettings {
            exchange: "requests".to_string(),
            exchange_prefix: "topic://".to_string(),
            request_topic_prefix: "proxy".to_string(),
        };
        assert_eq!(settings.destination(), "topic://requests");
        assert_eq!(settings.routing_key("agent-7"), "proxy.agent-7");
    }

    #[test]
    fn test_destination_without_prefix() {
        let settings = BrokerSettings::default();
        assert_eq!(settings.destination(), "certrelay.requests");
    }

    #[test]
    fn test_backoff_progression_is_capped() {
        let policy = RetryPolicy {
            enabled: true,
            max_attempts: 5,
            initial_interval: Duration::from_millis(100),
            multiplier: 3.0,
            max_interval: Duration::from_millis(500),
        };

        let first = policy.initial_interval;
        let second = policy.backoff_after(first);
        let third = policy.backoff_after(second);
        assert_eq!(second, Duration::from_millis(300));
        assert_eq!(third, Duration::from_millis(500)); // capped

        assert_eq!(policy.attempts(), 5);
        assert_eq!(RetryPolicy::disabled().attempts(), 1);
    }
}
