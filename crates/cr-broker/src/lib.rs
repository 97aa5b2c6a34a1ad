use async_trait::async_trait;
use cr_common::ProxyResponse;

pub mod error;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use error::BrokerError;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Transport-level attributes attached to an outbound broker message.
///
/// The type tag doubles as the routing hint on the proxy side; the
/// correlation id lets the transport layer relate the eventual reply.
#[derive(Debug, Clone)]
pub struct MessageAttributes {
    pub type_tag: String,
    pub correlation_id: String,
}

/// Trait for sending raw messages to the broker
#[async_trait]
pub trait BrokerSender: Send + Sync {
    /// Identifier for logging (broker URI, exchange, ...)
    fn identifier(&self) -> &str;

    /// Send a payload to `destination` with the given routing key and
    /// transport attributes. A returned error means this single attempt
    /// failed; retry policy lives with the caller.
    async fn send(
        &self,
        destination: &str,
        routing_key: &str,
        attributes: &MessageAttributes,
        payload: &[u8],
    ) -> Result<()>;
}

/// Callback boundary for inbound response deliveries.
///
/// An `Err` tells the consumer the message was not handled and the broker's
/// redelivery policy should apply; `Ok` consumes the message.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_response(&self, response: ProxyResponse) -> anyhow::Result<()>;
}

/// Trait for consuming proxy responses from the broker
#[async_trait]
pub trait ResponseConsumer: Send + Sync {
    /// Get the unique identifier for this consumer (queue name)
    fn identifier(&self) -> &str;

    /// Run the consume loop, dispatching every delivery to `handler`.
    /// Returns when the consumer is stopped or the stream ends.
    async fn run(&self, handler: std::sync::Arc<dyn DeliveryHandler>) -> Result<()>;

    /// Check if the consumer is healthy
    fn is_healthy(&self) -> bool;

    /// Stop the consumer
    async fn stop(&self);
}
