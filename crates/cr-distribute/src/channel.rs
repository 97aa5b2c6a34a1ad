//! Redis pub/sub distribution channel

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::Result;
use cr_common::ProxyResponse;

/// Configuration for the distribution channel
#[derive(Debug, Clone)]
pub struct DistributionConfig {
    /// Redis URL
    pub redis_url: String,
    /// Pub/sub channel the responses are broadcast on
    pub channel: String,
    /// Delay before resubscribing after a connection failure
    pub reconnect_delay: Duration,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channel: "certrelay:responses".to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl DistributionConfig {
    pub fn new(redis_url: String) -> Self {
        Self {
            redis_url,
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel: String) -> Self {
        self.channel = channel;
        self
    }
}

/// Local completion target for distributed responses.
///
/// Implemented by the response correlator; returns whether a pending
/// request with a matching correlation id was found and completed here.
pub trait ResponseSink: Send + Sync {
    fn try_complete(&self, response: ProxyResponse) -> bool;
}

/// Publishing side of the cross-instance channel
#[async_trait]
pub trait ResponseDistributor: Send + Sync {
    /// Broadcast a response to the other instances. Best-effort: failures
    /// are logged, never surfaced.
    async fn publish(&self, response: &ProxyResponse);

    fn is_enabled(&self) -> bool;
}

/// No-op distributor for when cross-instance distribution is disabled
pub struct NoOpDistributor;

#[async_trait]
impl ResponseDistributor for NoOpDistributor {
    async fn publish(&self, _response: &ProxyResponse) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Redis-backed distributor
pub struct RedisDistributor {
    config: DistributionConfig,
    conn: ConnectionManager,
}

impl RedisDistributor {
    /// Create a new distributor and connect to Redis
    pub async fn new(config: DistributionConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        info!(channel = %config.channel, "Redis distributor connected");
        Ok(Self { config, conn })
    }
}

#[async_trait]
impl ResponseDistributor for RedisDistributor {
    async fn publish(&self, response: &ProxyResponse) {
        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    correlation_id = %response.correlation_id,
                    error = %e,
                    "Failed to serialize response for distribution"
                );
                return;
            }
        };

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
            .arg(&self.config.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(receivers) => {
                debug!(
                    correlation_id = %response.correlation_id,
                    channel = %self.config.channel,
                    receivers,
                    "Response distributed to peer instances"
                );
            }
            Err(e) => {
                // Best-effort: the waiting instance degrades to a timeout
                warn!(
                    correlation_id = %response.correlation_id,
                    channel = %self.config.channel,
                    error = %e,
                    "Failed to distribute response"
                );
            }
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Subscribing side of the cross-instance channel.
///
/// Every instance subscribes; a received response that has no local pending
/// match is expected and silently ignored.
pub struct ResponseSubscriber {
    config: DistributionConfig,
    client: redis::Client,
    sink: Arc<dyn ResponseSink>,
    shutdown_tx: watch::Sender<bool>,
}

impl ResponseSubscriber {
    pub fn new(config: DistributionConfig, sink: Arc<dyn ResponseSink>) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            client,
            sink,
            shutdown_tx,
        })
    }

    /// Start the subscription loop in a background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match self.subscribe_and_consume(&mut shutdown_rx).await {
                    Ok(()) => break, // Clean shutdown
                    Err(e) => {
                        warn!(
                            channel = %self.config.channel,
                            error = %e,
                            delay = ?self.config.reconnect_delay,
                            "Subscription lost, resubscribing"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                            _ = shutdown_rx.changed() => break,
                        }
                    }
                }
            }

            info!(channel = %self.config.channel, "Response subscriber stopped");
        })
    }

    async fn subscribe_and_consume(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Result<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.config.channel).await?;

        info!(channel = %self.config.channel, "Subscribed to distribution channel");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                message = stream.next() => {
                    let Some(message) = message else {
                        return Err(redis::RedisError::from(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "pub/sub stream ended",
                        ))
                        .into());
                    };
                    self.handle_message(message);
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_message(&self, message: redis::Msg) {
        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Unreadable distribution message");
                return;
            }
        };

        let response: ProxyResponse = match serde_json::from_str(&payload) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Malformed distributed response");
                return;
            }
        };

        let correlation_id = response.correlation_id.clone();
        if self.sink.try_complete(response) {
            debug!(
                correlation_id = %correlation_id,
                "Distributed response completed a local pending request"
            );
        } else {
            // Broadcast reaches every instance; only one holds the match
            debug!(
                correlation_id = %correlation_id,
                "Distributed response has no local pending match"
            );
        }
    }

    /// Stop the subscription loop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_config_defaults() {
        let config = DistributionConfig::default();
        assert_eq!(config.channel, "certrelay:responses");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_noop_distributor_is_disabled() {
        let distributor = NoOpDistributor;
        assert!(!distributor.is_enabled());
        let response = ProxyResponse::success("corr-1", "health/ping", 200, serde_json::json!({}));
        distributor.publish(&response).await;
    }
}
