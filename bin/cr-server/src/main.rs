//! CertRelay Proxy Messaging Service
//!
//! Consumes proxy responses from the broker and resolves them through the
//! tiered listener: fire-and-forget handlers, local correlation, then
//! cross-instance distribution.
//!
//! ## Horizontal Scaling
//!
//! Enable `[distribution]` (Redis pub/sub) when running multiple instances:
//! a reply delivered to the wrong instance is broadcast so the instance
//! holding the pending request can complete it.
//!
//! ## Development Mode
//!
//! Set `CERTRELAY_DEV_MODE=true` to enable a periodic health-check request
//! against the proxy named by `CERTRELAY_DEV_PROXY_ID` (default "dev"),
//! exercising the full send-and-await path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};

use cr_broker::amqp::{AmqpConfig, AmqpResponseConsumer, AmqpSender};
use cr_broker::ResponseConsumer;
use cr_config::AppConfig;
use cr_distribute::{
    DistributionConfig, NoOpDistributor, RedisDistributor, ResponseDistributor, ResponseSink,
    ResponseSubscriber,
};
use cr_proxy::{
    BrokerSettings, CorrelatorConfig, HandlerRegistry, ProxyClient, RequestSender,
    ResponseCorrelator, ResponseListener, RetryPolicy,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    cr_common::logging::init_logging("cr-server");

    info!("Starting CertRelay proxy messaging service");

    // 1. Load configuration (TOML file + env overrides)
    let config = AppConfig::load()?;

    // 2. Correlator (pending-request table)
    let correlator = ResponseCorrelator::new(CorrelatorConfig {
        max_pending: config.proxy.max_pending,
        default_timeout: Duration::from_secs(config.proxy.default_timeout_seconds),
    });

    // 3. Fire-and-forget handler registry
    // Business collaborators register their own handlers here at startup
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("health/*", Arc::new(EventLogHandler));
    registry.register("event/*", Arc::new(EventLogHandler));
    info!(handlers = registry.handler_count(), "Handler registry initialized");

    // 4. Cross-instance distribution (optional)
    let (distributor, subscriber): (
        Arc<dyn ResponseDistributor>,
        Option<Arc<ResponseSubscriber>>,
    ) = if config.distribution.enabled {
        info!(
            redis_url = %config.distribution.redis_url,
            channel = %config.distribution.channel,
            "Initializing cross-instance distribution"
        );
        let dist_config = DistributionConfig::new(config.distribution.redis_url.clone())
            .with_channel(config.distribution.channel.clone());
        let distributor = Arc::new(RedisDistributor::new(dist_config.clone()).await?);
        let sink: Arc<dyn ResponseSink> = Arc::new(correlator.clone());
        let subscriber = Arc::new(ResponseSubscriber::new(dist_config, sink)?);
        (distributor, Some(subscriber))
    } else {
        info!("Cross-instance distribution disabled - single instance mode");
        (Arc::new(NoOpDistributor), None)
    };

    let subscriber_handle = subscriber.clone().map(|s| s.start());

    // 5. Broker transport
    let amqp_config = AmqpConfig {
        uri: config.broker.uri.clone(),
        response_queue: config.broker.response_queue.clone(),
        prefetch_count: config.broker.prefetch_count,
        durable: config.broker.durable,
        ..Default::default()
    };
    let transport = Arc::new(AmqpSender::new(amqp_config.clone()).await?);
    let consumer = Arc::new(AmqpResponseConsumer::new(amqp_config).await?);

    // 6. Request sender and client facade
    let request_sender = RequestSender::new(
        transport,
        BrokerSettings {
            exchange: config.broker.exchange.clone(),
            exchange_prefix: config.broker.exchange_prefix.clone(),
            request_topic_prefix: config.broker.request_topic_prefix.clone(),
        },
        RetryPolicy {
            enabled: config.proxy.retry.enabled,
            max_attempts: config.proxy.retry.max_attempts,
            initial_interval: config.proxy.retry.initial_interval(),
            multiplier: config.proxy.retry.multiplier,
            max_interval: config.proxy.retry.max_interval(),
        },
    );
    let client = Arc::new(ProxyClient::new(correlator.clone(), request_sender));

    // 7. Tiered listener consuming the response queue
    let listener = Arc::new(ResponseListener::new(
        registry.clone(),
        correlator.clone(),
        distributor,
    ));

    let consumer_task = {
        let consumer = consumer.clone();
        let listener = listener.clone();
        tokio::spawn(async move {
            if let Err(e) = consumer.run(listener).await {
                error!(error = %e, "Response consumer exited with error");
            }
        })
    };

    // 8. Dev-mode health-check loop
    let dev_task = if config.dev_mode {
        Some(spawn_dev_health_loop(client.clone()))
    } else {
        None
    };

    info!(
        queue = %config.broker.response_queue,
        max_pending = config.proxy.max_pending,
        distribution = config.distribution.enabled,
        "CertRelay started. Press Ctrl+C to shutdown."
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received...");

    // Graceful shutdown: stop inbound first, then drain pending callers
    if let Some(task) = dev_task {
        task.abort();
    }
    consumer.stop().await;
    if let Some(ref subscriber) = subscriber {
        subscriber.shutdown();
    }
    correlator.shutdown();

    if let Some(handle) = subscriber_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    match tokio::time::timeout(Duration::from_secs(10), consumer_task).await {
        Ok(_) => info!("Consumer task completed gracefully"),
        Err(_) => warn!("Consumer task did not complete within 10s timeout"),
    }

    info!("CertRelay shutdown complete");
    Ok(())
}

/// Periodically exercises the full send-and-await path in dev mode
fn spawn_dev_health_loop(client: Arc<ProxyClient>) -> tokio::task::JoinHandle<()> {
    let proxy_id =
        std::env::var("CERTRELAY_DEV_PROXY_ID").unwrap_or_else(|_| "dev".to_string());

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;

            let request = cr_common::ProxyRequest::new(
                "GET:/v1/health",
                &proxy_id,
                serde_json::json!({}),
            )
            .with_timeout_seconds(10);

            match client.send_and_await(&request).await {
                Ok(response) if response.is_success() => {
                    info!(proxy_id = %proxy_id, "Dev health check succeeded");
                }
                Ok(response) => {
                    warn!(
                        proxy_id = %proxy_id,
                        category = ?response.error_category,
                        retryable = response.retryable,
                        "Dev health check returned failure"
                    );
                }
                Err(e) => {
                    warn!(proxy_id = %proxy_id, error = %e, "Dev health check failed to send");
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// Built-in fire-and-forget handler logging proxy notifications
use async_trait::async_trait;
use cr_common::ProxyResponse;
use cr_proxy::ResponseHandler;

struct EventLogHandler;

#[async_trait]
impl ResponseHandler for EventLogHandler {
    async fn handle(&self, response: &ProxyResponse) -> anyhow::Result<()> {
        info!(
            message_type = %response.message_type,
            correlation_id = %response.correlation_id,
            success = response.is_success(),
            "Proxy notification received"
        );
        Ok(())
    }
}
