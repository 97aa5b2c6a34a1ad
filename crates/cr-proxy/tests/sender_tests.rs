//! RequestSender Tests
//!
//! Tests for:
//! - Single attempt when retry is disabled
//! - Bounded retries with recovery mid-way
//! - SendFailure after exhausting attempts
//! - Transport attributes carrying the correlation id and type tag

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cr_broker::{BrokerError, BrokerSender, MessageAttributes};
use cr_common::ProxyRequest;
use cr_proxy::{BrokerSettings, ProxyError, RequestSender, RetryPolicy};

struct FlakyBroker {
    attempts: AtomicU32,
    fail_first: u32,
    last_attributes: Mutex<Option<(String, String, MessageAttributes)>>,
}

impl FlakyBroker {
    fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU32::new(0),
            fail_first,
            last_attributes: Mutex::new(None),
        })
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerSender for FlakyBroker {
    fn identifier(&self) -> &str {
        "flaky-test-broker"
    }

    async fn send(
        &self,
        destination: &str,
        routing_key: &str,
        attributes: &MessageAttributes,
        _payload: &[u8],
    ) -> cr_broker::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_attributes.lock() = Some((
            destination.to_string(),
            routing_key.to_string(),
            attributes.clone(),
        ));
        if attempt <= self.fail_first {
            return Err(BrokerError::Publish(format!("attempt {attempt} refused")));
        }
        Ok(())
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        enabled: true,
        max_attempts,
        initial_interval: Duration::from_millis(1),
        multiplier: 2.0,
        max_interval: Duration::from_millis(8),
    }
}

fn request() -> ProxyRequest {
    ProxyRequest::new(
        "POST:/v1/certificates/issue",
        "agent-7",
        serde_json::json!({"csr": "..."}),
    )
}

#[tokio::test]
async fn test_disabled_retry_is_single_attempt() {
    let broker = FlakyBroker::new(u32::MAX);
    let sender = RequestSender::new(
        broker.clone(),
        BrokerSettings::default(),
        RetryPolicy::disabled(),
    );

    let result = sender.send(&request()).await;
    assert!(matches!(result, Err(ProxyError::SendFailure(_))));
    assert_eq!(broker.attempts(), 1);
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failures() {
    let broker = FlakyBroker::new(2);
    let sender = RequestSender::new(broker.clone(), BrokerSettings::default(), fast_retry(5));

    sender.send(&request()).await.unwrap();
    assert_eq!(broker.attempts(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_surface_send_failure() {
    let broker = FlakyBroker::new(u32::MAX);
    let sender = RequestSender::new(broker.clone(), BrokerSettings::default(), fast_retry(4));

    let result = sender.send(&request()).await;
    match result {
        Err(ProxyError::SendFailure(message)) => {
            assert!(message.contains("4 attempt(s)"));
        }
        other => panic!("expected SendFailure, got {other:?}"),
    }
    assert_eq!(broker.attempts(), 4);
}

#[tokio::test]
async fn test_transport_attributes_carry_routing_metadata() {
    let broker = FlakyBroker::new(0);
    let settings = BrokerSettings {
        exchange: "ca.requests".to_string(),
        exchange_prefix: "topic://".to_string(),
        request_topic_prefix: "proxy".to_string(),
    };
    let sender = RequestSender::new(broker.clone(), settings, RetryPolicy::disabled());

    let request = request();
    sender.send(&request).await.unwrap();

    let recorded = broker.last_attributes.lock().clone().unwrap();
    assert_eq!(recorded.0, "topic://ca.requests");
    assert_eq!(recorded.1, "proxy.agent-7");
    assert_eq!(recorded.2.correlation_id, request.correlation_id);
    assert_eq!(recorded.2.type_tag, "proxy.agent-7");
}
