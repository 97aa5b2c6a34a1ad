//! Proxy client facade
//!
//! Composes registration and send into the synchronous-style call the
//! business layer uses. Registration happens before the physical send so a
//! fast reply can never race ahead of it.

use std::time::Duration;

use crate::correlator::ResponseCorrelator;
use crate::error::ProxyError;
use crate::sender::RequestSender;
use cr_common::{ProxyRequest, ProxyResponse};

/// Request/response client over the broker
pub struct ProxyClient {
    correlator: ResponseCorrelator,
    sender: RequestSender,
}

impl ProxyClient {
    pub fn new(correlator: ResponseCorrelator, sender: RequestSender) -> Self {
        Self { correlator, sender }
    }

    /// Send a request to its target proxy and await the correlated
    /// response.
    ///
    /// The caller sees either a populated response, a timeout-category
    /// response (retryable), or an admission/send error - never a
    /// silently-lost request.
    pub async fn send_and_await(&self, request: &ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.correlator.default_timeout());

        let pending =
            self.correlator
                .register(&request.correlation_id, &request.message_type, timeout)?;

        if let Err(e) = self.sender.send(request).await {
            // The request never left this instance; clean up so no pending
            // entry lingers until its timeout
            self.correlator.cancel(&request.correlation_id);
            return Err(e);
        }

        pending.await_response().await
    }

    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }
}
