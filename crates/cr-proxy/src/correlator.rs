//! Response Correlator - pending request table
//!
//! Owns the in-memory table of requests awaiting a proxy response:
//! - Admission control against a configured capacity bound
//! - One scheduled timeout task per pending entry
//! - At-most-once completion across complete/timeout/cancel/shutdown races
//! - Full drain on shutdown with synthetic abort responses
//!
//! The table's atomic remove is the single arbitration point: whichever of
//! {completion, timeout firing, cancellation, shutdown} removes an entry
//! first resolves its future; every other path observes an absent entry and
//! does nothing. There is no lock held across a check-then-act sequence.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use cr_common::ProxyResponse;
use cr_distribute::ResponseSink;

/// Configuration for the response correlator
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Maximum number of concurrently pending requests
    pub max_pending: usize,
    /// Timeout applied when a request carries none
    pub default_timeout: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            max_pending: 1000,
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// A single entry in the pending table
struct PendingRequest {
    tx: oneshot::Sender<ProxyResponse>,
    /// Echoed into synthetic timeout/abort responses
    message_type: String,
    registered_at: Instant,
    timeout_task: tokio::task::JoinHandle<()>,
}

/// An unresolved result future returned by [`ResponseCorrelator::register`].
pub struct PendingResponse {
    correlation_id: String,
    rx: oneshot::Receiver<ProxyResponse>,
}

impl PendingResponse {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Await the response. Resolves with a populated or synthetic
    /// [`ProxyResponse`], or with [`ProxyError::Cancelled`] if the request
    /// was cancelled by the caller.
    pub async fn await_response(self) -> Result<ProxyResponse, ProxyError> {
        let Self { correlation_id, rx } = self;
        rx.await.map_err(|_| ProxyError::Cancelled(correlation_id))
    }
}

struct CorrelatorInner {
    config: CorrelatorConfig,
    pending: DashMap<String, PendingRequest>,
    /// Reserved-slot counter; kept exact via fetch_update so the capacity
    /// bound holds under concurrent registration
    pending_count: AtomicUsize,
    shutting_down: AtomicBool,
}

impl CorrelatorInner {
    /// Remove an entry and resolve it with `response`. Returns whether an
    /// entry existed.
    fn remove_and_resolve(&self, correlation_id: &str, response: ProxyResponse) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, entry)) => {
                self.pending_count.fetch_sub(1, Ordering::SeqCst);
                entry.timeout_task.abort();
                // The caller may have dropped the receiver; that is fine
                let _ = entry.tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Timeout firing path. Losing the race against complete/cancel means
    /// the entry is already gone and this is a no-op.
    fn expire(&self, correlation_id: &str) {
        if let Some((_, entry)) = self.pending.remove(correlation_id) {
            self.pending_count.fetch_sub(1, Ordering::SeqCst);
            let elapsed = entry.registered_at.elapsed();
            warn!(
                correlation_id = %correlation_id,
                message_type = %entry.message_type,
                elapsed_ms = elapsed.as_millis() as u64,
                "Pending request timed out"
            );
            let _ = entry
                .tx
                .send(ProxyResponse::timed_out(correlation_id, &entry.message_type));
        }
    }
}

/// Pending request table with timeout scheduling and capacity enforcement.
///
/// Cheap to clone; all clones share the same table.
#[derive(Clone)]
pub struct ResponseCorrelator {
    inner: Arc<CorrelatorInner>,
}

impl ResponseCorrelator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                config,
                pending: DashMap::new(),
                pending_count: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Register a pending request and schedule its timeout.
    ///
    /// Must be called before the request is physically sent, so a fast
    /// response cannot arrive ahead of the registration.
    pub fn register(
        &self,
        correlation_id: &str,
        message_type: &str,
        timeout: Duration,
    ) -> Result<PendingResponse, ProxyError> {
        let inner = &self.inner;

        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(ProxyError::ShuttingDown);
        }

        // Reserve a slot; the counter is the capacity arbiter, not the map
        let max = inner.config.max_pending;
        if inner
            .pending_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                if count >= max {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_err()
        {
            return Err(ProxyError::CapacityExceeded(max));
        }

        let (tx, rx) = oneshot::channel();

        match inner.pending.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => {
                inner.pending_count.fetch_sub(1, Ordering::SeqCst);
                return Err(ProxyError::DuplicateCorrelation(correlation_id.to_string()));
            }
            Entry::Vacant(vacant) => {
                let timeout_task = tokio::spawn({
                    let inner = Arc::clone(inner);
                    let correlation_id = correlation_id.to_string();
                    async move {
                        tokio::time::sleep(timeout).await;
                        inner.expire(&correlation_id);
                    }
                });

                vacant.insert(PendingRequest {
                    tx,
                    message_type: message_type.to_string(),
                    registered_at: Instant::now(),
                    timeout_task,
                });
            }
        }

        // Shutdown may have begun between the flag check and the insert;
        // the drain will not have seen this entry, so undo it here
        if inner.shutting_down.load(Ordering::SeqCst) {
            if let Some((_, entry)) = inner.pending.remove(correlation_id) {
                inner.pending_count.fetch_sub(1, Ordering::SeqCst);
                entry.timeout_task.abort();
            }
            return Err(ProxyError::ShuttingDown);
        }

        debug!(
            correlation_id = %correlation_id,
            message_type = %message_type,
            timeout_ms = timeout.as_millis() as u64,
            pending = self.pending_count(),
            "Registered pending request"
        );

        Ok(PendingResponse {
            correlation_id: correlation_id.to_string(),
            rx,
        })
    }

    /// Complete a pending request with a received response.
    ///
    /// An unknown correlation id is a silent no-op: the response may be a
    /// duplicate, a late arrival after timeout, or intended for a different
    /// instance.
    pub fn complete(&self, response: ProxyResponse) {
        let _ = self.try_complete(response);
    }

    /// Complete a pending request, reporting whether a local entry existed.
    pub fn try_complete(&self, response: ProxyResponse) -> bool {
        let correlation_id = response.correlation_id.clone();
        let completed = self.inner.remove_and_resolve(&correlation_id, response);
        if completed {
            debug!(correlation_id = %correlation_id, "Completed pending request");
        } else {
            debug!(
                correlation_id = %correlation_id,
                "No local pending request for response"
            );
        }
        completed
    }

    /// Cancel a pending request. The awaiting caller observes
    /// [`ProxyError::Cancelled`], not a response value.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        match self.inner.pending.remove(correlation_id) {
            Some((_, entry)) => {
                self.inner.pending_count.fetch_sub(1, Ordering::SeqCst);
                entry.timeout_task.abort();
                // Dropping the sender resolves the receiver as cancelled
                debug!(correlation_id = %correlation_id, "Cancelled pending request");
                true
            }
            None => false,
        }
    }

    /// Drain the table: every remaining future resolves with a synthetic
    /// abort response. Idempotent; `register` fails fast afterwards.
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let ids: Vec<String> = self.inner.pending.iter().map(|e| e.key().clone()).collect();
        let drained = ids.len();
        for correlation_id in ids {
            if let Some((_, entry)) = self.inner.pending.remove(&correlation_id) {
                self.inner.pending_count.fetch_sub(1, Ordering::SeqCst);
                entry.timeout_task.abort();
                let _ = entry
                    .tx
                    .send(ProxyResponse::aborted(&correlation_id, &entry.message_type));
            }
        }

        info!(drained, "Response correlator shut down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending_count.load(Ordering::SeqCst)
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.config.default_timeout
    }
}

impl ResponseSink for ResponseCorrelator {
    fn try_complete(&self, response: ProxyResponse) -> bool {
        ResponseCorrelator::try_complete(self, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_then_complete() {
        let correlator = ResponseCorrelator::new(CorrelatorConfig::default());
        let pending = correlator
            .register("corr-1", "GET:/v1/info", Duration::from_secs(5))
            .unwrap();
        assert_eq!(correlator.pending_count(), 1);

        let response = ProxyResponse::success("corr-1", "GET:/v1/info", 200, serde_json::json!({"ok": true}));
        assert!(correlator.try_complete(response));
        assert_eq!(correlator.pending_count(), 0);

        let resolved = pending.await_response().await.unwrap();
        assert!(resolved.is_success());
        assert_eq!(resolved.status, Some(200));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let correlator = ResponseCorrelator::new(CorrelatorConfig::default());
        let _pending = correlator
            .register("corr-1", "GET:/v1/info", Duration::from_secs(5))
            .unwrap();

        let result = correlator.register("corr-1", "GET:/v1/info", Duration::from_secs(5));
        assert!(matches!(result, Err(ProxyError::DuplicateCorrelation(_))));
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_resolves_as_cancelled() {
        let correlator = ResponseCorrelator::new(CorrelatorConfig::default());
        let pending = correlator
            .register("corr-1", "GET:/v1/info", Duration::from_secs(5))
            .unwrap();

        assert!(correlator.cancel("corr-1"));
        assert!(!correlator.cancel("corr-1"));
        assert_eq!(correlator.pending_count(), 0);

        let result = pending.await_response().await;
        assert!(matches!(result, Err(ProxyError::Cancelled(_))));
    }
}
