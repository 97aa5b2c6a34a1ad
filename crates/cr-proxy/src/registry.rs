//! Message-Type Handler Registry
//!
//! Fire-and-forget handlers keyed by message-type patterns. A pattern is
//! either an exact message type ("health/ping") or a wildcard form ending
//! in `*` ("event/*"). Resolution precedence: exact match first, then the
//! wildcard with the longest prefix.
//!
//! Handlers are registered at startup. A duplicate pattern keeps the first
//! registration and logs the conflict; a blank pattern is skipped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use cr_common::ProxyResponse;

/// A fire-and-forget handler for inbound proxy messages.
///
/// Errors are contained by the registry: a failing handler is logged and
/// the broker message is still considered consumed.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(&self, response: &ProxyResponse) -> anyhow::Result<()>;
}

struct WildcardEntry {
    /// Full pattern string as registered, for conflict reporting
    pattern: String,
    /// Pattern minus the trailing `*`
    prefix: String,
    handler: Arc<dyn ResponseHandler>,
}

/// Registry of type-based handlers
pub struct HandlerRegistry {
    exact: RwLock<HashMap<String, Arc<dyn ResponseHandler>>>,
    /// Kept sorted by descending prefix length so the first match wins
    wildcards: RwLock<Vec<WildcardEntry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            exact: RwLock::new(HashMap::new()),
            wildcards: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler for a pattern. Returns whether the registration
    /// was accepted.
    pub fn register(&self, pattern: &str, handler: Arc<dyn ResponseHandler>) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            warn!("Skipping handler registration with blank pattern");
            return false;
        }

        if let Some(prefix) = pattern.strip_suffix('*') {
            let mut wildcards = self.wildcards.write();
            if wildcards.iter().any(|entry| entry.pattern == pattern) {
                warn!(pattern = %pattern, "Duplicate handler pattern, keeping first registration");
                return false;
            }
            wildcards.push(WildcardEntry {
                pattern: pattern.to_string(),
                prefix: prefix.to_string(),
                handler,
            });
            wildcards.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
            debug!(pattern = %pattern, "Registered wildcard handler");
            true
        } else {
            let mut exact = self.exact.write();
            if exact.contains_key(pattern) {
                warn!(pattern = %pattern, "Duplicate handler pattern, keeping first registration");
                return false;
            }
            exact.insert(pattern.to_string(), handler);
            debug!(pattern = %pattern, "Registered handler");
            true
        }
    }

    /// Check whether any handler matches the message type
    pub fn has_handler(&self, message_type: &str) -> bool {
        self.resolve(message_type).is_some()
    }

    /// Resolve the best-matching handler: exact beats wildcard, longest
    /// wildcard prefix beats shorter ones.
    fn resolve(&self, message_type: &str) -> Option<Arc<dyn ResponseHandler>> {
        if let Some(handler) = self.exact.read().get(message_type) {
            return Some(handler.clone());
        }

        self.wildcards
            .read()
            .iter()
            .find(|entry| message_type.starts_with(&entry.prefix))
            .map(|entry| entry.handler.clone())
    }

    /// Dispatch a message to its matching handler.
    ///
    /// Returns true only when a handler matched and completed without
    /// error. A throwing handler is contained here: the error is logged and
    /// false is returned, but the message is not redelivered.
    pub async fn dispatch(&self, response: &ProxyResponse) -> bool {
        let Some(handler) = self.resolve(&response.message_type) else {
            return false;
        };

        match handler.handle(response).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    message_type = %response.message_type,
                    correlation_id = %response.correlation_id,
                    error = %e,
                    "Handler failed, message consumed anyway"
                );
                false
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.exact.read().len() + self.wildcards.read().len()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResponseHandler for CountingHandler {
        async fn handle(&self, _response: &ProxyResponse) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler exploded");
            }
            Ok(())
        }
    }

    fn response(message_type: &str) -> ProxyResponse {
        ProxyResponse::success("corr-1", message_type, 200, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_exact_match_beats_wildcard() {
        let registry = HandlerRegistry::new();
        let wildcard = CountingHandler::new();
        let exact = CountingHandler::new();
        assert!(registry.register("health/*", wildcard.clone()));
        assert!(registry.register("health/ping", exact.clone()));

        assert!(registry.dispatch(&response("health/ping")).await);
        assert_eq!(exact.calls(), 1);
        assert_eq!(wildcard.calls(), 0);
    }

    #[tokio::test]
    async fn test_wildcard_matches_prefix() {
        let registry = HandlerRegistry::new();
        let wildcard = CountingHandler::new();
        registry.register("health/*", wildcard.clone());

        assert!(registry.dispatch(&response("health/status")).await);
        assert_eq!(wildcard.calls(), 1);
    }

    #[tokio::test]
    async fn test_longest_wildcard_prefix_wins() {
        let registry = HandlerRegistry::new();
        let broad = CountingHandler::new();
        let narrow = CountingHandler::new();
        registry.register("event/*", broad.clone());
        registry.register("event/connector/*", narrow.clone());

        assert!(registry.dispatch(&response("event/connector/registered")).await);
        assert_eq!(narrow.calls(), 1);
        assert_eq!(broad.calls(), 0);

        assert!(registry.dispatch(&response("event/other")).await);
        assert_eq!(broad.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_match_returns_false() {
        let registry = HandlerRegistry::new();
        registry.register("health/*", CountingHandler::new());

        assert!(!registry.dispatch(&response("event/other")).await);
        assert!(!registry.has_handler("event/other"));
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let registry = HandlerRegistry::new();
        let handler = CountingHandler::failing();
        registry.register("health/ping", handler.clone());

        assert!(!registry.dispatch(&response("health/ping")).await);
        assert_eq!(handler.calls(), 1);
    }

    #[test]
    fn test_duplicate_pattern_keeps_first() {
        let registry = HandlerRegistry::new();
        assert!(registry.register("health/ping", CountingHandler::new()));
        assert!(!registry.register("health/ping", CountingHandler::new()));
        assert_eq!(registry.handler_count(), 1);
    }

    #[test]
    fn test_blank_pattern_skipped() {
        let registry = HandlerRegistry::new();
        assert!(!registry.register("  ", CountingHandler::new()));
        assert_eq!(registry.handler_count(), 0);
    }
}
