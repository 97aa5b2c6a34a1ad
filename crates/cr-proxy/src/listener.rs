//! Response Listener - tiered inbound resolution
//!
//! The single entry point for every delivered proxy response. Not every
//! inbound message is a reply to a locally-pending request: some are
//! fire-and-forget notifications any instance may process, and some are
//! replies the broker delivered to the wrong instance. The listener runs an
//! explicit priority chain:
//!
//! 1. Type-based handler dispatch (fire-and-forget; never touches the
//!    correlator)
//! 2. Local correlation (`try_complete` on this instance's pending table)
//! 3. Cross-instance distribution (broadcast so the holding instance can
//!    complete it)
//!
//! New tiers slot into the chain without touching existing ones.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::correlator::ResponseCorrelator;
use crate::error::ProxyError;
use crate::registry::HandlerRegistry;
use cr_broker::DeliveryHandler;
use cr_common::ProxyResponse;
use cr_distribute::ResponseDistributor;

/// Outcome of one tier's resolution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Resolved,
    NotResolved,
}

/// One strategy in the resolution chain
#[async_trait]
pub trait ResolutionTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this tier can only act on a correlatable response. The
    /// listener drops blank-correlation-id messages before such tiers.
    fn requires_correlation(&self) -> bool {
        true
    }

    async fn try_resolve(&self, response: &ProxyResponse) -> Result<Resolution, ProxyError>;
}

/// Tier 1: fire-and-forget handler dispatch
pub struct HandlerTier {
    registry: Arc<HandlerRegistry>,
}

impl HandlerTier {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ResolutionTier for HandlerTier {
    fn name(&self) -> &'static str {
        "handler"
    }

    fn requires_correlation(&self) -> bool {
        false
    }

    async fn try_resolve(&self, response: &ProxyResponse) -> Result<Resolution, ProxyError> {
        if !self.registry.has_handler(&response.message_type) {
            return Ok(Resolution::NotResolved);
        }

        // A matched handler resolves the message even if it fails; the
        // registry contains and logs the error
        self.registry.dispatch(response).await;
        Ok(Resolution::Resolved)
    }
}

/// Tier 2: local pending-request completion
pub struct CorrelationTier {
    correlator: ResponseCorrelator,
}

impl CorrelationTier {
    pub fn new(correlator: ResponseCorrelator) -> Self {
        Self { correlator }
    }
}

#[async_trait]
impl ResolutionTier for CorrelationTier {
    fn name(&self) -> &'static str {
        "correlation"
    }

    async fn try_resolve(&self, response: &ProxyResponse) -> Result<Resolution, ProxyError> {
        if self.correlator.try_complete(response.clone()) {
            Ok(Resolution::Resolved)
        } else {
            Ok(Resolution::NotResolved)
        }
    }
}

/// Tier 3: cross-instance broadcast fallback
pub struct DistributionTier {
    distributor: Arc<dyn ResponseDistributor>,
}

impl DistributionTier {
    pub fn new(distributor: Arc<dyn ResponseDistributor>) -> Self {
        Self { distributor }
    }
}

#[async_trait]
impl ResolutionTier for DistributionTier {
    fn name(&self) -> &'static str {
        "distribution"
    }

    async fn try_resolve(&self, response: &ProxyResponse) -> Result<Resolution, ProxyError> {
        if self.distributor.is_enabled() {
            // Best-effort: publish failures are absorbed by the distributor
            self.distributor.publish(response).await;
        } else {
            debug!(
                correlation_id = %response.correlation_id,
                "Distribution disabled, dropping unmatched response"
            );
        }
        Ok(Resolution::Resolved)
    }
}

/// The tiered inbound dispatcher
pub struct ResponseListener {
    tiers: Vec<Arc<dyn ResolutionTier>>,
}

impl ResponseListener {
    /// Build the standard three-tier chain
    pub fn new(
        registry: Arc<HandlerRegistry>,
        correlator: ResponseCorrelator,
        distributor: Arc<dyn ResponseDistributor>,
    ) -> Self {
        Self {
            tiers: vec![
                Arc::new(HandlerTier::new(registry)),
                Arc::new(CorrelationTier::new(correlator)),
                Arc::new(DistributionTier::new(distributor)),
            ],
        }
    }

    /// Build a listener from a custom tier chain
    pub fn with_tiers(tiers: Vec<Arc<dyn ResolutionTier>>) -> Self {
        Self { tiers }
    }

    /// Run the chain for one inbound response.
    ///
    /// `Ok` means the message was consumed (resolved or deliberately
    /// dropped); `Err` surfaces a handling failure so the broker's
    /// redelivery policy can act on it.
    pub async fn handle(&self, response: &ProxyResponse) -> Result<(), ProxyError> {
        for tier in &self.tiers {
            if tier.requires_correlation() && response.correlation_id.trim().is_empty() {
                warn!(
                    message_type = %response.message_type,
                    "Dropping uncorrelatable response with blank correlation id"
                );
                return Ok(());
            }

            match tier.try_resolve(response).await {
                Ok(Resolution::Resolved) => {
                    debug!(
                        tier = tier.name(),
                        correlation_id = %response.correlation_id,
                        message_type = %response.message_type,
                        "Response resolved"
                    );
                    return Ok(());
                }
                Ok(Resolution::NotResolved) => continue,
                Err(e) => {
                    return Err(ProxyError::Handling(format!(
                        "{} tier failed: {}",
                        tier.name(),
                        e
                    )));
                }
            }
        }

        Err(ProxyError::Handling(format!(
            "no tier resolved response {} of type {}",
            response.correlation_id, response.message_type
        )))
    }
}

#[async_trait]
impl DeliveryHandler for ResponseListener {
    async fn on_response(&self, response: ProxyResponse) -> anyhow::Result<()> {
        self.handle(&response).await.map_err(anyhow::Error::from)
    }
}
