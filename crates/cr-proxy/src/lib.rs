//! CertRelay Proxy Messaging Core
//!
//! This crate provides the request/response correlation subsystem with:
//! - ResponseCorrelator: pending-request table with timeouts, capacity
//!   enforcement, and at-most-once completion
//! - HandlerRegistry: fire-and-forget handlers keyed by message-type
//!   patterns (exact and wildcard)
//! - ResponseListener: tiered inbound resolution (handler dispatch, local
//!   correlation, cross-instance distribution)
//! - RequestSender: broker addressing plus retry with exponential backoff
//! - ProxyClient: the send-and-await facade used by business collaborators

pub mod client;
pub mod correlator;
pub mod error;
pub mod listener;
pub mod registry;
pub mod sender;

pub use client::ProxyClient;
pub use correlator::{CorrelatorConfig, PendingResponse, ResponseCorrelator};
pub use error::ProxyError;
pub use listener::{
    CorrelationTier, DistributionTier, HandlerTier, Resolution, ResolutionTier, ResponseListener,
};
pub use registry::{HandlerRegistry, ResponseHandler};
pub use sender::{BrokerSettings, RequestSender, RetryPolicy};

pub type Result<T> = std::result::Result<T, ProxyError>;
