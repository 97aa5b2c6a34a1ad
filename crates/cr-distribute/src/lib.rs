//! CertRelay Cross-Instance Distribution
//!
//! Repairs the broker's lack of instance affinity: when a proxy response is
//! delivered to an instance that does not hold the matching pending request,
//! the response is broadcast on a Redis pub/sub channel so the instance that
//! does hold it can complete the waiting caller.
//!
//! The channel is advisory. Publication is best-effort: losing a broadcast
//! degrades to a timeout on the waiting instance, never to data loss, so
//! serialization and connectivity failures are logged and absorbed.
//!
//! # Example
//!
//! ```no_run
//! use cr_distribute::{DistributionConfig, RedisDistributor, ResponseSubscriber, ResponseSink};
//! use std::sync::Arc;
//!
//! async fn example(sink: Arc<dyn ResponseSink>) {
//!     let config = DistributionConfig::new("redis://localhost:6379".to_string());
//!
//!     let distributor = RedisDistributor::new(config.clone()).await.unwrap();
//!     let subscriber = Arc::new(ResponseSubscriber::new(config, sink).unwrap());
//!     let _handle = subscriber.clone().start();
//! }
//! ```

mod channel;
mod error;

pub use channel::{
    DistributionConfig, NoOpDistributor, RedisDistributor, ResponseDistributor,
    ResponseSink, ResponseSubscriber,
};
pub use error::{DistributeError, Result};
