use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Consume error: {0}")]
    Consume(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("Consumer is stopped")]
    Stopped,

    #[error("Configuration error: {0}")]
    Config(String),
}
