use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Pending request capacity exceeded ({0} in flight)")]
    CapacityExceeded(usize),

    #[error("Shutdown in progress")]
    ShuttingDown,

    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelation(String),

    #[error("Send failed: {0}")]
    SendFailure(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Message handling failed: {0}")]
    Handling(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
