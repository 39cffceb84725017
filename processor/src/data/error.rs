//! Consumer error types

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;

/// Error returned by a downstream consumer; aborts delivery of the current batch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsumerError {
    /// Channel or receiver closed
    #[error("channel closed")]
    ChannelClosed,

    /// Buffer full (backpressure)
    #[error("buffer full")]
    BufferFull,

    /// Downstream refused the batch
    #[error("batch rejected: {0}")]
    Rejected(String),

    /// Serialization error
    #[error("encode error: {0}")]
    Encode(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl<T> From<TrySendError<T>> for ConsumerError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => ConsumerError::BufferFull,
            TrySendError::Closed(_) => ConsumerError::ChannelClosed,
        }
    }
}

impl From<serde_json::Error> for ConsumerError {
    fn from(err: serde_json::Error) -> Self {
        ConsumerError::Encode(err.to_string())
    }
}

impl From<std::io::Error> for ConsumerError {
    fn from(err: std::io::Error) -> Self {
        ConsumerError::Io(err.to_string())
    }
}
