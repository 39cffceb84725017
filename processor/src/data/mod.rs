//! Delivery layer
//!
//! Consumers that receive finished batches from the processors.

pub mod consumer;
pub mod error;

pub use consumer::{ChannelConsumer, Consumer, JsonLinesConsumer, MemorySink};
pub use error::ConsumerError;
