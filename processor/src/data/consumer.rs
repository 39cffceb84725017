//! Downstream consumers
//!
//! A consumer takes ownership of one batch and either accepts it or returns an
//! error. Delivery is synchronous; retry and timeout policy belong to the host.
//!
//! - `MemorySink`: collects batches in memory (tests, replay)
//! - `ChannelConsumer`: non-blocking hand-off into a bounded tokio channel
//! - `JsonLinesConsumer`: one JSON document per line on any writer

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use super::error::ConsumerError;

/// Next stage of the pipeline for batches of type `T`
pub trait Consumer<T>: Send + Sync {
    fn consume(&self, batch: T) -> Result<(), ConsumerError>;
}

impl<T, C: Consumer<T> + ?Sized> Consumer<T> for Arc<C> {
    fn consume(&self, batch: T) -> Result<(), ConsumerError> {
        (**self).consume(batch)
    }
}

// ============================================================================
// MEMORY SINK
// ============================================================================

/// Collects every delivered batch; can be told to fail every delivery
pub struct MemorySink<T> {
    batches: Mutex<Vec<T>>,
    calls: Mutex<usize>,
    fail_with: Option<ConsumerError>,
}

impl<T> MemorySink<T> {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
            fail_with: None,
        }
    }

    /// Sink that rejects every batch with `err` (the call is still counted)
    pub fn failing(err: ConsumerError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::new()
        }
    }

    /// Number of `consume` calls, successful or not
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    /// Drain the accepted batches
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.batches.lock())
    }
}

impl<T> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Consumer<T> for MemorySink<T> {
    fn consume(&self, batch: T) -> Result<(), ConsumerError> {
        *self.calls.lock() += 1;
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        self.batches.lock().push(batch);
        Ok(())
    }
}

// ============================================================================
// CHANNEL CONSUMER
// ============================================================================

/// Hands batches to an async task through a bounded channel without blocking
pub struct ChannelConsumer<T> {
    tx: mpsc::Sender<T>,
}

impl<T> ChannelConsumer<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }

    /// Consumer plus the receiving end of a channel with `capacity` slots
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl<T: Send> Consumer<T> for ChannelConsumer<T> {
    fn consume(&self, batch: T) -> Result<(), ConsumerError> {
        self.tx.try_send(batch).map_err(ConsumerError::from)
    }
}

// ============================================================================
// JSON LINES CONSUMER
// ============================================================================

/// Writes each batch as one JSON line
pub struct JsonLinesConsumer<W> {
    writer: Mutex<W>,
}

impl<W: Write> JsonLinesConsumer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<T: Serialize, W: Write + Send> Consumer<T> for JsonLinesConsumer<W> {
    fn consume(&self, batch: T) -> Result<(), ConsumerError> {
        let line = serde_json::to_string(&batch)?;
        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
