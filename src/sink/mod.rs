//! Downstream event sinks.
//!
//! The poller hands each detected change to an [`EventSink`] as
//! `(tag, time, record)`. Delivery is fire-and-forget from the poller's
//! point of view: an error from `emit` stops the loop, but nothing is
//! acknowledged or replayed.

pub mod serializer;
pub mod stdout;

pub use serializer::{Envelope, JsonSerializer, SerializationFormat};
pub use stdout::StdoutSink;

use crate::cdc::Row;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, tag: &str, time: DateTime<Utc>, record: &Row) -> Result<()>;

    /// Waits for buffered events to be delivered.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
