use super::{Envelope, EventSink, JsonSerializer, SerializationFormat};
use crate::{cdc::Row, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Writes one compact JSON envelope per line.
///
/// Output is always [`SerializationFormat::JsonCompact`] so every line is a
/// complete record. Defaults to stdout; any async writer works, which is how
/// the tests capture output.
pub struct StdoutSink<W = tokio::io::Stdout> {
    writer: Mutex<W>,
    serializer: JsonSerializer,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            serializer: JsonSerializer::new(SerializationFormat::JsonCompact),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> EventSink for StdoutSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn emit(&self, tag: &str, time: DateTime<Utc>, record: &Row) -> Result<()> {
        let line = self.serializer.serialize(&Envelope { tag, time, record })?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}
