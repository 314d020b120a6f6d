//! Row sources and the retry policy wrapped around them.
//!
//! A [`RowSource`] runs a query and hands back a stream of rows. It knows
//! nothing about retries. [`RetryingSource`] owns the policy: any failure
//! while connecting or executing is logged, followed by a sleep for the
//! retry delay, and the attempt is repeated until it succeeds, the attempt
//! budget runs out, or the poller is cancelled.

use crate::cdc::Row;
use crate::clock::Clock;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Rows of one query execution, in source order.
pub type RowStream = BoxStream<'static, Result<Row>>;

#[async_trait]
pub trait RowSource: Send {
    /// Executes `query`, connecting first if needed.
    ///
    /// Returns once the query is running; rows are pulled from the stream
    /// as they arrive.
    async fn execute(&mut self, query: &str) -> Result<RowStream>;

    /// Releases the underlying connection, if any.
    async fn close(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between failed attempts.
    pub delay: Duration,
    /// Attempt budget. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: RowSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Runs `query`, retrying on failure.
    ///
    /// Returns [`Error::Shutdown`] as soon as `cancel` fires, whether the
    /// query is in flight or the retry sleep is pending.
    pub async fn fetch(&mut self, query: &str, cancel: &CancellationToken) -> Result<RowStream> {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Shutdown);
            }

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Shutdown),
                outcome = self.inner.execute(query) => outcome,
            };

            let err = match outcome {
                Ok(stream) => {
                    if attempts > 1 {
                        debug!(attempts, "Query succeeded after retrying");
                    }
                    return Ok(stream);
                }
                Err(Error::Shutdown) => return Err(Error::Shutdown),
                Err(e) => e,
            };

            if self.policy.exhausted(attempts) {
                warn!(attempts, error = %err, "Giving up on row source");
                return Err(err);
            }

            warn!(
                attempt = attempts,
                retry_in = ?self.policy.delay,
                error = %err,
                "Row source failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Shutdown),
                _ = self.clock.sleep(self.policy.delay) => {}
            }
        }
    }

    pub async fn close(&mut self) {
        self.inner.close().await;
    }
}
