//! The poll loop.
//!
//! One [`Poller`] owns everything a polling job needs: the retrying row
//! source, the detector and its state, the sink, and the clock. It runs on a
//! single task; the outside world only talks to it through a
//! [`PollerHandle`].
//!
//! # Example
//!
//! ```rust,no_run
//! use pg_poller::config::Config;
//! use pg_poller::postgres::PostgresSource;
//! use pg_poller::poller::{Poller, PollerSettings};
//! use pg_poller::sink::StdoutSink;
//!
//! # async fn example() -> pg_poller::Result<()> {
//! let config = Config::from_file("config.toml")?;
//! let settings = PollerSettings::from_config(&config)?;
//! let source = PostgresSource::new(&config.postgres);
//! let sink = StdoutSink::new();
//!
//! let handle = Poller::new(settings, source, sink).spawn();
//! tokio::signal::ctrl_c().await?;
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::cdc::{ChangeDetector, ChangeEvent, ChangeOperation, DetectorState, TagTemplate};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::sink::EventSink;
use crate::source::{RetryPolicy, RetryingSource, RowSource};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Sleeping,
    /// Stopped on request.
    Cancelled,
    /// Stopped by an error; see the task result.
    Failed,
}

impl PollerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollerState::Cancelled | PollerState::Failed)
    }
}

/// Everything the loop needs to know about one polling job.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub query: String,
    pub interval: Duration,
    pub primary_key: String,
    pub enable_delete: bool,
    pub tag: TagTemplate,
    pub max_retries: Option<u32>,
}

impl PollerSettings {
    /// Fails with [`Error::Config`] when the tag template is missing, so a
    /// misconfigured job never starts.
    pub fn from_config(config: &Config) -> Result<Self> {
        let poller = &config.poller;
        Ok(Self {
            query: poller.query.clone(),
            interval: poller.poll_interval()?,
            primary_key: poller.primary_key.clone(),
            enable_delete: poller.enable_delete,
            tag: poller.tag_template()?,
            max_retries: poller.max_retries,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.max_retries {
            Some(max) => RetryPolicy::bounded(self.interval, max),
            None => RetryPolicy::unbounded(self.interval),
        }
    }
}

/// Per-cycle counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub rows: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl CycleStats {
    fn record(&mut self, op: ChangeOperation) {
        match op {
            ChangeOperation::Insert => self.inserted += 1,
            ChangeOperation::Update => self.updated += 1,
            ChangeOperation::Delete => self.deleted += 1,
        }
    }

    pub fn events(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

pub struct Poller<S, K> {
    settings: PollerSettings,
    source: RetryingSource<S>,
    sink: K,
    detector: ChangeDetector,
    state: DetectorState,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    status: watch::Sender<PollerState>,
}

impl<S, K> Poller<S, K>
where
    S: RowSource + 'static,
    K: EventSink + 'static,
{
    pub fn new(settings: PollerSettings, source: S, sink: K) -> Self {
        Self::with_clock(settings, source, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: PollerSettings, source: S, sink: K, clock: Arc<dyn Clock>) -> Self {
        let source = RetryingSource::new(source, settings.retry_policy(), clock.clone());
        let detector = ChangeDetector::new(settings.primary_key.clone(), settings.enable_delete);
        let (status, _) = watch::channel(PollerState::Idle);

        Self {
            settings,
            source,
            sink,
            detector,
            state: DetectorState::default(),
            clock,
            cancel: CancellationToken::new(),
            status,
        }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    pub fn detector_state(&self) -> &DetectorState {
        &self.state
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.status.subscribe()
    }

    fn set_state(&self, state: PollerState) {
        self.status.send_replace(state);
    }

    /// Moves the poller onto its own task.
    pub fn spawn(mut self) -> PollerHandle {
        let cancel = self.cancel.clone();
        let state = self.subscribe();
        let task = tokio::spawn(async move { self.run().await });

        PollerHandle {
            cancel,
            state,
            task,
        }
    }

    /// Polls until cancelled or until an error stops the loop.
    ///
    /// Cancellation returns `Ok(())`. Any other failure is logged and
    /// returned; the loop is not restarted.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            query = %self.settings.query,
            interval_secs = self.settings.interval.as_secs_f64(),
            tag = %self.settings.tag.as_str(),
            "adding poll job: [{}] interval: {}sec",
            self.settings.query,
            self.settings.interval.as_secs_f64()
        );

        let result = self.run_loop().await;

        self.source.close().await;
        if let Err(e) = self.sink.flush().await {
            warn!(error = %e, "Failed to flush sink on shutdown");
        }

        match result {
            Ok(()) | Err(Error::Shutdown) => {
                info!("Poller stopped");
                self.set_state(PollerState::Cancelled);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, details = ?e, causes = %error_chain(&e), "Poll loop terminated");
                self.set_state(PollerState::Failed);
                Err(e)
            }
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Shutdown);
            }

            self.set_state(PollerState::Running);
            let stats = self.poll_once().await?;
            info!(
                rows = stats.rows,
                inserted = stats.inserted,
                updated = stats.updated,
                deleted = stats.deleted,
                tracked = self.state.len(),
                "Poll cycle complete"
            );

            self.set_state(PollerState::Sleeping);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Shutdown),
                _ = self.clock.sleep(self.settings.interval) => {}
            }
        }
    }

    /// Runs one cycle: fetch, detect, emit. Does not sleep.
    pub async fn poll_once(&mut self) -> Result<CycleStats> {
        let mut rows = self.source.fetch(&self.settings.query, &self.cancel).await?;

        let emitter = Emitter {
            sink: &self.sink,
            clock: self.clock.as_ref(),
            tag: &self.settings.tag,
            primary_key: &self.settings.primary_key,
        };
        let mut stats = CycleStats::default();
        let mut cycle = self.detector.begin_cycle(&mut self.state);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Shutdown),
                next = rows.next() => next,
            };
            let Some(row) = next else { break };

            stats.rows += 1;
            if let Some(event) = cycle.observe(row?)? {
                stats.record(emitter.emit(event).await?);
            }
        }

        for event in cycle.finish() {
            stats.record(emitter.emit(event).await?);
        }

        Ok(stats)
    }
}

struct Emitter<'a, K> {
    sink: &'a K,
    clock: &'a dyn Clock,
    tag: &'a TagTemplate,
    primary_key: &'a str,
}

impl<K: EventSink> Emitter<'_, K> {
    async fn emit(&self, event: ChangeEvent) -> Result<ChangeOperation> {
        let op = event.op();
        let tag = self.tag.render(op.as_str(), self.primary_key);
        let record = event.into_record(self.primary_key);
        debug!(tag = %tag, op = %op, "Emitting change");
        self.sink.emit(&tag, self.clock.now(), &record).await?;
        Ok(op)
    }
}

fn error_chain(err: &Error) -> String {
    let mut chain = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Control surface for a spawned poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    state: watch::Receiver<PollerState>,
    task: JoinHandle<Result<()>>,
}

impl PollerHandle {
    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }

    /// Requests shutdown without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the poller to end on its own.
    pub async fn join(self) -> Result<()> {
        self.task.await?
    }

    /// Cancels the poller and waits for it to release its resources.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.join().await
    }
}
