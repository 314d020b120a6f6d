#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use pg_poller::cdc::{Row, TagTemplate};
use pg_poller::clock::Clock;
use pg_poller::config::PostgresConfig;
use pg_poller::sink::EventSink;
use pg_poller::source::{RowSource, RowStream};
use pg_poller::{Error, PollerSettings, Result};
use std::collections::VecDeque;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Get test configuration from environment variables
pub fn get_test_postgres_config() -> PostgresConfig {
    PostgresConfig {
        host: env::var("TEST_PG_HOST").unwrap_or_else(|_| "localhost".to_string()),
        port: env::var("TEST_PG_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse()
            .unwrap_or(5432),
        database: env::var("TEST_PG_DATABASE").unwrap_or_else(|_| "postgres".to_string()),
        username: env::var("TEST_PG_USERNAME").unwrap_or_else(|_| "postgres".to_string()),
        password: Some(env::var("TEST_PG_PASSWORD").unwrap_or_else(|_| "postgres".to_string())),
        encoding: "utf8".to_string(),
        connect_timeout_secs: 5,
    }
}

pub fn settings(query: &str, enable_delete: bool) -> PollerSettings {
    PollerSettings {
        query: query.to_string(),
        interval: Duration::from_secs(1),
        primary_key: "id".to_string(),
        enable_delete,
        tag: TagTemplate::new("replicator.test.${event}.${primary_key}").unwrap(),
        max_retries: None,
    }
}

pub fn row(id: i64, v: &str) -> Row {
    Row::new().with("id", id).with("v", v)
}

/// One scripted step per `execute` call.
pub enum Step {
    Rows(Vec<Row>),
    Fail(&'static str),
}

/// Replays scripted steps, then keeps returning the last batch.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    last: Vec<Row>,
    pub executions: Arc<Mutex<u32>>,
    pub closed: Arc<Mutex<bool>>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            last: Vec::new(),
            executions: Arc::new(Mutex::new(0)),
            closed: Arc::new(Mutex::new(false)),
        }
    }
}

#[async_trait]
impl RowSource for ScriptedSource {
    async fn execute(&mut self, _query: &str) -> Result<RowStream> {
        *self.executions.lock().unwrap() += 1;
        match self.steps.pop_front() {
            Some(Step::Fail(msg)) => Err(Error::Connection(msg.to_string())),
            Some(Step::Rows(rows)) => {
                self.last = rows.clone();
                Ok(stream::iter(rows.into_iter().map(Ok::<Row, Error>)).boxed())
            }
            None => {
                let rows = self.last.clone();
                Ok(stream::iter(rows.into_iter().map(Ok::<Row, Error>)).boxed())
            }
        }
    }

    async fn close(&mut self) {
        *self.closed.lock().unwrap() = true;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub tag: String,
    pub time: DateTime<Utc>,
    pub record: Row,
}

/// Collects emitted events; shareable so tests can inspect it while the
/// poller owns the sink.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub events: Arc<Mutex<Vec<Emitted>>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<Emitted> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, tag: &str, time: DateTime<Utc>, record: &Row) -> Result<()> {
        self.events.lock().unwrap().push(Emitted {
            tag: tag.to_string(),
            time,
            record: record.clone(),
        });
        Ok(())
    }
}

/// Clock whose sleeps complete only when the test releases them.
pub struct ManualClock {
    now: DateTime<Utc>,
    pub sleeps: Arc<Mutex<Vec<Duration>>>,
    release: tokio::sync::Semaphore,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now,
            sleeps: Arc::new(Mutex::new(Vec::new())),
            release: tokio::sync::Semaphore::new(0),
        })
    }

    /// Lets `n` pending or future sleeps complete.
    pub fn release(&self, n: usize) {
        self.release.add_permits(n);
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}
