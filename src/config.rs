use crate::cdc::tag::{TagTemplate, KNOWN_PLACEHOLDERS};
use crate::sink::SerializationFormat;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub postgres: PostgresConfig,
    pub poller: PollerConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    pub kafka: Option<KafkaConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            password: None,
            database: default_database(),
            encoding: default_encoding(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    /// Fluentd-style duration: `30`, `30s`, `5m`, `1h`, `1d`.
    #[serde(default = "default_interval")]
    pub interval: String,
    pub query: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default = "default_enable_delete")]
    pub enable_delete: bool,
    /// Required; see [`PollerConfig::tag_template`].
    #[serde(default)]
    pub tag: Option<String>,
    /// Attempts per fetch before giving up. Unset retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Kafka,
    Stdout,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    #[serde(default)]
    pub format: SerializationFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl Config {
    /// Loads `path`, overlaid with `PG_POLLER_*` environment variables
    /// (`PG_POLLER_POLLER__INTERVAL=30s`), and validates the result.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("PG_POLLER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that must hold before the poll loop may start.
    pub fn validate(&self) -> Result<()> {
        let template = self.poller.tag_template()?;
        for name in template.unknown_placeholders() {
            warn!(
                tag = %template.as_str(),
                placeholder = %name,
                known = ?KNOWN_PLACEHOLDERS,
                "Tag placeholder will always expand to an empty string"
            );
        }
        self.poller.poll_interval()?;

        if self.poller.query.trim().is_empty() {
            return Err(Error::Config("poller.query must not be empty".to_string()));
        }
        if self.poller.primary_key.trim().is_empty() {
            return Err(Error::Config("poller.primary_key must not be empty".to_string()));
        }

        let encoding = self.postgres.encoding.to_ascii_lowercase().replace('-', "");
        if !matches!(encoding.as_str(), "utf8" | "utf8mb4" | "unicode") {
            return Err(Error::Config(format!(
                "postgres.encoding '{}' is not supported; only UTF-8 is",
                self.postgres.encoding
            )));
        }

        if self.sink.kind == SinkKind::Kafka {
            match &self.kafka {
                Some(kafka) if !kafka.brokers.is_empty() => {}
                _ => {
                    return Err(Error::Config(
                        "sink.kind = \"kafka\" requires a [kafka] section with brokers".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }
}

impl PollerConfig {
    /// Builds the tag template. Unknown placeholders are reported by
    /// [`Config::validate`], not here.
    pub fn tag_template(&self) -> Result<TagTemplate> {
        let tag = self.tag.as_deref().ok_or_else(|| {
            Error::Config(
                "missing 'tag' parameter. Please add following line into config like \
                 'tag = \"replicator.mydatabase.mytable.${event}.${primary_key}\"'"
                    .to_string(),
            )
        })?;
        TagTemplate::new(tag)
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_interval(&self.interval)
    }
}

/// Parses `30`, `1.5`, `30s`, `5m`, `1h` or `1d`.
pub fn parse_interval(value: &str) -> Result<Duration> {
    let value = value.trim();
    let (number, unit) = match value.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&value[..idx], c),
        _ => (value, 's'),
    };

    let multiplier = match unit {
        's' => 1.0,
        'm' => 60.0,
        'h' => 3600.0,
        'd' => 86400.0,
        _ => {
            return Err(Error::Config(format!(
                "invalid interval '{}': unknown unit '{}'",
                value, unit
            )))
        }
    };

    let amount: f64 = number
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid interval '{}'", value)))?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(Error::Config(format!(
            "invalid interval '{}': must be positive",
            value
        )));
    }

    let interval = Duration::try_from_secs_f64(amount * multiplier)
        .map_err(|_| Error::Config(format!("invalid interval '{}': too large", value)))?;
    if interval.is_zero() {
        return Err(Error::Config(format!(
            "invalid interval '{}': rounds to zero",
            value
        )));
    }
    Ok(interval)
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_encoding() -> String {
    "utf8".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_primary_key() -> String {
    "id".to_string()
}

fn default_enable_delete() -> bool {
    true
}

fn default_compression() -> String {
    "snappy".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    100
}

fn default_batch_size() -> usize {
    16384
}

fn default_message_timeout_ms() -> u64 {
    300_000
}
