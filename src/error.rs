//! Error types and result handling for pg-poller.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use pg_poller::{Error, Result};
//!
//! fn extract_id() -> Result<i64> {
//!     Err(Error::MissingKey { column: "id".to_string() })
//! }
//!
//! match extract_id() {
//!     Ok(id) => println!("id = {}", id),
//!     Err(Error::MissingKey { column }) => eprintln!("no '{}' column", column),
//!     Err(e) => eprintln!("other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for pg-poller operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configuration file or environment could not be read.
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// PostgreSQL client or protocol error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Generic connection error not covered by specific types.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A fetched row does not carry the configured primary-key column.
    #[error("Row is missing primary key column '{column}'")]
    MissingKey {
        /// Name of the configured primary-key column
        column: String,
    },

    /// A result column reached the row converter with a type it cannot read.
    #[error("Column '{column}' has unsupported type '{type_name}'")]
    UnsupportedType {
        /// Column name as reported by the source
        column: String,
        /// Source type name
        type_name: String,
    },

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization error when encoding events.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error, typically from the stdout sink.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The background poll task panicked or was aborted.
    #[error("Poller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    ///
    /// This is not really an error but uses the error mechanism
    /// to cleanly exit the poll loop.
    #[error("Shutdown requested")]
    Shutdown,
}

/// A convenient Result type alias for pg-poller operations.
///
/// This is equivalent to `std::result::Result<T, pg_poller::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_message() {
        let err = Error::MissingKey { column: "user_id".to_string() };
        assert_eq!(err.to_string(), "Row is missing primary key column 'user_id'");
    }

    #[test]
    fn test_unsupported_type_message_names_column() {
        let err = Error::UnsupportedType {
            column: "amount".to_string(),
            type_name: "numeric".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Column 'amount' has unsupported type 'numeric'"
        );
    }
}
