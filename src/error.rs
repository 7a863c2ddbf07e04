//! Error types and result handling for kafka-platform.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kafka_platform::{Error, Result};
//!
//! fn ensure_topic(name: &str) -> Result<()> {
//!     Err(Error::InvalidTopic(name.to_string()))
//! }
//!
//! match ensure_topic("") {
//!     Ok(()) => println!("Topic ready"),
//!     Err(Error::InvalidTopic(name)) => eprintln!("Bad topic name: {:?}", name),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for kafka-platform operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from invalid environment variables
    /// or an unreadable configuration file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka client error reported by librdkafka.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The broker endpoint could not be reached. Recoverable: the
    /// connection is retried on next use.
    #[error("Connection error ({endpoint}): {message}")]
    Connection {
        /// Broker endpoint list that was dialed
        endpoint: String,
        /// Description of the failure
        message: String,
    },

    /// Topic existence check or creation failed during bootstrap.
    #[error("Failed to ensure topic '{topic}' exists: {source}")]
    Bootstrap {
        /// Topic whose bootstrap failed
        topic: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// JSON serialization error when encoding or decoding payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sending a record to the broker failed.
    #[error("Failed to publish to topic '{topic}': {message}")]
    Publish {
        /// Target topic
        topic: String,
        /// Description of the failure
        message: String,
    },

    /// Unrecoverable subscriber state.
    #[error("Consume error: {0}")]
    Consume(String),

    /// Empty or otherwise unusable topic name.
    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    ///
    /// This is not really an error but uses the error mechanism
    /// to cleanly unwind an in-flight blocking call.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Returns `true` when the error only signals cooperative cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Shutdown => true,
            Error::Bootstrap { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// A convenient Result type alias for kafka-platform operations.
///
/// This is equivalent to `std::result::Result<T, kafka_platform::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_is_cancellation() {
        assert!(Error::Shutdown.is_cancellation());
        assert!(!Error::Consume("boom".to_string()).is_cancellation());
    }

    #[test]
    fn test_bootstrap_error_names_topic() {
        let err = Error::Bootstrap {
            topic: "orders".to_string(),
            source: Box::new(Error::Publish {
                topic: "orders".to_string(),
                message: "broker down".to_string(),
            }),
        };

        let text = err.to_string();
        assert!(text.contains("'orders'"));
        assert!(text.contains("broker down"));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn test_wrapped_shutdown_is_cancellation() {
        let err = Error::Bootstrap {
            topic: "test".to_string(),
            source: Box::new(Error::Shutdown),
        };
        assert!(err.is_cancellation());
    }
}
