use crate::{Error, Result};
use rdkafka::config::FromClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns one rdkafka client for a broker endpoint list.
///
/// The client is created on first use and recreated after [`reset`] or
/// [`close`]. Each component (admin, producer, consumer) holds its own
/// `BrokerConnection`; it is never shared between control flows.
///
/// [`reset`]: BrokerConnection::reset
/// [`close`]: BrokerConnection::close
pub struct BrokerConnection<C> {
    endpoint: String,
    client_config: ClientConfig,
    client: Option<Arc<C>>,
}

impl<C: FromClientConfig> BrokerConnection<C> {
    /// Creates the manager and makes an initial connection attempt.
    ///
    /// A failed attempt is logged and left for the next [`connect`] call;
    /// construction itself never fails.
    ///
    /// [`connect`]: BrokerConnection::connect
    pub fn new(endpoint: impl Into<String>, client_config: ClientConfig) -> Self {
        let mut connection = Self::unconnected(endpoint, client_config);

        if let Err(e) = connection.connect() {
            warn!(
                endpoint = %connection.endpoint,
                error = %e,
                "Failed to establish initial connection"
            );
        }

        connection
    }

    /// Creates the manager without attempting a connection.
    pub fn unconnected(endpoint: impl Into<String>, client_config: ClientConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            client_config,
            client: None,
        }
    }

    /// Returns the live client, creating it first if needed.
    pub fn connect(&mut self) -> Result<Arc<C>> {
        if let Some(client) = &self.client {
            return Ok(Arc::clone(client));
        }

        let mut config = self.client_config.clone();
        config.set("bootstrap.servers", &self.endpoint);

        let client = C::from_config(&config).map_err(|e| Error::Connection {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        })?;

        debug!(endpoint = %self.endpoint, "Connected to Kafka");
        let client = Arc::new(client);
        self.client = Some(Arc::clone(&client));
        Ok(client)
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Converts a client error, reporting an unreachable broker as
    /// [`Error::Connection`] for this endpoint.
    pub fn classify(&self, err: KafkaError) -> Error {
        match err.rdkafka_error_code() {
            Some(code) if is_transport_failure(code) => {
                warn!(endpoint = %self.endpoint, error = %err, "Kafka broker unreachable");
                Error::Connection {
                    endpoint: self.endpoint.clone(),
                    message: err.to_string(),
                }
            }
            _ => Error::Kafka(err),
        }
    }

    /// Drops the client after a transport failure so the next use reconnects.
    pub fn reset(&mut self) {
        if self.client.take().is_some() {
            debug!(endpoint = %self.endpoint, "Dropped Kafka client, will reconnect on next use");
        }
    }

    /// Releases the client. Closing a closed or never-opened connection is a no-op.
    pub fn close(&mut self) {
        if self.client.take().is_some() {
            info!(endpoint = %self.endpoint, "Closed Kafka connection");
        }
    }
}

fn is_transport_failure(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::Resolve
    )
}
