//! Broker contracts used by the pipeline, independent of the AMQP client.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub const DEFAULT_RETRY_DELAY_MS: u32 = 60_000;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("topology operation `{operation}` on `{name}` failed: {message}")]
    Topology {
        operation: &'static str,
        name: String,
        message: String,
    },
    #[error("publish to exchange `{exchange}` with key `{routing_key}` failed: {message}")]
    Publish {
        exchange: String,
        routing_key: String,
        message: String,
    },
    #[error("consuming from `{queue}` failed: {message}")]
    Consume { queue: String, message: String },
    #[error("acknowledgement failed: {0}")]
    Acknowledge(String),
}

impl BrokerError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn topology(
        operation: &'static str,
        name: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Topology {
            operation,
            name: name.into(),
            message: err.to_string(),
        }
    }

    pub fn publish(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: err.to_string(),
        }
    }

    pub fn consume(queue: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Consume {
            queue: queue.into(),
            message: err.to_string(),
        }
    }

    pub fn acknowledge(err: impl std::fmt::Display) -> Self {
        Self::Acknowledge(err.to_string())
    }
}

/// Names of the exchanges and queues that implement delayed retry for one
/// logical queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub queue: String,
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub delay_queue: String,
    pub last_resort_queue: String,
    pub retry_delay_ms: u32,
}

impl QueueTopology {
    pub fn from_queue_name(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        dead_letter_exchange: impl Into<String>,
    ) -> Self {
        let queue = queue.into();
        Self {
            delay_queue: format!("{queue}.dlq"),
            last_resort_queue: format!("{queue}.last_resort"),
            queue,
            exchange: exchange.into(),
            dead_letter_exchange: dead_letter_exchange.into(),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u32) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }
}

/// Publishes persistent messages. No publisher confirmation is awaited.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError>;

    /// Publish a message together with the retry history of the delivery it
    /// came from. Transports without message headers drop the history.
    async fn publish_with_metadata(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        _metadata: &MessageMetadata,
    ) -> Result<(), BrokerError> {
        self.publish(exchange, routing_key, payload).await
    }
}

/// One broker-maintained dead-letter record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    pub queue: String,
    pub reason: String,
    pub count: u64,
}

/// Broker metadata the consumer inspects before dispatching a delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    pub deaths: Vec<DeathRecord>,
}

/// Number of times a message has been dead-lettered.
///
/// Brokers that keep one aggregated record per `(queue, reason)` would stop
/// growing after the first cycle if only non-zero records were counted, so the
/// largest single counter is taken as well. Absent metadata yields 0; counts
/// beyond `u32::MAX` saturate.
pub fn death_count(metadata: &MessageMetadata) -> u32 {
    let non_zero = metadata
        .deaths
        .iter()
        .filter(|record| record.count > 0)
        .count() as u64;
    let largest = metadata
        .deaths
        .iter()
        .map(|record| record.count)
        .max()
        .unwrap_or(0);
    u32::try_from(non_zero.max(largest)).unwrap_or(u32::MAX)
}

/// Settles a single delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Negative acknowledgement without requeue, so the broker dead-letters
    /// the message into the delay queue.
    async fn reject(&self) -> Result<(), BrokerError>;
}

pub struct Delivery {
    pub body: Vec<u8>,
    pub metadata: MessageMetadata,
    pub acker: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_bytes", &self.body.len())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Source of deliveries for one queue.
#[async_trait]
pub trait DeliverySource: Send + Sync {
    /// Start consuming `queue` with at most `prefetch` unacknowledged deliveries.
    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError>;
}
