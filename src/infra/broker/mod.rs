//! AMQP adapters built on `lapin`.

mod consumer;
mod publisher;
mod topology;

pub use consumer::AmqpDeliverySource;
pub use publisher::AmqpPublisher;
pub use topology::{TopologyManager, delay_queue_arguments, main_queue_arguments};

use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{info, warn};

use crate::application::broker::BrokerError;

const REPLY_SUCCESS: u16 = 200;

/// One broker connection and its primary channel for the lifetime of a
/// process run. Open it at start-up and [`close`](Self::close) it on the way
/// out, whether the run succeeded or not.
pub struct BrokerConnection {
    connection: Connection,
    channel: Channel,
}

impl BrokerConnection {
    pub async fn open(url: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(BrokerError::connection)?;
        let channel = connection
            .create_channel()
            .await
            .map_err(BrokerError::connection)?;

        info!(
            target = "infra::broker",
            channel_id = channel.id(),
            "Broker connection opened"
        );

        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// A fresh channel for operations that may close it on failure, such as
    /// passive declarations.
    pub async fn create_channel(&self) -> Result<Channel, BrokerError> {
        self.connection
            .create_channel()
            .await
            .map_err(BrokerError::connection)
    }

    pub fn publisher(&self) -> AmqpPublisher {
        AmqpPublisher::new(self.channel.clone())
    }

    pub fn delivery_source(&self) -> AmqpDeliverySource {
        AmqpDeliverySource::new(self.channel.clone())
    }

    pub async fn close(self) {
        if let Err(err) = self.channel.close(REPLY_SUCCESS, "OK").await {
            warn!(
                target = "infra::broker",
                error = %err,
                "Failed to close broker channel"
            );
        }
        if let Err(err) = self.connection.close(REPLY_SUCCESS, "OK").await {
            warn!(
                target = "infra::broker",
                error = %err,
                "Failed to close broker connection"
            );
        }
        info!(target = "infra::broker", "Broker connection closed");
    }
}
