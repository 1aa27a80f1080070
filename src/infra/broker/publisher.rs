use async_trait::async_trait;
use lapin::{BasicProperties, Channel, options::BasicPublishOptions};
use tracing::debug;

use crate::application::broker::{BrokerError, MessageMetadata, Publisher};

use super::consumer::headers_from_metadata;

const PERSISTENT_DELIVERY_MODE: u8 = 2;

#[derive(Clone)]
pub struct AmqpPublisher {
    channel: Channel,
}

impl AmqpPublisher {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

impl AmqpPublisher {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), BrokerError> {
        // The channel is not in confirm mode, so the returned confirmation
        // resolves immediately and is not awaited.
        let _confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|err| BrokerError::publish(exchange, routing_key, err))?;

        debug!(
            target = "infra::broker::publisher",
            exchange,
            routing_key,
            payload_bytes = payload.len(),
            "Message published"
        );
        Ok(())
    }
}

fn persistent_properties() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        .with_content_type("application/json".into())
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.send(exchange, routing_key, payload, persistent_properties())
            .await
    }

    async fn publish_with_metadata(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        metadata: &MessageMetadata,
    ) -> Result<(), BrokerError> {
        let properties = persistent_properties().with_headers(headers_from_metadata(metadata));
        self.send(exchange, routing_key, payload, properties).await
    }
}
