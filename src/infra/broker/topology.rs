//! Declarative setup and passive verification of the retry topology.
//!
//! For a logical queue `q` the graph is:
//!
//! ```text
//! exchange ──q──▶ q ──(reject)──▶ dlx ──q.dlq──▶ q.dlq ──(ttl)──▶ exchange ──q──▶ q
//!                                  └──q.last_resort──▶ q.last_resort
//! ```

use lapin::{
    ExchangeKind,
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, info, warn};

use crate::application::broker::{BrokerError, QueueTopology};

use super::{BrokerConnection, REPLY_SUCCESS};

const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
const ARG_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
const ARG_MESSAGE_TTL: &str = "x-message-ttl";

/// Main queue arguments: rejected messages go to the delay queue.
pub fn main_queue_arguments(topology: &QueueTopology) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ARG_DEAD_LETTER_EXCHANGE.into(),
        AMQPValue::LongString(topology.dead_letter_exchange.as_str().into()),
    );
    arguments.insert(
        ARG_DEAD_LETTER_ROUTING_KEY.into(),
        AMQPValue::LongString(topology.delay_queue.as_str().into()),
    );
    arguments
}

/// Delay queue arguments: expired messages go back to the main queue.
pub fn delay_queue_arguments(topology: &QueueTopology) -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ARG_MESSAGE_TTL.into(),
        AMQPValue::LongLongInt(i64::from(topology.retry_delay_ms)),
    );
    arguments.insert(
        ARG_DEAD_LETTER_EXCHANGE.into(),
        AMQPValue::LongString(topology.exchange.as_str().into()),
    );
    arguments.insert(
        ARG_DEAD_LETTER_ROUTING_KEY.into(),
        AMQPValue::LongString(topology.queue.as_str().into()),
    );
    arguments
}

fn bindings(topology: &QueueTopology) -> [(&str, &str, &str); 3] {
    let dlx = topology.dead_letter_exchange.as_str();
    [
        (
            topology.queue.as_str(),
            topology.exchange.as_str(),
            topology.queue.as_str(),
        ),
        (
            topology.delay_queue.as_str(),
            dlx,
            topology.delay_queue.as_str(),
        ),
        (
            topology.last_resort_queue.as_str(),
            dlx,
            topology.last_resort_queue.as_str(),
        ),
    ]
}

pub struct TopologyManager<'a> {
    broker: &'a BrokerConnection,
    topology: &'a QueueTopology,
}

impl<'a> TopologyManager<'a> {
    pub fn new(broker: &'a BrokerConnection, topology: &'a QueueTopology) -> Self {
        Self { broker, topology }
    }

    /// Declare exchanges, then queues, then bindings.
    ///
    /// Re-running against an identical topology changes nothing. A queue or
    /// exchange that already exists with different arguments makes the
    /// broker refuse the declaration, which surfaces as an error.
    pub async fn setup(&self) -> Result<(), BrokerError> {
        let topology = self.topology;
        let channel = self.broker.channel();

        info!(
            target = "infra::broker::topology",
            queue = %topology.queue,
            exchange = %topology.exchange,
            dead_letter_exchange = %topology.dead_letter_exchange,
            retry_delay_ms = topology.retry_delay_ms,
            "Setting up queue topology"
        );

        for exchange in [&topology.exchange, &topology.dead_letter_exchange] {
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Direct,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|err| BrokerError::topology("exchange_declare", exchange, err))?;
            debug!(
                target = "infra::broker::topology",
                exchange = %exchange,
                "Declared exchange"
            );
        }

        let queues = [
            (&topology.queue, main_queue_arguments(topology)),
            (&topology.delay_queue, delay_queue_arguments(topology)),
            (&topology.last_resort_queue, FieldTable::default()),
        ];
        for (queue, arguments) in queues {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    arguments,
                )
                .await
                .map_err(|err| BrokerError::topology("queue_declare", queue, err))?;
            debug!(
                target = "infra::broker::topology",
                queue = %queue,
                "Declared queue"
            );
        }

        for (queue, exchange, routing_key) in bindings(topology) {
            channel
                .queue_bind(
                    queue,
                    exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|err| BrokerError::topology("queue_bind", queue, err))?;
            debug!(
                target = "infra::broker::topology",
                queue,
                exchange,
                routing_key,
                "Bound queue"
            );
        }

        info!(
            target = "infra::broker::topology",
            queue = %topology.queue,
            "Queue topology ready"
        );
        Ok(())
    }

    /// Check that every exchange and queue exists without creating anything.
    ///
    /// Each check runs on its own channel because a failed passive
    /// declaration closes the channel it ran on.
    pub async fn verify(&self) -> Result<(), BrokerError> {
        let topology = self.topology;

        for exchange in [&topology.exchange, &topology.dead_letter_exchange] {
            let channel = self.broker.create_channel().await?;
            let result = channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Direct,
                    ExchangeDeclareOptions {
                        passive: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await;
            self.finish_check(channel, "exchange", exchange, result)
                .await?;
        }

        for queue in [
            &topology.queue,
            &topology.delay_queue,
            &topology.last_resort_queue,
        ] {
            let channel = self.broker.create_channel().await?;
            let result = channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        passive: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map(|_| ());
            self.finish_check(channel, "queue", queue, result).await?;
        }

        info!(
            target = "infra::broker::topology",
            queue = %topology.queue,
            "Topology verification succeeded"
        );
        Ok(())
    }

    async fn finish_check(
        &self,
        channel: lapin::Channel,
        kind: &'static str,
        name: &str,
        result: Result<(), lapin::Error>,
    ) -> Result<(), BrokerError> {
        match result {
            Ok(()) => {
                let _ = channel.close(REPLY_SUCCESS, "OK").await;
                Ok(())
            }
            Err(err) => {
                warn!(
                    target = "infra::broker::topology",
                    queue = %self.topology.queue,
                    kind,
                    name,
                    error = %err,
                    "Topology verification failed"
                );
                Err(BrokerError::topology("verify", name, err))
            }
        }
    }
}
