use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    Channel,
    acker::Acker,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::{AMQPValue, FieldArray, FieldTable, ShortString},
};
use tracing::info;

use crate::application::broker::{
    Acknowledger, BrokerError, DeathRecord, Delivery, DeliverySource, DeliveryStream,
    MessageMetadata, death_count,
};

const X_DEATH_HEADER: &str = "x-death";
const DEATH_COUNT_HEADER: &str = "x-death-count";

#[derive(Clone)]
pub struct AmqpDeliverySource {
    channel: Channel,
}

impl AmqpDeliverySource {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl DeliverySource for AmqpDeliverySource {
    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|err| BrokerError::consume(queue, err))?;

        let consumer_tag = format!("docpipe.{queue}.{}", std::process::id());
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| BrokerError::consume(queue, err))?;

        info!(
            target = "infra::broker::consumer",
            queue,
            prefetch,
            consumer_tag = %consumer_tag,
            "Subscribed to queue"
        );

        let queue = queue.to_string();
        let stream = consumer.map(move |item| match item {
            Ok(delivery) => Ok(Delivery {
                metadata: metadata_from_headers(delivery.properties.headers().as_ref()),
                body: delivery.data,
                acker: Box::new(AmqpAcknowledger {
                    acker: delivery.acker,
                }),
            }),
            Err(err) => Err(BrokerError::consume(queue.as_str(), err)),
        });

        Ok(stream.boxed())
    }
}

struct AmqpAcknowledger {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcknowledger {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(BrokerError::acknowledge)
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.acker
            .nack(BasicNackOptions {
                requeue: false,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(BrokerError::acknowledge)
    }
}

/// Decode the broker's `x-death` header into transport-neutral records.
/// Entries that are not tables are skipped.
pub(crate) fn metadata_from_headers(headers: Option<&FieldTable>) -> MessageMetadata {
    let Some(AMQPValue::FieldArray(records)) =
        headers.and_then(|table| table.inner().get(&ShortString::from(X_DEATH_HEADER)))
    else {
        return MessageMetadata::default();
    };

    let deaths = records
        .as_slice()
        .iter()
        .filter_map(|value| match value {
            AMQPValue::FieldTable(record) => Some(death_record(record)),
            _ => None,
        })
        .collect();

    MessageMetadata { deaths }
}

fn death_record(record: &FieldTable) -> DeathRecord {
    let field = |name: &str| record.inner().get(&ShortString::from(name));

    DeathRecord {
        queue: field("queue").and_then(text_value).unwrap_or_default(),
        reason: field("reason").and_then(text_value).unwrap_or_default(),
        count: field("count").and_then(count_value).unwrap_or(0),
    }
}

fn text_value(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(text) => Some(String::from_utf8_lossy(text.as_bytes()).into_owned()),
        AMQPValue::ShortString(text) => Some(text.as_str().to_string()),
        _ => None,
    }
}

fn count_value(value: &AMQPValue) -> Option<u64> {
    match *value {
        AMQPValue::LongLongInt(count) => u64::try_from(count).ok(),
        AMQPValue::LongInt(count) => u64::try_from(count).ok(),
        AMQPValue::LongUInt(count) => Some(u64::from(count)),
        AMQPValue::ShortInt(count) => u64::try_from(count).ok(),
        AMQPValue::ShortUInt(count) => Some(u64::from(count)),
        AMQPValue::ShortShortInt(count) => u64::try_from(count).ok(),
        AMQPValue::ShortShortUInt(count) => Some(u64::from(count)),
        _ => None,
    }
}

/// Header table carrying a delivery's retry history onto a republished
/// message: the death records under `x-death` plus the computed count.
pub(crate) fn headers_from_metadata(metadata: &MessageMetadata) -> FieldTable {
    let records: Vec<AMQPValue> = metadata
        .deaths
        .iter()
        .map(|death| {
            let mut record = FieldTable::default();
            record.insert(
                "queue".into(),
                AMQPValue::LongString(death.queue.as_str().into()),
            );
            record.insert(
                "reason".into(),
                AMQPValue::LongString(death.reason.as_str().into()),
            );
            record.insert(
                "count".into(),
                AMQPValue::LongLongInt(i64::try_from(death.count).unwrap_or(i64::MAX)),
            );
            AMQPValue::FieldTable(record)
        })
        .collect();

    let mut headers = FieldTable::default();
    headers.insert(
        X_DEATH_HEADER.into(),
        AMQPValue::FieldArray(FieldArray::from(records)),
    );
    headers.insert(
        DEATH_COUNT_HEADER.into(),
        AMQPValue::LongLongInt(i64::from(death_count(metadata))),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn death(queue: &str, reason: &str, count: i64) -> AMQPValue {
        let mut record = FieldTable::default();
        record.insert("queue".into(), AMQPValue::LongString(queue.into()));
        record.insert("reason".into(), AMQPValue::LongString(reason.into()));
        record.insert("count".into(), AMQPValue::LongLongInt(count));
        record.insert("exchange".into(), AMQPValue::LongString("pipeline".into()));
        AMQPValue::FieldTable(record)
    }

    fn headers(records: Vec<AMQPValue>) -> FieldTable {
        let mut headers = FieldTable::default();
        headers.insert(
            X_DEATH_HEADER.into(),
            AMQPValue::FieldArray(FieldArray::from(records)),
        );
        headers
    }

    #[test]
    fn absent_headers_yield_no_deaths() {
        assert_eq!(metadata_from_headers(None), MessageMetadata::default());
        assert_eq!(
            metadata_from_headers(Some(&FieldTable::default())),
            MessageMetadata::default()
        );
    }

    #[test]
    fn reads_rabbitmq_death_records() {
        let table = headers(vec![
            death("ingest.dlq", "expired", 2),
            death("ingest", "rejected", 2),
        ]);
        let metadata = metadata_from_headers(Some(&table));

        assert_eq!(metadata.deaths.len(), 2);
        assert_eq!(metadata.deaths[0].queue, "ingest.dlq");
        assert_eq!(metadata.deaths[0].reason, "expired");
        assert_eq!(metadata.deaths[1].count, 2);
        assert_eq!(death_count(&metadata), 2);
    }

    #[test]
    fn ignores_non_table_entries_and_negative_counts() {
        let table = headers(vec![
            AMQPValue::LongString("garbage".into()),
            death("ingest", "rejected", -1),
        ]);
        let metadata = metadata_from_headers(Some(&table));

        assert_eq!(metadata.deaths.len(), 1);
        assert_eq!(metadata.deaths[0].count, 0);
        assert_eq!(death_count(&metadata), 0);
    }

    #[test]
    fn escalation_headers_keep_the_retry_trail() {
        let original = metadata_from_headers(Some(&headers(vec![
            death("render.dlq", "expired", 4),
            death("render", "rejected", 4),
        ])));

        let republished = headers_from_metadata(&original);

        assert_eq!(metadata_from_headers(Some(&republished)), original);
        assert_eq!(
            republished.inner().get(&ShortString::from(DEATH_COUNT_HEADER)),
            Some(&AMQPValue::LongLongInt(4))
        );
    }
}
