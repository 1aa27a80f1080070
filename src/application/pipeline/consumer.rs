use std::{future::Future, sync::Arc, time::Instant};

use futures::StreamExt;
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::application::{
    broker::{
        BrokerError, Delivery, DeliverySource, MessageMetadata, Publisher, QueueTopology,
        death_count,
    },
    pipeline::{Stage, StageOutcome},
};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Unacknowledged deliveries a worker may hold.
pub const PREFETCH_COUNT: u16 = 1;

pub(crate) const METRIC_MESSAGES_TOTAL: &str = "docpipe_messages_total";
pub(crate) const METRIC_ESCALATIONS_TOTAL: &str = "docpipe_escalations_total";
pub(crate) const METRIC_STAGE_DURATION_MS: &str = "docpipe_stage_duration_ms";

/// When a delivery stops being retried and where it goes instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub dead_letter_exchange: String,
    pub last_resort_routing_key: String,
}

impl RetryPolicy {
    pub fn new(topology: &QueueTopology, max_retries: u32) -> Self {
        Self {
            max_retries,
            dead_letter_exchange: topology.dead_letter_exchange.clone(),
            last_resort_routing_key: topology.last_resort_queue.clone(),
        }
    }

    pub fn decide(&self, metadata: &MessageMetadata) -> DeliveryDecision {
        let deaths = death_count(metadata);
        if deaths > self.max_retries {
            DeliveryDecision::Escalate { deaths }
        } else {
            DeliveryDecision::Process { deaths }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Process { deaths: u32 },
    Escalate { deaths: u32 },
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked(StageOutcome),
    Rejected,
    Escalated,
}

/// Drives one stage from one queue, one message at a time.
pub struct ReliableConsumer {
    stage: Arc<dyn Stage>,
    publisher: Arc<dyn Publisher>,
    policy: RetryPolicy,
}

impl ReliableConsumer {
    pub fn new(stage: Arc<dyn Stage>, publisher: Arc<dyn Publisher>, policy: RetryPolicy) -> Self {
        Self {
            stage,
            publisher,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Consume `queue` until `shutdown` resolves.
    ///
    /// Shutdown is only observed between deliveries; a dispatched message
    /// always runs to its ack or reject. Broker failures end the loop with an
    /// error so the process can exit and be restarted.
    pub async fn start_consuming<F>(
        &self,
        source: &dyn DeliverySource,
        queue: &str,
        shutdown: F,
    ) -> Result<(), BrokerError>
    where
        F: Future<Output = ()> + Send,
    {
        let mut deliveries = source.subscribe(queue, PREFETCH_COUNT).await?;
        let stage = self.stage.kind().as_str();

        info!(
            target = "application::pipeline::consumer",
            stage,
            queue,
            prefetch = PREFETCH_COUNT,
            max_retries = self.policy.max_retries,
            "Consumer started"
        );

        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!(
                        target = "application::pipeline::consumer",
                        stage,
                        queue,
                        "Shutdown requested; consumer stopping"
                    );
                    return Ok(());
                }
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.handle(delivery).await?;
                }
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(BrokerError::consume(queue, "delivery stream closed"));
                }
            }
        }
    }

    /// Apply the retry policy to one delivery, run the stage and settle it.
    pub async fn handle(&self, delivery: Delivery) -> Result<Disposition, BrokerError> {
        let stage = self.stage.kind().as_str();

        let deaths = match self.policy.decide(&delivery.metadata) {
            DeliveryDecision::Escalate { deaths } => {
                self.escalate(&delivery, deaths).await?;
                return Ok(Disposition::Escalated);
            }
            DeliveryDecision::Process { deaths } => deaths,
        };

        debug!(
            target = "application::pipeline::consumer",
            stage,
            deaths,
            body_bytes = delivery.body.len(),
            "Dispatching delivery"
        );

        let started_at = Instant::now();
        let result = self.stage.process_message(&delivery.body).await;
        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(outcome) => {
                delivery.acker.ack().await?;
                counter!(METRIC_MESSAGES_TOTAL, "stage" => stage, "result" => outcome.as_str())
                    .increment(1);
                histogram!(METRIC_STAGE_DURATION_MS, "stage" => stage).record(elapsed_ms);
                info!(
                    target = "application::pipeline::consumer",
                    stage,
                    outcome = outcome.as_str(),
                    deaths,
                    elapsed_ms = elapsed_ms as u64,
                    "Delivery acknowledged"
                );
                Ok(Disposition::Acked(outcome))
            }
            Err(err) => {
                delivery.acker.reject().await?;
                counter!(METRIC_MESSAGES_TOTAL, "stage" => stage, "result" => "rejected")
                    .increment(1);
                histogram!(METRIC_STAGE_DURATION_MS, "stage" => stage).record(elapsed_ms);
                warn!(
                    target = "application::pipeline::consumer",
                    stage,
                    deaths,
                    elapsed_ms = elapsed_ms as u64,
                    error = %err,
                    "Stage failed; delivery rejected for delayed retry"
                );
                Ok(Disposition::Rejected)
            }
        }
    }

    async fn escalate(&self, delivery: &Delivery, deaths: u32) -> Result<(), BrokerError> {
        let stage = self.stage.kind().as_str();

        if let Err(err) = self
            .publisher
            .publish_with_metadata(
                &self.policy.dead_letter_exchange,
                &self.policy.last_resort_routing_key,
                &delivery.body,
                &delivery.metadata,
            )
            .await
        {
            error!(
                target = "application::pipeline::consumer",
                stage,
                deaths,
                last_resort = %self.policy.last_resort_routing_key,
                error = %err,
                "Failed to move exhausted delivery to last-resort queue"
            );
            return Err(err);
        }

        delivery.acker.ack().await?;
        counter!(METRIC_ESCALATIONS_TOTAL, "stage" => stage).increment(1);
        error!(
            target = "application::pipeline::consumer",
            stage,
            deaths,
            max_retries = self.policy.max_retries,
            last_resort = %self.policy.last_resort_routing_key,
            "Retries exhausted; delivery moved to last-resort queue"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::broker::DeathRecord;

    fn policy() -> RetryPolicy {
        let topology = QueueTopology::from_queue_name("ingest", "pipeline", "pipeline.dlx");
        RetryPolicy::new(&topology, DEFAULT_MAX_RETRIES)
    }

    fn deaths(count: u64) -> MessageMetadata {
        MessageMetadata {
            deaths: vec![DeathRecord {
                queue: "ingest".to_string(),
                reason: "rejected".to_string(),
                count,
            }],
        }
    }

    #[test]
    fn policy_routes_to_last_resort_of_its_queue() {
        let policy = policy();
        assert_eq!(policy.dead_letter_exchange, "pipeline.dlx");
        assert_eq!(policy.last_resort_routing_key, "ingest.last_resort");
    }

    #[test]
    fn processes_up_to_the_retry_limit() {
        let policy = policy();
        assert_eq!(
            policy.decide(&MessageMetadata::default()),
            DeliveryDecision::Process { deaths: 0 }
        );
        assert_eq!(
            policy.decide(&deaths(3)),
            DeliveryDecision::Process { deaths: 3 }
        );
    }

    #[test]
    fn escalates_past_the_retry_limit() {
        assert_eq!(
            policy().decide(&deaths(4)),
            DeliveryDecision::Escalate { deaths: 4 }
        );
    }
}
