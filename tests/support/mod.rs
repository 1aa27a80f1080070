//! In-process doubles for the broker, the durable store and the stage
//! collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use docpipe::application::broker::{
    Acknowledger, BrokerError, DeathRecord, Delivery, DeliverySource, DeliveryStream,
    MessageMetadata, Publisher,
};
use docpipe::application::collaborators::{
    CollaboratorError, DocumentRenderer, ObjectStore, TextTransformer,
};
use docpipe::application::repos::{RepoError, TasksRepo};
use docpipe::domain::entities::{DurableTaskRecord, NewDurableTask, TaskMessage};

pub const EXCHANGE: &str = "pipeline";
pub const DEAD_LETTER_EXCHANGE: &str = "pipeline.dlx";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub metadata: Option<MessageMetadata>,
}

impl Published {
    pub fn message(&self) -> TaskMessage {
        TaskMessage::from_slice(&self.payload).expect("published payload should decode")
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.fail.store(true, Ordering::SeqCst);
        publisher
    }

    pub async fn published(&self) -> Vec<Published> {
        self.published.lock().await.clone()
    }
}

impl RecordingPublisher {
    async fn record(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        metadata: Option<MessageMetadata>,
    ) -> Result<(), BrokerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrokerError::publish(
                exchange,
                routing_key,
                "channel closed",
            ));
        }
        self.published.lock().await.push(Published {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: payload.to_vec(),
            metadata,
        });
        Ok(())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        self.record(exchange, routing_key, payload, None).await
    }

    async fn publish_with_metadata(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        metadata: &MessageMetadata,
    ) -> Result<(), BrokerError> {
        self.record(exchange, routing_key, payload, Some(metadata.clone()))
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Reject,
}

#[derive(Clone, Default)]
pub struct SettlementLog {
    entries: Arc<Mutex<Vec<Settlement>>>,
}

impl SettlementLog {
    pub async fn entries(&self) -> Vec<Settlement> {
        self.entries.lock().await.clone()
    }

    pub fn delivery(&self, body: Vec<u8>, metadata: MessageMetadata) -> Delivery {
        Delivery {
            body,
            metadata,
            acker: Box::new(RecordingAcker {
                log: self.entries.clone(),
            }),
        }
    }

    pub fn message(&self, id: Uuid, deaths: u64) -> Delivery {
        let body = TaskMessage::new(id)
            .to_bytes()
            .expect("encode message");
        self.delivery(body, died(deaths))
    }
}

struct RecordingAcker {
    log: Arc<Mutex<Vec<Settlement>>>,
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.log.lock().await.push(Settlement::Ack);
        Ok(())
    }

    async fn reject(&self) -> Result<(), BrokerError> {
        self.log.lock().await.push(Settlement::Reject);
        Ok(())
    }
}

/// Metadata for a message dead-lettered `count` times from one queue.
pub fn died(count: u64) -> MessageMetadata {
    if count == 0 {
        return MessageMetadata::default();
    }
    MessageMetadata {
        deaths: vec![DeathRecord {
            queue: "ingest".to_string(),
            reason: "rejected".to_string(),
            count,
        }],
    }
}

/// Yields scripted deliveries, then either ends or stays open.
pub struct ScriptedSource {
    deliveries: Mutex<Vec<Delivery>>,
    keep_open: bool,
    subscriptions: Mutex<Vec<(String, u16)>>,
}

impl ScriptedSource {
    pub fn ending(deliveries: Vec<Delivery>) -> Self {
        Self {
            deliveries: Mutex::new(deliveries),
            keep_open: false,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn open(deliveries: Vec<Delivery>) -> Self {
        Self {
            keep_open: true,
            ..Self::ending(deliveries)
        }
    }

    pub async fn subscriptions(&self) -> Vec<(String, u16)> {
        self.subscriptions.lock().await.clone()
    }
}

#[async_trait]
impl DeliverySource for ScriptedSource {
    async fn subscribe(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, BrokerError> {
        self.subscriptions
            .lock()
            .await
            .push((queue.to_string(), prefetch));
        let deliveries = std::mem::take(&mut *self.deliveries.lock().await);
        let scripted = stream::iter(deliveries.into_iter().map(Ok));
        if self.keep_open {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }
}

/// Durable store keyed by task id with the same unique-id behaviour as the
/// database table.
#[derive(Default)]
pub struct MemoryTasksRepo {
    records: Mutex<HashMap<Uuid, DurableTaskRecord>>,
}

impl MemoryTasksRepo {
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn get(&self, id: Uuid) -> Option<DurableTaskRecord> {
        self.records.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl TasksRepo for MemoryTasksRepo {
    async fn create_task(&self, task: NewDurableTask) -> Result<DurableTaskRecord, RepoError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&task.id) {
            return Err(RepoError::Duplicate {
                constraint: "tasks_pkey".to_string(),
            });
        }
        let record = DurableTaskRecord {
            id: task.id,
            user_id: task.user_id,
            pdf_url: task.pdf_url,
            status: task.status,
            error: task.error,
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
        };
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_task(&self, id: Uuid) -> Result<Option<DurableTaskRecord>, RepoError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn list_tasks_for_owner(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<DurableTaskRecord>, RepoError> {
        let mut owned: Vec<_> = self
            .records
            .lock()
            .await
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(owned)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, RepoError> {
        Ok(self.records.lock().await.remove(&id).is_some())
    }
}

/// Wraps the input in a markdown heading, or fails on demand.
#[derive(Default)]
pub struct FakeTransformer {
    fail: AtomicBool,
    empty: AtomicBool,
}

impl FakeTransformer {
    pub fn failing() -> Self {
        let transformer = Self::default();
        transformer.fail.store(true, Ordering::SeqCst);
        transformer
    }

    pub fn empty() -> Self {
        let transformer = Self::default();
        transformer.empty.store(true, Ordering::SeqCst);
        transformer
    }

    pub fn recover(&self) {
        self.fail.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl TextTransformer for FakeTransformer {
    async fn transform(&self, text: &str) -> Result<String, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::transform("model unavailable"));
        }
        if self.empty.load(Ordering::SeqCst) {
            return Ok(String::new());
        }
        Ok(format!("# Document\n\n{text}\n"))
    }
}

#[derive(Default)]
pub struct FakeRenderer {
    fail: AtomicBool,
}

impl FakeRenderer {
    pub fn failing() -> Self {
        let renderer = Self::default();
        renderer.fail.store(true, Ordering::SeqCst);
        renderer
    }
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::render("converter exited with status 1"));
        }
        let mut pdf = b"%PDF-1.4\n".to_vec();
        pdf.extend_from_slice(markdown.as_bytes());
        Ok(pdf)
    }
}

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeObjectStore {
    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<String, CollaboratorError> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(format!("https://files.test/pdf/{key}"))
    }
}
