//! In-process ephemeral state with the same field layout and TTL behaviour as
//! the Redis store. Used for local runs and tests.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::{
    application::state::{StateError, StateStore},
    domain::entities::{Job, Task},
};

#[derive(Debug)]
struct Entry {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct InMemoryStateStore {
    entries: DashMap<String, Entry>,
    task_ttl: Duration,
    job_ttl: Duration,
}

impl InMemoryStateStore {
    pub fn new(task_ttl: Duration, job_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            task_ttl,
            job_ttl,
        }
    }

    /// Drop the task record as if its TTL had lapsed.
    pub fn expire_task(&self, id: Uuid) {
        self.entries.remove(&Task::key(id));
    }

    /// Drop the job record as if its TTL had lapsed.
    pub fn expire_job(&self, id: Uuid) {
        self.entries.remove(&Job::key(id));
    }

    /// Number of stored records, lapsed or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remaining lifetime of a live record.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        entry.expires_at.checked_duration_since(Instant::now())
    }

    fn replace(&self, key: String, fields: &[(&'static str, String)], ttl: Duration) {
        let fields = fields
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect();
        self.entries.insert(
            key,
            Entry {
                fields,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn fetch(&self, key: &str) -> Option<HashMap<String, String>> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.expires_at > now {
                return Some(entry.fields.clone());
            }
        }
        // A record written after the check carries a later deadline and is kept.
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_secs(900))
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put_task(&self, task: &Task) -> Result<(), StateError> {
        self.replace(Task::key(task.id), &task.to_fields(), self.task_ttl);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StateError> {
        self.fetch(&Task::key(id))
            .map(|fields| Task::from_fields(id, &fields))
            .transpose()
            .map_err(StateError::from)
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), StateError> {
        self.entries.remove(&Task::key(id));
        Ok(())
    }

    async fn put_job(&self, job: &Job) -> Result<(), StateError> {
        self.replace(Job::key(job.id), &job.to_fields(), self.job_ttl);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StateError> {
        self.fetch(&Job::key(id))
            .map(|fields| Job::from_fields(id, &fields))
            .transpose()
            .map_err(StateError::from)
    }

    async fn delete_job(&self, id: Uuid) -> Result<(), StateError> {
        self.entries.remove(&Job::key(id));
        Ok(())
    }
}
