//! Redis-backed ephemeral state.
//!
//! Each record is a hash under `task:<id>` or `job:<id>`. A write replaces the
//! hash and resets its expiry in one `MULTI`/`EXEC` block, so readers never see
//! a half-written record or a record without a TTL. Every field is always
//! written, which makes an empty `HGETALL` reply unambiguous: the key does not
//! exist.

use std::{collections::HashMap, time::Duration};

use ::redis::{AsyncCommands, aio::MultiplexedConnection};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::{
    application::state::{StateError, StateStore},
    domain::entities::{Job, Task},
};

#[derive(Clone)]
pub struct RedisStateStore {
    conn: MultiplexedConnection,
    task_ttl: Duration,
    job_ttl: Duration,
}

impl RedisStateStore {
    pub async fn connect(
        url: &str,
        task_ttl: Duration,
        job_ttl: Duration,
    ) -> Result<Self, StateError> {
        let client = ::redis::Client::open(url)
            .map_err(|err| StateError::backend(format!("failed to create Redis client: {err}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| StateError::backend(format!("failed to connect to Redis: {err}")))?;

        Ok(Self::with_connection(conn, task_ttl, job_ttl))
    }

    pub fn with_connection(
        conn: MultiplexedConnection,
        task_ttl: Duration,
        job_ttl: Duration,
    ) -> Self {
        Self {
            conn,
            task_ttl,
            job_ttl,
        }
    }

    async fn replace(
        &self,
        key: &str,
        fields: &[(&'static str, String)],
        ttl: Duration,
    ) -> Result<(), StateError> {
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| StateError::backend(format!("ttl for {key} exceeds supported range")))?;

        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .del(key)
            .ignore()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_secs)
            .ignore();

        let mut conn = self.conn.clone();
        let () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|err| map_redis_error(err, key))?;

        debug!(
            target = "infra::state::redis",
            key,
            ttl_secs,
            "Record written"
        );
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<HashMap<String, String>>, StateError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|err| map_redis_error(err, key))?;

        Ok((!fields.is_empty()).then_some(fields))
    }

    async fn remove(&self, key: &str) -> Result<(), StateError> {
        let mut conn = self.conn.clone();
        let _: usize = conn
            .del(key)
            .await
            .map_err(|err| map_redis_error(err, key))?;
        Ok(())
    }
}

fn map_redis_error(err: ::redis::RedisError, key: &str) -> StateError {
    StateError::backend(format!("Redis error for key {key}: {err}"))
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn put_task(&self, task: &Task) -> Result<(), StateError> {
        self.replace(&Task::key(task.id), &task.to_fields(), self.task_ttl)
            .await
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StateError> {
        match self.fetch(&Task::key(id)).await? {
            Some(fields) => Ok(Some(Task::from_fields(id, &fields)?)),
            None => Ok(None),
        }
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), StateError> {
        self.remove(&Task::key(id)).await
    }

    async fn put_job(&self, job: &Job) -> Result<(), StateError> {
        self.replace(&Job::key(job.id), &job.to_fields(), self.job_ttl)
            .await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StateError> {
        match self.fetch(&Job::key(id)).await? {
            Some(fields) => Ok(Some(Job::from_fields(id, &fields)?)),
            None => Ok(None),
        }
    }

    async fn delete_job(&self, id: Uuid) -> Result<(), StateError> {
        self.remove(&Job::key(id)).await
    }
}
