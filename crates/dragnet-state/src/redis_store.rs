//! Redis backend for the control-plane store.
//!
//! Key layout comes from [`crate::keys`]. The queue is a sorted set
//! (`ZADD`/`ZPOPMIN`), control and status keys are TTL'd strings, the
//! registry and processing set are sets, logs go to a capped stream with a
//! pub/sub fanout.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::keys;
use crate::traits::ControlStore;

/// Control-plane store over a shared Redis connection manager.
#[derive(Clone)]
pub struct RedisControlStore {
    manager: ConnectionManager,
}

impl RedisControlStore {
    /// Connect to Redis. Fails fast on bad credentials or unreachable host,
    /// which callers treat as a fatal start-up error.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(RedisControlStore { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

fn is_wrong_type(err: &redis::RedisError) -> bool {
    err.code() == Some("WRONGTYPE")
}

#[async_trait]
impl ControlStore for RedisControlStore {
    async fn queue_push(&self, member: &str, score: f64) -> StoreResult<()> {
        let mut con = self.conn();
        match con.zadd::<_, _, _, ()>(keys::TASK_QUEUE, member, score).await {
            Ok(()) => Ok(()),
            // A stale key of another type blocks the queue; drop it and
            // retry once.
            Err(e) if is_wrong_type(&e) => {
                warn!("task queue key held a non-zset value, resetting");
                con.del::<_, ()>(keys::TASK_QUEUE).await?;
                con.zadd::<_, _, _, ()>(keys::TASK_QUEUE, member, score)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn queue_pop_min(&self) -> StoreResult<Option<String>> {
        let mut con = self.conn();
        let popped: Vec<(String, f64)> = con.zpopmin(keys::TASK_QUEUE, 1).await?;
        Ok(popped.into_iter().next().map(|(member, _)| member))
    }

    async fn queue_len(&self) -> StoreResult<u64> {
        let mut con = self.conn();
        Ok(con.zcard(keys::TASK_QUEUE).await?)
    }

    async fn queue_members(&self) -> StoreResult<Vec<(String, f64)>> {
        let mut con = self.conn();
        let members: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(keys::TASK_QUEUE)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut con)
            .await?;
        Ok(members)
    }

    async fn processing_add(&self, task_id: &str) -> StoreResult<()> {
        let mut con = self.conn();
        con.sadd::<_, _, ()>(keys::TASK_PROCESSING, task_id).await?;
        Ok(())
    }

    async fn processing_remove(&self, task_id: &str) -> StoreResult<()> {
        let mut con = self.conn();
        con.srem::<_, _, ()>(keys::TASK_PROCESSING, task_id).await?;
        Ok(())
    }

    async fn processing_members(&self) -> StoreResult<Vec<String>> {
        let mut con = self.conn();
        Ok(con.smembers(keys::TASK_PROCESSING).await?)
    }

    async fn put_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut con = self.conn();
        match ttl {
            Some(ttl) => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async::<_, ()>(&mut con)
                    .await?;
            }
            None => {
                con.set::<_, _, ()>(key, value).await?;
            }
        }
        Ok(())
    }

    async fn get_string(&self, key: &str) -> StoreResult<Option<String>> {
        let mut con = self.conn();
        Ok(con.get(key).await?)
    }

    async fn take_string(&self, key: &str) -> StoreResult<Option<String>> {
        let mut con = self.conn();
        let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut con).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut con = self.conn();
        con.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut con = self.conn();
        Ok(con.exists(key).await?)
    }

    async fn register_worker(&self, name: &str) -> StoreResult<()> {
        let mut con = self.conn();
        con.sadd::<_, _, ()>(keys::WORKERS, name).await?;
        Ok(())
    }

    async fn remove_worker(&self, name: &str) -> StoreResult<()> {
        let mut con = self.conn();
        con.srem::<_, _, ()>(keys::WORKERS, name).await?;
        Ok(())
    }

    async fn workers(&self) -> StoreResult<Vec<String>> {
        let mut con = self.conn();
        Ok(con.smembers(keys::WORKERS).await?)
    }

    async fn append_log(&self, entry_json: &str) -> StoreResult<()> {
        let mut con = self.conn();
        redis::cmd("XADD")
            .arg(keys::WORKER_LOGS_STREAM)
            .arg("MAXLEN")
            .arg("~")
            .arg(keys::LOG_STREAM_MAXLEN)
            .arg("*")
            .arg("data")
            .arg(entry_json)
            .query_async::<_, ()>(&mut con)
            .await?;
        Ok(())
    }

    async fn publish_log(&self, entry_json: &str) -> StoreResult<()> {
        let mut con = self.conn();
        con.publish::<_, _, ()>(keys::WORKER_LOGS_CHANNEL, entry_json)
            .await?;
        Ok(())
    }
}
