//! Redis-backed `Store` implementation.
//!
//! Uses `aio::ConnectionManager` for resilient async connections and
//! pipelined `ZADD`/`ZRANGEBYSCORE` scoring for the sorted-set indexes.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::keys;
use crate::store::{Store, StoreError, StreamEntry};

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::from)?;
        let conn = client.get_connection_manager().await.map_err(StoreError::from)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn queue_push(&self, task_json: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(keys::QUEUE, task_json).await?;
        Ok(())
    }

    async fn queue_push_front(&self, task_json: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(keys::QUEUE, task_json).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn queue_pop_blocking(&self, timeout: Duration) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(keys::QUEUE)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(result.map(|(_, payload)| payload))
    }

    async fn queue_snapshot(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(keys::QUEUE, 0, -1).await?;
        Ok(values)
    }

    async fn queue_remove_one(&self, task_json: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(keys::QUEUE, 1, task_json).await?;
        Ok(removed > 0)
    }

    async fn queued_index_add(&self, score: f64, task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(keys::QUEUED_INDEX, task_id, score).await?;
        Ok(())
    }

    async fn queued_index_remove(&self, task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(keys::QUEUED_INDEX, task_id).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, json), fields(task.id = %task_id))]
    async fn set_task(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(keys::task(task_id), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(keys::task(task_id)).await?;
        Ok(value)
    }

    async fn del_task(&self, task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys::task(task_id)).await?;
        Ok(())
    }

    async fn set_result(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(keys::task_result(task_id), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(keys::task_result(task_id)).await?;
        Ok(value)
    }

    async fn del_result(&self, task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys::task_result(task_id)).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, result_json), fields(task.id = %task_id))]
    async fn stream_append(&self, task_id: &str, result_json: &str) -> Result<String, StoreError> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(keys::task_stream(task_id), "*", &[("result", result_json)])
            .await?;
        Ok(id)
    }

    async fn stream_read(
        &self,
        task_id: &str,
        from_id: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .count(count)
            .block(block.as_millis() as usize);
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[keys::task_stream(task_id)], &[from_id], &opts)
            .await?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for id_entry in key.ids {
                let result_json: String = id_entry
                    .map
                    .get("result")
                    .and_then(|v| match v {
                        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
                        redis::Value::SimpleString(s) => Some(s.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                entries.push(StreamEntry {
                    id: id_entry.id,
                    result_json,
                });
            }
        }
        Ok(entries)
    }

    async fn stream_expire(&self, task_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(keys::task_stream(task_id), ttl.as_secs() as i64)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(task.id = %task_id))]
    async fn processing_add(&self, task_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(keys::PROCESSING, task_id).await?;
        Ok(added > 0)
    }

    async fn processing_remove(&self, task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(keys::PROCESSING, task_id).await?;
        Ok(())
    }

    async fn processing_members(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(keys::PROCESSING).await?;
        Ok(members)
    }

    async fn delayed_add(&self, run_at: f64, task_json: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(keys::DELAYED, task_json, run_at).await?;
        Ok(())
    }

    async fn delayed_range_due(&self, now: f64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn
            .zrangebyscore(keys::DELAYED, f64::NEG_INFINITY, now)
            .await?;
        Ok(values)
    }

    async fn delayed_remove(&self, task_json: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(keys::DELAYED, task_json).await?;
        Ok(())
    }

    async fn history_add(&self, score: f64, task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(keys::HISTORY_INDEX, task_id, score).await?;
        Ok(())
    }

    async fn history_set(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(keys::history_entry(task_id), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn history_get(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(keys::history_entry(task_id)).await?;
        Ok(value)
    }

    async fn history_range_rev(&self, offset: usize, count: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let start = offset as isize;
        let stop = (offset + count).saturating_sub(1) as isize;
        let ids: Vec<String> = conn.zrevrange(keys::HISTORY_INDEX, start, stop).await?;
        Ok(ids)
    }

    async fn history_remove_older(&self, cutoff: f64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zrembyscore::<_, _, _, ()>(keys::HISTORY_INDEX, f64::NEG_INFINITY, cutoff)
            .await?;
        Ok(())
    }

    async fn history_all_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrevrange(keys::HISTORY_INDEX, 0, -1).await?;
        Ok(ids)
    }

    async fn workers_put(&self, worker_id: &str, json: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(keys::WORKERS, worker_id, json).await?;
        Ok(())
    }

    async fn workers_get(&self, worker_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(keys::WORKERS, worker_id).await?;
        Ok(value)
    }

    async fn workers_del(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(keys::WORKERS, worker_id).await?;
        Ok(())
    }

    async fn workers_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        let map: std::collections::HashMap<String, String> = conn.hgetall(keys::WORKERS).await?;
        Ok(map.into_iter().collect())
    }

    async fn cancel_set(&self, task_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(keys::cancelled(task_id), "1", ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn cancel_exists(&self, task_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(keys::cancelled(task_id)).await?;
        Ok(exists)
    }

    async fn progress_put(&self, task_id: &str, json: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(keys::progress(task_id), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn progress_get(&self, task_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(keys::progress(task_id)).await?;
        Ok(value)
    }
}
