//! Redis-backed queue store

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use std::time::Duration;

use super::{QueueClient, QueueError, QueueResult};

/// Queue client on top of a Redis connection pool
///
/// Blocking commands hold their pooled connection for the whole wait, so the
/// pool must be larger than the number of concurrent blocking callers.
#[derive(Clone)]
pub struct RedisQueue {
    pool: Pool,
}

impl RedisQueue {
    /// Connect and verify the store answers PING
    pub async fn connect(url: &str, pool_size: usize) -> QueueResult<Self> {
        let pool = PoolConfig::from_url(url)
            .builder()
            .map_err(|e| QueueError::Unavailable(format!("pool builder: {e}")))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| QueueError::Unavailable(format!("pool build: {e}")))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

        tracing::info!(url = %url, pool_size, "Connected to queue store");

        Ok(Self { pool })
    }

    async fn conn(&self) -> QueueResult<Connection> {
        Ok(self.pool.get().await?)
    }
}

fn timeout_secs(timeout: Duration) -> f64 {
    // Zero would block forever
    timeout.as_secs_f64().max(0.01)
}

#[async_trait]
impl QueueClient for RedisQueue {
    async fn blocking_move(
        &self,
        src: &str,
        dst: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("BLMOVE")
            .arg(src)
            .arg(dst)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(timeout_secs(timeout))
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn blocking_pop(&self, queue: &str, timeout: Duration) -> QueueResult<Option<String>> {
        let mut conn = self.conn().await?;
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(queue)
            .arg(timeout_secs(timeout))
            .query_async(&mut *conn)
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn push_back(&self, queue: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(value)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn push_front(&self, queue: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(queue)
            .arg(value)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, queue: &str, value: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("LREM")
            .arg(queue)
            .arg(1)
            .arg(value)
            .query_async(&mut *conn)
            .await?;
        Ok(removed > 0)
    }

    async fn range_all(&self, queue: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(queue)
            .arg(0)
            .arg(-1)
            .query_async(&mut *conn)
            .await?;
        Ok(values)
    }

    async fn len(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let len: usize = redis::cmd("LLEN")
            .arg(queue)
            .query_async(&mut *conn)
            .await?;
        Ok(len)
    }

    async fn contains(&self, queue: &str, value: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let position: Option<i64> = redis::cmd("LPOS")
            .arg(queue)
            .arg(value)
            .query_async(&mut *conn)
            .await?;
        Ok(position.is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_key(&self, key: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut *conn).await?;
        Ok(removed > 0)
    }

    async fn schedule(&self, set: &str, value: &str, score: i64) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("ZADD")
            .arg(set)
            .arg(score)
            .arg(value)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn pop_due(&self, set: &str, max_score: i64, limit: usize) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let candidates: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(set)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut *conn)
            .await?;

        let mut popped = Vec::with_capacity(candidates.len());
        for member in candidates {
            // Another promoter may have taken it between the range and the removal
            let removed: i64 = redis::cmd("ZREM")
                .arg(set)
                .arg(&member)
                .query_async(&mut *conn)
                .await?;
            if removed > 0 {
                popped.push(member);
            }
        }
        Ok(popped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_secs_never_zero() {
        assert!(timeout_secs(Duration::ZERO) > 0.0);
        assert_eq!(timeout_secs(Duration::from_millis(1500)), 1.5);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_move_and_remove() {
        let queue = RedisQueue::connect("redis://localhost:6379", 4).await.unwrap();
        let src = format!("taskgrid-test:{}:src", uuid::Uuid::new_v4());
        let dst = format!("taskgrid-test:{}:dst", uuid::Uuid::new_v4());

        queue.push_back(&src, "a").await.unwrap();
        let moved = queue
            .blocking_move(&src, &dst, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(moved.as_deref(), Some("a"));
        assert!(queue.contains(&dst, "a").await.unwrap());
        assert!(queue.remove(&dst, "a").await.unwrap());
        assert_eq!(queue.len(&dst).await.unwrap(), 0);
    }
}
