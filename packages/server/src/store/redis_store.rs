//! Redis implementation of [`SharedStore`].

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

use super::SharedStore;
use crate::error::StoreError;

pub struct RedisStore {
    conn: Mutex<MultiplexedConnection>,
}

impl RedisStore {
    /// Connects eagerly so a bad store address fails at startup instead
    /// of on the first presence write.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.lock().await;
        let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut *conn).await?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().await;
        let n: u64 = conn.exists(key).await?;
        Ok(n > 0)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.sadd(set, member).await?;
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.srem(set, member).await?;
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.lock().await;
        let members: Vec<String> = conn.smembers(set).await?;
        Ok(members)
    }
}
