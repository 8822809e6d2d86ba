//! 通话状态的 Redis 存储
//!
//! 每个通话一个 JSON 字符串键，写入时刷新过期时间。

use std::time::Duration;

use application::{ApplicationResult, CallStateStore};
use async_trait::async_trait;
use domain::{CallId, CallState};
use redis::aio::ConnectionManager;
use tracing::debug;

use super::error::RedisError;

const DEFAULT_KEY_PREFIX: &str = "call_state:";

#[derive(Clone)]
pub struct RedisCallStateStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisCallStateStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn key(&self, call_id: CallId) -> String {
        format!("{}{}", self.key_prefix, call_id)
    }
}

#[async_trait]
impl CallStateStore for RedisCallStateStore {
    async fn get(&self, call_id: CallId) -> ApplicationResult<Option<CallState>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(call_id))
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;

        match raw {
            Some(json) => {
                let state = serde_json::from_str(&json).map_err(RedisError::from)?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, state: &CallState, ttl: Duration) -> ApplicationResult<()> {
        let json = serde_json::to_string(state).map_err(RedisError::from)?;
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(self.key(state.call_id))
            .arg(json)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;

        debug!(call_id = %state.call_id, status = %state.status, ttl = seconds, "通话状态已写入");
        Ok(())
    }

    async fn delete(&self, call_id: CallId) -> ApplicationResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.key(call_id))
            .query_async(&mut conn)
            .await
            .map_err(RedisError::from)?;
        Ok(())
    }
}
