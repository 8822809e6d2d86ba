//! Redis 消息发布者
//!
//! 基于 `ConnectionManager`，断线后由连接管理器自动重连。

use application::{EventPublisher, TransportError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info};

use super::error::{RedisError, RedisResult};

/// 把 Outbox 事件与通话信令发布到 Redis 频道
#[derive(Clone)]
pub struct RedisEventPublisher {
    connection: ConnectionManager,
}

impl RedisEventPublisher {
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;
        let connection = client.get_connection_manager().await?;
        info!("Redis 发布者创建成功");
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    async fn publish_raw(&self, channel: &str, payload: &str) -> RedisResult<i64> {
        let mut conn = self.connection.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| RedisError::PublishError {
                message: format!("发布到频道 {} 失败: {}", channel, e),
            })
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        let receivers = self.publish_raw(channel, payload).await?;
        debug!(channel, receivers, "发布消息成功");
        Ok(())
    }
}
