//! Pub/Sub 传输抽象
//!
//! Outbox Worker 与信令转发器通过 `EventPublisher` 发布，Bridge 通过
//! `EventSubscriber` 以通配模式订阅。生产环境由 Redis 实现。

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::ApplicationError;

/// 从传输层收到的一条消息
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("connection error: {0}")]
    Connection(String),
}

impl From<TransportError> for ApplicationError {
    fn from(value: TransportError) -> Self {
        ApplicationError::Infrastructure(value.to_string())
    }
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError>;
}

#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// 订阅一组通配模式，返回的接收端在订阅断开且无法恢复时关闭
    async fn subscribe(
        &self,
        patterns: &[String],
    ) -> Result<mpsc::Receiver<TransportMessage>, TransportError>;
}
