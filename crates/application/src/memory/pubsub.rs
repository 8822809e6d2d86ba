//! 进程内 Pub/Sub，模式语义与 Redis `PSUBSCRIBE` 的尾部通配一致

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{EventPublisher, EventSubscriber, TransportError, TransportMessage};

const SUBSCRIBER_BUFFER: usize = 1024;

struct Subscription {
    patterns: Vec<String>,
    sender: mpsc::Sender<TransportMessage>,
}

#[derive(Default)]
struct PubSubInner {
    subscriptions: Vec<Subscription>,
    published: Vec<TransportMessage>,
    fail_publish: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryPubSub {
    inner: Arc<Mutex<PubSubInner>>,
}

/// `prefix:*` 匹配前缀，其余按全等比较
pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

impl InMemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PubSubInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 之后的发布全部失败（或恢复）
    pub fn set_fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    /// 已成功发布的全部消息
    pub fn published(&self) -> Vec<TransportMessage> {
        self.lock().published.clone()
    }

    pub fn published_on(&self, channel: &str) -> Vec<TransportMessage> {
        self.lock()
            .published
            .iter()
            .filter(|message| message.channel == channel)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.fail_publish {
            return Err(TransportError::Publish(format!("注入的发布失败: {channel}")));
        }

        let message = TransportMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        inner.subscriptions.retain(|subscription| !subscription.sender.is_closed());
        for subscription in &inner.subscriptions {
            if subscription
                .patterns
                .iter()
                .any(|pattern| pattern_matches(pattern, channel))
            {
                if subscription.sender.try_send(message.clone()).is_err() {
                    debug!(channel, "订阅者缓冲已满，丢弃消息");
                }
            }
        }
        inner.published.push(message);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for InMemoryPubSub {
    async fn subscribe(
        &self,
        patterns: &[String],
    ) -> Result<mpsc::Receiver<TransportMessage>, TransportError> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.lock().subscriptions.push(Subscription {
            patterns: patterns.to_vec(),
            sender,
        });
        Ok(receiver)
    }
}
