//! Redis 模式订阅者
//!
//! 以 `PSUBSCRIBE` 订阅频道模式，把消息转发到有界通道。连接断开后按退避
//! 策略重连，直到成功、达到上限或收到关闭信号。

use std::time::Duration;

use application::{Backoff, EventSubscriber, TransportError, TransportMessage};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::PubSub;
use redis::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{RedisError, RedisResult};

#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    /// 转发通道容量
    pub channel_capacity: usize,
    pub reconnect: Backoff,
    /// `None` 表示无限重连
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            reconnect: Backoff::exponential(Duration::from_millis(500), Duration::from_secs(30)),
            max_reconnect_attempts: None,
        }
    }
}

pub struct RedisEventSubscriber {
    client: Client,
    settings: SubscriberSettings,
    shutdown: CancellationToken,
}

enum PumpExit {
    Shutdown,
    ReceiverGone,
    Disconnected,
}

impl RedisEventSubscriber {
    pub fn new(url: &str, settings: SubscriberSettings) -> RedisResult<Self> {
        let client = Client::open(url).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {}", e),
        })?;
        Ok(Self {
            client,
            settings,
            shutdown: CancellationToken::new(),
        })
    }

    /// 停止所有订阅循环，对应的接收端随之关闭
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn connect(client: &Client, patterns: &[String]) -> RedisResult<PubSub> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| RedisError::ConnectionError {
                message: format!("获取 PubSub 连接失败: {}", e),
            })?;

        for pattern in patterns {
            pubsub
                .psubscribe(pattern)
                .await
                .map_err(|e| RedisError::SubscribeError {
                    message: format!("订阅模式 {} 失败: {}", pattern, e),
                })?;
        }

        info!(patterns = patterns.len(), "已订阅 Redis 频道模式");
        Ok(pubsub)
    }

    async fn pump(
        pubsub: PubSub,
        sender: &mpsc::Sender<TransportMessage>,
        shutdown: &CancellationToken,
    ) -> PumpExit {
        let mut messages = pubsub.into_on_message();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return PumpExit::Shutdown,
                _ = sender.closed() => return PumpExit::ReceiverGone,
                next = messages.next() => {
                    let Some(msg) = next else {
                        return PumpExit::Disconnected;
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(channel = msg.get_channel_name(), "无法读取消息负载: {}", e);
                            continue;
                        }
                    };
                    let message = TransportMessage {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    };
                    if sender.send(message).await.is_err() {
                        return PumpExit::ReceiverGone;
                    }
                }
            }
        }
    }

    async fn run(
        client: Client,
        patterns: Vec<String>,
        first: PubSub,
        sender: mpsc::Sender<TransportMessage>,
        settings: SubscriberSettings,
        shutdown: CancellationToken,
    ) {
        let mut pubsub = first;
        loop {
            match Self::pump(pubsub, &sender, &shutdown).await {
                PumpExit::Shutdown | PumpExit::ReceiverGone => break,
                PumpExit::Disconnected => warn!("Redis 订阅连接断开，准备重连"),
            }

            let mut attempt = 0u32;
            pubsub = loop {
                attempt += 1;
                if let Some(max) = settings.max_reconnect_attempts {
                    if attempt > max {
                        error!(attempts = max, "Redis 订阅重连次数耗尽");
                        return;
                    }
                }

                let delay = settings.reconnect.delay_at(attempt);
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                match Self::connect(&client, &patterns).await {
                    Ok(pubsub) => {
                        info!(attempt, "Redis 订阅重连成功");
                        break pubsub;
                    }
                    Err(e) => warn!(attempt, "Redis 订阅重连失败: {}", e),
                }
            };
        }

        debug!("Redis 订阅循环已停止");
    }
}

#[async_trait]
impl EventSubscriber for RedisEventSubscriber {
    async fn subscribe(
        &self,
        patterns: &[String],
    ) -> Result<mpsc::Receiver<TransportMessage>, TransportError> {
        let first = Self::connect(&self.client, patterns).await?;
        let (sender, receiver) = mpsc::channel(self.settings.channel_capacity);

        tokio::spawn(Self::run(
            self.client.clone(),
            patterns.to_vec(),
            first,
            sender,
            self.settings.clone(),
            self.shutdown.clone(),
        ));

        Ok(receiver)
    }
}

impl Drop for RedisEventSubscriber {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
