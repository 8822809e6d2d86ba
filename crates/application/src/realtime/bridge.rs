//! Pub/Sub → Hub 桥接
//!
//! 进程级的单一订阅：按频道种类的通配模式订阅传输层，每条消息只编码一次
//! 客户端帧，然后交给 Hub 广播。会话移除参与者事件还会撤销被移除者在该
//! 会话频道上的订阅。

use std::sync::Arc;

use domain::{event_types, Channel, ChannelKind, EventEnvelope, RealtimeEvent};
use tracing::{debug, info, warn};

use crate::error::ApplicationResult;
use crate::lifecycle::BackgroundTask;
use crate::realtime::frames::ServerFrame;
use crate::realtime::hub::{BroadcastOutcome, Hub};
use crate::transport::{EventSubscriber, TransportMessage};

/// 桥接订阅的全部通配模式
pub fn channel_patterns() -> Vec<String> {
    ChannelKind::ALL.iter().map(ChannelKind::pattern).collect()
}

pub struct PubSubBridge {
    subscriber: Arc<dyn EventSubscriber>,
    hub: Arc<Hub>,
}

impl PubSubBridge {
    pub fn new(subscriber: Arc<dyn EventSubscriber>, hub: Arc<Hub>) -> Self {
        Self { subscriber, hub }
    }

    /// 建立订阅并启动分发循环
    pub async fn start(self: Arc<Self>) -> ApplicationResult<BackgroundTask> {
        let patterns = channel_patterns();
        let mut messages = self.subscriber.subscribe(&patterns).await?;
        info!(patterns = ?patterns, "pub/sub 桥接已订阅");

        Ok(BackgroundTask::spawn("pubsub-bridge", move |token| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    message = messages.recv() => match message {
                        Some(message) => {
                            self.dispatch(message).await;
                        }
                        None => {
                            warn!("pub/sub 订阅通道已关闭，桥接退出");
                            break;
                        }
                    }
                }
            }
            info!("pub/sub 桥接已停止");
        }))
    }

    /// 处理一条传输层消息
    pub async fn dispatch(&self, message: TransportMessage) -> BroadcastOutcome {
        let channel: Channel = match message.channel.parse() {
            Ok(channel) => channel,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "忽略无法解析频道的消息");
                return BroadcastOutcome::default();
            }
        };

        let envelope: EventEnvelope = match EventEnvelope::from_json(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "忽略无法解析的事件信封");
                return BroadcastOutcome::default();
            }
        };

        let event_value = match serde_json::to_value(&envelope) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "事件信封序列化失败");
                return BroadcastOutcome::default();
            }
        };
        let frame = ServerFrame::Event {
            channel: message.channel.clone(),
            event: event_value,
        };
        let outcome = match frame.encode() {
            Ok(encoded) => self.hub.broadcast(&channel, encoded).await,
            Err(err) => {
                warn!(error = %err, "编码客户端帧失败");
                return BroadcastOutcome::default();
            }
        };
        debug!(
            channel = %channel,
            event_type = %envelope.event_type,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "事件已分发"
        );

        if envelope.event_type == event_types::PARTICIPANT_REMOVED {
            if let Channel::Conversation(_) = channel {
                self.revoke_removed_participant(&channel, &envelope).await;
            }
        }
        outcome
    }

    async fn revoke_removed_participant(&self, channel: &Channel, envelope: &EventEnvelope) {
        let removed = match envelope.decode() {
            Ok(RealtimeEvent::ParticipantRemoved(removed)) => removed,
            Ok(_) => return,
            Err(err) => {
                warn!(error = %err, "解析参与者移除事件失败");
                return;
            }
        };

        let revoked = self.hub.revoke(channel, removed.user_id).await;
        if revoked.is_empty() {
            return;
        }

        let notice = ServerFrame::Unsubscribed {
            channel: channel.to_string(),
        };
        match notice.encode() {
            Ok(frame) => {
                for handle in revoked {
                    handle.try_send(frame.clone());
                }
            }
            Err(err) => warn!(error = %err, "编码取消订阅通知失败"),
        }
    }
}
