//! 实时事件定义
//!
//! `RealtimeEvent` 是一个封闭的事件联合：每个变体对应一个 `event_type` 字符串，
//! Outbox 行中保存的就是该字符串与负载 JSON。Worker 根据 `event_type` 显式解码，
//! 未知类型或负载无法解析都会被视为永久失败。

mod payloads;

pub use payloads::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::channel::Channel;
use crate::errors::{DomainError, DomainResult};

/// 事件类型字符串
pub mod event_types {
    pub const MESSAGE_CREATED: &str = "message.created";
    pub const MESSAGE_READ: &str = "message.read";
    pub const CONVERSATION_CREATED: &str = "conversation.created";
    pub const PARTICIPANT_REMOVED: &str = "conversation.participant_removed";
    pub const TYPING_STARTED: &str = "typing.started";
    pub const TYPING_STOPPED: &str = "typing.stopped";
    pub const PRESENCE_ONLINE: &str = "presence.online";
    pub const PRESENCE_OFFLINE: &str = "presence.offline";
    pub const CALL_INITIATED: &str = "call.initiated";
    pub const CALL_OFFER: &str = "call.offer";
    pub const CALL_ANSWER: &str = "call.answer";
    pub const CALL_ICE: &str = "call.ice";
    pub const CALL_DECLINED: &str = "call.declined";
    pub const CALL_ENDED: &str = "call.ended";
    pub const OUTBOX_DEAD_LETTERED: &str = "outbox.dead_lettered";
}

/// 聚合类型字符串
pub mod aggregate_types {
    pub const MESSAGE: &str = "message";
    pub const CONVERSATION: &str = "conversation";
    pub const USER: &str = "user";
    pub const CALL: &str = "call";
    pub const OUTBOX: &str = "outbox";
}

/// 实时事件
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    MessageCreated(MessageCreated),
    MessageRead(MessageRead),
    ConversationCreated(ConversationCreated),
    ParticipantRemoved(ParticipantRemoved),
    TypingStarted(TypingChanged),
    TypingStopped(TypingChanged),
    PresenceOnline(PresenceChanged),
    PresenceOffline(PresenceChanged),
    CallInitiated(CallInitiated),
    CallOffer(CallSignal),
    CallAnswer(CallSignal),
    CallIce(CallSignal),
    CallDeclined(CallDeclined),
    CallEnded(CallEnded),
    OutboxDeadLettered(OutboxDeadLettered),
}

impl RealtimeEvent {
    pub fn event_type(&self) -> &'static str {
        use event_types::*;
        match self {
            RealtimeEvent::MessageCreated(_) => MESSAGE_CREATED,
            RealtimeEvent::MessageRead(_) => MESSAGE_READ,
            RealtimeEvent::ConversationCreated(_) => CONVERSATION_CREATED,
            RealtimeEvent::ParticipantRemoved(_) => PARTICIPANT_REMOVED,
            RealtimeEvent::TypingStarted(_) => TYPING_STARTED,
            RealtimeEvent::TypingStopped(_) => TYPING_STOPPED,
            RealtimeEvent::PresenceOnline(_) => PRESENCE_ONLINE,
            RealtimeEvent::PresenceOffline(_) => PRESENCE_OFFLINE,
            RealtimeEvent::CallInitiated(_) => CALL_INITIATED,
            RealtimeEvent::CallOffer(_) => CALL_OFFER,
            RealtimeEvent::CallAnswer(_) => CALL_ANSWER,
            RealtimeEvent::CallIce(_) => CALL_ICE,
            RealtimeEvent::CallDeclined(_) => CALL_DECLINED,
            RealtimeEvent::CallEnded(_) => CALL_ENDED,
            RealtimeEvent::OutboxDeadLettered(_) => OUTBOX_DEAD_LETTERED,
        }
    }

    /// 事件所属聚合 `(aggregate_type, aggregate_id)`
    pub fn aggregate(&self) -> (&'static str, Uuid) {
        use aggregate_types::*;
        match self {
            RealtimeEvent::MessageCreated(e) => (MESSAGE, e.message.id.as_uuid()),
            RealtimeEvent::MessageRead(e) => (MESSAGE, e.receipt.message_id.as_uuid()),
            RealtimeEvent::ConversationCreated(e) => (CONVERSATION, e.conversation.id.as_uuid()),
            RealtimeEvent::ParticipantRemoved(e) => (CONVERSATION, e.conversation_id.as_uuid()),
            RealtimeEvent::TypingStarted(e) | RealtimeEvent::TypingStopped(e) => {
                (CONVERSATION, e.conversation_id.as_uuid())
            }
            RealtimeEvent::PresenceOnline(e) | RealtimeEvent::PresenceOffline(e) => {
                (USER, e.user_id.as_uuid())
            }
            RealtimeEvent::CallInitiated(e) => (CALL, e.call.id.as_uuid()),
            RealtimeEvent::CallOffer(e) | RealtimeEvent::CallAnswer(e) | RealtimeEvent::CallIce(e) => {
                (CALL, e.call_id.as_uuid())
            }
            RealtimeEvent::CallDeclined(e) => (CALL, e.call_id.as_uuid()),
            RealtimeEvent::CallEnded(e) => (CALL, e.call_id.as_uuid()),
            RealtimeEvent::OutboxDeadLettered(e) => (OUTBOX, e.event_id),
        }
    }

    /// 事件需要投递到的目标频道
    pub fn channels(&self) -> Vec<Channel> {
        match self {
            RealtimeEvent::MessageCreated(e) => vec![Channel::Conversation(e.message.conversation_id)],
            RealtimeEvent::MessageRead(e) => vec![Channel::Conversation(e.receipt.conversation_id)],
            RealtimeEvent::ConversationCreated(e) => e
                .conversation
                .participant_ids
                .iter()
                .map(|id| Channel::User(*id))
                .collect(),
            RealtimeEvent::ParticipantRemoved(e) => vec![
                Channel::Conversation(e.conversation_id),
                Channel::User(e.user_id),
            ],
            RealtimeEvent::TypingStarted(e) | RealtimeEvent::TypingStopped(e) => {
                vec![Channel::Conversation(e.conversation_id)]
            }
            RealtimeEvent::PresenceOnline(e) | RealtimeEvent::PresenceOffline(e) => {
                vec![Channel::Presence(e.user_id)]
            }
            RealtimeEvent::CallInitiated(e) => e
                .call
                .participant_ids
                .iter()
                .filter(|id| **id != e.call.initiator_id)
                .map(|id| Channel::User(*id))
                .collect(),
            RealtimeEvent::CallOffer(e) | RealtimeEvent::CallAnswer(e) | RealtimeEvent::CallIce(e) => {
                vec![Channel::User(e.to)]
            }
            RealtimeEvent::CallDeclined(e) => {
                vec![Channel::Call(e.call_id), Channel::User(e.initiator_id)]
            }
            RealtimeEvent::CallEnded(e) => {
                let mut channels = vec![Channel::Call(e.call_id)];
                channels.extend(e.participant_ids.iter().map(|id| Channel::User(*id)));
                channels
            }
            RealtimeEvent::OutboxDeadLettered(_) => vec![Channel::system_outbox()],
        }
    }

    /// 负载 JSON
    pub fn payload(&self) -> DomainResult<Value> {
        let value = match self {
            RealtimeEvent::MessageCreated(e) => serde_json::to_value(e),
            RealtimeEvent::MessageRead(e) => serde_json::to_value(e),
            RealtimeEvent::ConversationCreated(e) => serde_json::to_value(e),
            RealtimeEvent::ParticipantRemoved(e) => serde_json::to_value(e),
            RealtimeEvent::TypingStarted(e) | RealtimeEvent::TypingStopped(e) => {
                serde_json::to_value(e)
            }
            RealtimeEvent::PresenceOnline(e) | RealtimeEvent::PresenceOffline(e) => {
                serde_json::to_value(e)
            }
            RealtimeEvent::CallInitiated(e) => serde_json::to_value(e),
            RealtimeEvent::CallOffer(e) | RealtimeEvent::CallAnswer(e) | RealtimeEvent::CallIce(e) => {
                serde_json::to_value(e)
            }
            RealtimeEvent::CallDeclined(e) => serde_json::to_value(e),
            RealtimeEvent::CallEnded(e) => serde_json::to_value(e),
            RealtimeEvent::OutboxDeadLettered(e) => serde_json::to_value(e),
        };
        value.map_err(|e| DomainError::InvalidEventPayload(e.to_string()))
    }

    /// 负载 JSON 文本，写入 Outbox 行
    pub fn payload_json(&self) -> DomainResult<String> {
        self.payload().map(|value| value.to_string())
    }

    /// 根据事件类型解码负载
    pub fn decode(event_type: &str, payload: &str) -> DomainResult<Self> {
        use event_types::*;

        fn parse<T: serde::de::DeserializeOwned>(payload: &str) -> DomainResult<T> {
            serde_json::from_str(payload).map_err(|e| DomainError::InvalidEventPayload(e.to_string()))
        }

        let event = match event_type {
            MESSAGE_CREATED => RealtimeEvent::MessageCreated(parse(payload)?),
            MESSAGE_READ => RealtimeEvent::MessageRead(parse(payload)?),
            CONVERSATION_CREATED => RealtimeEvent::ConversationCreated(parse(payload)?),
            PARTICIPANT_REMOVED => RealtimeEvent::ParticipantRemoved(parse(payload)?),
            TYPING_STARTED => RealtimeEvent::TypingStarted(parse(payload)?),
            TYPING_STOPPED => RealtimeEvent::TypingStopped(parse(payload)?),
            PRESENCE_ONLINE => RealtimeEvent::PresenceOnline(parse(payload)?),
            PRESENCE_OFFLINE => RealtimeEvent::PresenceOffline(parse(payload)?),
            CALL_INITIATED => RealtimeEvent::CallInitiated(parse(payload)?),
            CALL_OFFER => RealtimeEvent::CallOffer(parse(payload)?),
            CALL_ANSWER => RealtimeEvent::CallAnswer(parse(payload)?),
            CALL_ICE => RealtimeEvent::CallIce(parse(payload)?),
            CALL_DECLINED => RealtimeEvent::CallDeclined(parse(payload)?),
            CALL_ENDED => RealtimeEvent::CallEnded(parse(payload)?),
            OUTBOX_DEAD_LETTERED => RealtimeEvent::OutboxDeadLettered(parse(payload)?),
            other => return Err(DomainError::UnknownEventType(other.to_string())),
        };
        Ok(event)
    }

    /// 构建事件信封
    pub fn envelope(&self, occurred_at: DateTime<Utc>) -> DomainResult<EventEnvelope> {
        let (aggregate_type, aggregate_id) = self.aggregate();
        Ok(EventEnvelope {
            event_type: self.event_type().to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            occurred_at,
            payload: self.payload()?,
        })
    }
}

/// 发布到 Pub/Sub 的事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn to_json(&self) -> DomainResult<String> {
        serde_json::to_string(self).map_err(|e| DomainError::InvalidEventPayload(e.to_string()))
    }

    pub fn from_json(raw: &str) -> DomainResult<Self> {
        serde_json::from_str(raw).map_err(|e| DomainError::InvalidEventPayload(e.to_string()))
    }

    /// 还原为强类型事件
    pub fn decode(&self) -> DomainResult<RealtimeEvent> {
        RealtimeEvent::decode(&self.event_type, &self.payload.to_string())
    }
}
