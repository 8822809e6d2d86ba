//! 事件负载结构

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::{CallRecord, Conversation, Message, ReadReceipt};
use crate::value_objects::{CallId, ConversationId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCreated {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRead {
    pub receipt: ReadReceipt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationCreated {
    pub conversation: Conversation,
}

/// 参与者被移出会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRemoved {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub removed_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingChanged {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceChanged {
    pub user_id: UserId,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInitiated {
    pub call: CallRecord,
}

/// WebRTC 信令（offer / answer / ICE），`data` 原样透传
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSignal {
    pub call_id: CallId,
    pub from: UserId,
    pub to: UserId,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallDeclined {
    pub call_id: CallId,
    pub user_id: UserId,
    pub initiator_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnded {
    pub call_id: CallId,
    pub ended_by: UserId,
    pub participant_ids: Vec<UserId>,
}

/// Outbox 事件进入 FAILED 后的运维通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxDeadLettered {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub retry_count: i32,
    pub error: Option<String>,
}
