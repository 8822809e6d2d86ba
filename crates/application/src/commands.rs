//! 命令定义
//!
//! `Command` 是封闭的命令联合，总线按 `command_type()` 返回的字符串查找处理器。
//! 各变体的字段校验交给 `validator` 派生完成，额外的业务校验在 `validate` 中补充。

use domain::{
    CallType, ConversationId, MessageId, MessageType, PresenceStatus, UserId, MAX_MESSAGE_LENGTH,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApplicationError, ApplicationResult};

pub mod command_types {
    pub const SEND_MESSAGE: &str = "send_message";
    pub const MARK_MESSAGE_READ: &str = "mark_message_read";
    pub const CREATE_CONVERSATION: &str = "create_conversation";
    pub const REMOVE_PARTICIPANT: &str = "remove_participant";
    pub const INITIATE_CALL: &str = "initiate_call";
    pub const SET_TYPING: &str = "set_typing";
    pub const SET_PRESENCE: &str = "set_presence";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SendMessageCommand {
    pub actor_id: UserId,
    pub conversation_id: ConversationId,
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MarkMessageReadCommand {
    pub actor_id: UserId,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CreateConversationCommand {
    pub actor_id: UserId,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub participant_ids: Vec<UserId>,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RemoveParticipantCommand {
    pub actor_id: UserId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct InitiateCallCommand {
    pub actor_id: UserId,
    pub conversation_id: ConversationId,
    pub call_type: CallType,
    #[serde(default)]
    #[validate(length(max = 128))]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SetTypingCommand {
    pub actor_id: UserId,
    pub conversation_id: ConversationId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SetPresenceCommand {
    pub actor_id: UserId,
    pub status: PresenceStatus,
}

/// 命令联合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    SendMessage(SendMessageCommand),
    MarkMessageRead(MarkMessageReadCommand),
    CreateConversation(CreateConversationCommand),
    RemoveParticipant(RemoveParticipantCommand),
    InitiateCall(InitiateCallCommand),
    SetTyping(SetTypingCommand),
    SetPresence(SetPresenceCommand),
}

impl Command {
    pub fn command_type(&self) -> &'static str {
        use command_types::*;
        match self {
            Command::SendMessage(_) => SEND_MESSAGE,
            Command::MarkMessageRead(_) => MARK_MESSAGE_READ,
            Command::CreateConversation(_) => CREATE_CONVERSATION,
            Command::RemoveParticipant(_) => REMOVE_PARTICIPANT,
            Command::InitiateCall(_) => INITIATE_CALL,
            Command::SetTyping(_) => SET_TYPING,
            Command::SetPresence(_) => SET_PRESENCE,
        }
    }

    pub fn actor_id(&self) -> UserId {
        match self {
            Command::SendMessage(c) => c.actor_id,
            Command::MarkMessageRead(c) => c.actor_id,
            Command::CreateConversation(c) => c.actor_id,
            Command::RemoveParticipant(c) => c.actor_id,
            Command::InitiateCall(c) => c.actor_id,
            Command::SetTyping(c) => c.actor_id,
            Command::SetPresence(c) => c.actor_id,
        }
    }

    /// 幂等键，空字符串视为未提供
    pub fn idempotency_key(&self) -> Option<&str> {
        let key = match self {
            Command::SendMessage(c) => c.idempotency_key.as_deref(),
            Command::MarkMessageRead(c) => c.idempotency_key.as_deref(),
            Command::CreateConversation(c) => c.idempotency_key.as_deref(),
            Command::RemoveParticipant(c) => c.idempotency_key.as_deref(),
            Command::InitiateCall(c) => c.idempotency_key.as_deref(),
            Command::SetTyping(_) | Command::SetPresence(_) => None,
        };
        key.filter(|k| !k.is_empty())
    }

    /// 需要会话成员身份才能执行的命令所针对的会话
    pub fn conversation_scope(&self) -> Option<ConversationId> {
        match self {
            Command::SendMessage(c) => Some(c.conversation_id),
            Command::MarkMessageRead(c) => Some(c.conversation_id),
            Command::RemoveParticipant(c) => Some(c.conversation_id),
            Command::InitiateCall(c) => Some(c.conversation_id),
            Command::SetTyping(c) => Some(c.conversation_id),
            Command::CreateConversation(_) | Command::SetPresence(_) => None,
        }
    }

    pub fn validate(&self) -> ApplicationResult<()> {
        match self {
            Command::SendMessage(c) => {
                c.validate()?;
                if c.content.trim().is_empty() {
                    return Err(ApplicationError::validation("消息内容不能为空"));
                }
                if c.content.chars().count() > MAX_MESSAGE_LENGTH {
                    return Err(ApplicationError::validation("消息内容过长"));
                }
            }
            Command::MarkMessageRead(c) => c.validate()?,
            Command::CreateConversation(c) => {
                c.validate()?;
                if c.participant_ids.iter().all(|id| *id == c.actor_id) {
                    return Err(ApplicationError::validation("会话至少需要一个其他参与者"));
                }
            }
            Command::RemoveParticipant(c) => c.validate()?,
            Command::InitiateCall(c) => c.validate()?,
            Command::SetTyping(c) => c.validate()?,
            Command::SetPresence(c) => c.validate()?,
        }
        Ok(())
    }

    /// 写入命令日志的 JSON
    pub fn to_json(&self) -> ApplicationResult<String> {
        serde_json::to_string(self).map_err(|e| ApplicationError::permanent(e.to_string()))
    }
}

/// 命令执行上下文
#[derive(Debug, Clone, PartialEq)]
pub struct CommandContext {
    /// 已认证的调用者
    pub principal: UserId,
    pub request_id: Option<String>,
}

impl CommandContext {
    pub fn new(principal: UserId) -> Self {
        Self {
            principal,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// 命令执行结果，重放时与首次执行的结果相同
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
}

impl CommandResult {
    pub fn new(command_type: &str, aggregate_type: &str, aggregate_id: Uuid) -> Self {
        Self {
            command_type: command_type.to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
        }
    }
}
