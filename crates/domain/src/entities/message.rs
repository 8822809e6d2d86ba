//! 消息实体定义

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 单条消息内容的最大字符数
pub const MAX_MESSAGE_LENGTH: usize = 4000;

/// 消息类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// 文本消息
    #[default]
    Text,
    /// 图片消息，内容为对象存储地址
    Image,
    /// 文件消息
    File,
    /// 系统消息
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "system" => Ok(MessageType::System),
            other => Err(DomainError::invalid_argument(
                "message_type",
                format!("未知消息类型: {other}"),
            )),
        }
    }
}

/// 消息实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub message_type: MessageType,
    pub content: String,
    pub created_at: Timestamp,
}

impl Message {
    /// 创建新消息
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        message_type: MessageType,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(DomainError::invalid_argument("content", "消息内容不能为空"));
        }
        if content.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(DomainError::invalid_argument(
                "content",
                format!("消息内容不能超过{MAX_MESSAGE_LENGTH}个字符"),
            ));
        }

        Ok(Self {
            id,
            conversation_id,
            sender_id,
            message_type,
            content,
            created_at,
        })
    }
}

/// 已读回执
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub read_at: Timestamp,
}
