//! 逻辑频道
//!
//! 频道是 Pub/Sub 与 WebSocket Hub 共用的路由键，字符串形式为 `前缀:标识`。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::value_objects::{BroadcastListId, CallId, ConversationId, UserId};

/// 频道种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Conversation,
    User,
    Presence,
    Call,
    Broadcast,
    System,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 6] = [
        ChannelKind::Conversation,
        ChannelKind::User,
        ChannelKind::Presence,
        ChannelKind::Call,
        ChannelKind::Broadcast,
        ChannelKind::System,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            ChannelKind::Conversation => "conversation",
            ChannelKind::User => "user",
            ChannelKind::Presence => "presence",
            ChannelKind::Call => "call",
            ChannelKind::Broadcast => "broadcast",
            ChannelKind::System => "system",
        }
    }

    /// 该种类频道的订阅通配模式，例如 `conversation:*`
    pub fn pattern(&self) -> String {
        format!("{}:*", self.prefix())
    }
}

/// 逻辑频道
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Conversation(ConversationId),
    User(UserId),
    Presence(UserId),
    Call(CallId),
    Broadcast(BroadcastListId),
    System(String),
}

impl Channel {
    /// Outbox 死信通知频道
    pub const SYSTEM_OUTBOX: &'static str = "system:outbox";

    pub fn system_outbox() -> Self {
        Channel::System("outbox".to_string())
    }

    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::Conversation(_) => ChannelKind::Conversation,
            Channel::User(_) => ChannelKind::User,
            Channel::Presence(_) => ChannelKind::Presence,
            Channel::Call(_) => ChannelKind::Call,
            Channel::Broadcast(_) => ChannelKind::Broadcast,
            Channel::System(_) => ChannelKind::System,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.kind().prefix();
        match self {
            Channel::Conversation(id) => write!(f, "{prefix}:{id}"),
            Channel::User(id) | Channel::Presence(id) => write!(f, "{prefix}:{id}"),
            Channel::Call(id) => write!(f, "{prefix}:{id}"),
            Channel::Broadcast(id) => write!(f, "{prefix}:{id}"),
            Channel::System(name) => write!(f, "{prefix}:{name}"),
        }
    }
}

impl FromStr for Channel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = s
            .split_once(':')
            .ok_or_else(|| DomainError::InvalidChannel(s.to_string()))?;
        if rest.is_empty() {
            return Err(DomainError::InvalidChannel(s.to_string()));
        }

        if prefix == ChannelKind::System.prefix() {
            let valid = rest
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            return if valid {
                Ok(Channel::System(rest.to_string()))
            } else {
                Err(DomainError::InvalidChannel(s.to_string()))
            };
        }

        let id = Uuid::parse_str(rest).map_err(|_| DomainError::InvalidChannel(s.to_string()))?;
        match prefix {
            "conversation" => Ok(Channel::Conversation(id.into())),
            "user" => Ok(Channel::User(id.into())),
            "presence" => Ok(Channel::Presence(id.into())),
            "call" => Ok(Channel::Call(id.into())),
            "broadcast" => Ok(Channel::Broadcast(id.into())),
            _ => Err(DomainError::InvalidChannel(s.to_string())),
        }
    }
}

impl Serialize for Channel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trip_for_every_kind() {
        let user = UserId::new();
        let channels = vec![
            Channel::Conversation(ConversationId::new()),
            Channel::User(user),
            Channel::Presence(user),
            Channel::Call(CallId::new()),
            Channel::Broadcast(BroadcastListId::new()),
            Channel::system_outbox(),
        ];

        for channel in channels {
            let parsed: Channel = channel.to_string().parse().unwrap();
            assert_eq!(parsed, channel);
        }
    }

    #[test]
    fn test_channel_string_form() {
        let id = UserId::new();
        assert_eq!(Channel::User(id).to_string(), format!("user:{id}"));
        assert_eq!(Channel::system_outbox().to_string(), Channel::SYSTEM_OUTBOX);
    }

    #[test]
    fn test_channel_parse_rejects_malformed_input() {
        assert!("room:123".parse::<Channel>().is_err());
        assert!("conversation:not-a-uuid".parse::<Channel>().is_err());
        assert!("conversation:".parse::<Channel>().is_err());
        assert!("user".parse::<Channel>().is_err());
        assert!("system:a b".parse::<Channel>().is_err());
    }

    #[test]
    fn test_channel_kind_patterns() {
        let patterns: Vec<String> = ChannelKind::ALL.iter().map(|k| k.pattern()).collect();
        assert!(patterns.contains(&"conversation:*".to_string()));
        assert!(patterns.contains(&"system:*".to_string()));
        assert_eq!(patterns.len(), 6);
    }
}
