//! 频道订阅授权
//!
//! 每次订阅时都基于最新数据判断：
//! - `user:{自己}`、`presence:{自己}` 允许
//! - `conversation:{id}` 要求是当前参与者
//! - `call:{id}` 要求是通话参与者
//! - `broadcast:{id}` 要求是列表所有者或接收者
//! - `presence:{他人}` 要求与对方至少共享一个会话
//! - `user:{他人}`、`system:*` 以及无法解析的频道一律拒绝

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Channel, UserId};
use tracing::debug;

use crate::error::ApplicationResult;
use crate::repository::{BroadcastListRepository, CallRepository, ConversationRepository};

#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
    async fn can_subscribe(&self, user_id: UserId, channel: &str) -> ApplicationResult<bool>;
}

pub struct RepositoryChannelAuthorizer {
    conversations: Arc<dyn ConversationRepository>,
    calls: Arc<dyn CallRepository>,
    broadcast_lists: Arc<dyn BroadcastListRepository>,
}

impl RepositoryChannelAuthorizer {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        calls: Arc<dyn CallRepository>,
        broadcast_lists: Arc<dyn BroadcastListRepository>,
    ) -> Self {
        Self {
            conversations,
            calls,
            broadcast_lists,
        }
    }
}

#[async_trait]
impl ChannelAuthorizer for RepositoryChannelAuthorizer {
    async fn can_subscribe(&self, user_id: UserId, channel: &str) -> ApplicationResult<bool> {
        let Ok(parsed) = channel.parse::<Channel>() else {
            debug!(channel, "无法解析的频道，拒绝订阅");
            return Ok(false);
        };

        let allowed = match parsed {
            Channel::User(target) => target == user_id,
            Channel::Presence(target) if target == user_id => true,
            Channel::Presence(target) => {
                self.conversations
                    .share_conversation(user_id, target)
                    .await?
            }
            Channel::Conversation(id) => self.conversations.is_participant(id, user_id).await?,
            Channel::Call(id) => self.calls.is_participant(id, user_id).await?,
            Channel::Broadcast(id) => self.broadcast_lists.is_member(id, user_id).await?,
            Channel::System(_) => false,
        };
        Ok(allowed)
    }
}
