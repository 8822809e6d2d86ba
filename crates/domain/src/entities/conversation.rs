//! 会话实体

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, Timestamp, UserId};

const MAX_TITLE_LENGTH: usize = 200;

/// 会话（单聊或群聊）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: Option<String>,
    pub created_by: UserId,
    /// 当前参与者，包含创建者
    pub participant_ids: Vec<UserId>,
    pub created_at: Timestamp,
}

impl Conversation {
    /// 创建会话。创建者总是参与者，重复成员会被去除。
    pub fn new(
        id: ConversationId,
        title: Option<String>,
        created_by: UserId,
        members: &[UserId],
        created_at: Timestamp,
    ) -> DomainResult<Self> {
        let title = title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if let Some(ref t) = title {
            if t.chars().count() > MAX_TITLE_LENGTH {
                return Err(DomainError::invalid_argument("title", "会话标题过长"));
            }
        }

        let mut participant_ids = vec![created_by];
        for member in members {
            if !participant_ids.contains(member) {
                participant_ids.push(*member);
            }
        }

        if participant_ids.len() < 2 {
            return Err(DomainError::invalid_argument(
                "participant_ids",
                "会话至少需要两个参与者",
            ));
        }

        Ok(Self {
            id,
            title,
            created_by,
            participant_ids,
            created_at,
        })
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }

    /// 移除参与者
    pub fn remove_participant(&mut self, user_id: UserId) -> DomainResult<()> {
        let before = self.participant_ids.len();
        self.participant_ids.retain(|id| *id != user_id);
        if self.participant_ids.len() == before {
            return Err(DomainError::NotParticipant(user_id.to_string()));
        }
        Ok(())
    }
}
