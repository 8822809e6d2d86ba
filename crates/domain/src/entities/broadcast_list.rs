use serde::{Deserialize, Serialize};

use crate::value_objects::{BroadcastListId, Timestamp, UserId};

/// 广播列表：所有者向一组接收者群发消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastList {
    pub id: BroadcastListId,
    pub owner_id: UserId,
    pub name: String,
    pub recipient_ids: Vec<UserId>,
    pub created_at: Timestamp,
}

impl BroadcastList {
    /// 所有者或接收者
    pub fn has_member(&self, user_id: UserId) -> bool {
        self.owner_id == user_id || self.recipient_ids.contains(&user_id)
    }
}
