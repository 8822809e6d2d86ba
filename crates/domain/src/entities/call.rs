//! 通话实体
//!
//! `CallRecord` 是持久化到数据库的通话记录；`CallState` 是存放在快速存储中的
//! 临时通话状态，带 TTL，由信令转发器读写。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{CallId, ConversationId, Timestamp, UserId};

/// 通话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Audio,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Audio => "audio",
            CallType::Video => "video",
        }
    }
}

impl FromStr for CallType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(CallType::Audio),
            "video" => Ok(CallType::Video),
            other => Err(DomainError::invalid_argument(
                "call_type",
                format!("未知通话类型: {other}"),
            )),
        }
    }
}

/// 通话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Ringing,
    Connected,
    Ended,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallStatus::Ringing => "RINGING",
            CallStatus::Connected => "CONNECTED",
            CallStatus::Ended => "ENDED",
        };
        f.write_str(s)
    }
}

/// 参与者在通话中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    Invited,
    Joined,
    Declined,
    Left,
}

impl ParticipantState {
    pub fn is_active(&self) -> bool {
        matches!(self, ParticipantState::Invited | ParticipantState::Joined)
    }
}

/// 持久化的通话记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    pub conversation_id: ConversationId,
    pub initiator_id: UserId,
    pub call_type: CallType,
    /// 包含发起者在内的全部受邀用户
    pub participant_ids: Vec<UserId>,
    pub created_at: Timestamp,
}

impl CallRecord {
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participant_ids.contains(&user_id)
    }
}

/// 临时通话状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallState {
    pub call_id: CallId,
    pub conversation_id: ConversationId,
    pub initiator_id: UserId,
    pub call_type: CallType,
    pub status: CallStatus,
    pub participants: BTreeMap<UserId, ParticipantState>,
    pub started_at: Timestamp,
    pub connected_at: Option<Timestamp>,
}

impl CallState {
    /// 根据通话记录构造振铃状态：发起者已加入，其余参与者为受邀。
    pub fn ringing(record: &CallRecord) -> Self {
        let participants = record
            .participant_ids
            .iter()
            .map(|id| {
                let state = if *id == record.initiator_id {
                    ParticipantState::Joined
                } else {
                    ParticipantState::Invited
                };
                (*id, state)
            })
            .collect();

        Self {
            call_id: record.id,
            conversation_id: record.conversation_id,
            initiator_id: record.initiator_id,
            call_type: record.call_type,
            status: CallStatus::Ringing,
            participants,
            started_at: record.created_at,
            connected_at: None,
        }
    }

    /// 用户是否仍在通话中（受邀或已加入）
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants
            .get(&user_id)
            .map(|state| state.is_active())
            .unwrap_or(false)
    }

    pub fn participant_ids(&self) -> Vec<UserId> {
        self.participants.keys().copied().collect()
    }

    /// 接听：受邀者应答后振铃转为已接通，并将应答者标记为已加入。
    /// 发起者不能接通自己发起的振铃。
    pub fn accept(&mut self, user_id: UserId, now: Timestamp) -> DomainResult<()> {
        let initiator_on_ringing =
            self.status == CallStatus::Ringing && user_id == self.initiator_id;
        if self.status == CallStatus::Ended || initiator_on_ringing {
            return Err(DomainError::invalid_transition(
                self.status.to_string(),
                CallStatus::Connected.to_string(),
            ));
        }
        if !self.is_participant(user_id) {
            return Err(DomainError::NotParticipant(user_id.to_string()));
        }

        if self.status == CallStatus::Ringing {
            self.status = CallStatus::Connected;
            self.connected_at = Some(now);
        }
        self.participants.insert(user_id, ParticipantState::Joined);
        Ok(())
    }

    /// 拒接。返回 `true` 表示已没有其他活跃参与者，通话应当结束。
    pub fn decline(&mut self, user_id: UserId) -> DomainResult<bool> {
        if self.status == CallStatus::Ended {
            return Err(DomainError::invalid_transition(
                self.status.to_string(),
                CallStatus::Ended.to_string(),
            ));
        }
        if user_id == self.initiator_id || !self.is_participant(user_id) {
            return Err(DomainError::NotParticipant(user_id.to_string()));
        }

        self.participants.insert(user_id, ParticipantState::Declined);
        let remaining = self
            .participants
            .iter()
            .any(|(id, state)| *id != self.initiator_id && state.is_active());
        Ok(!remaining)
    }

    pub fn end(&mut self) {
        self.status = CallStatus::Ended;
        for state in self.participants.values_mut() {
            if *state == ParticipantState::Joined {
                *state = ParticipantState::Left;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(initiator: UserId, invitees: &[UserId]) -> CallRecord {
        let mut participant_ids = vec![initiator];
        participant_ids.extend_from_slice(invitees);
        CallRecord {
            id: CallId::new(),
            conversation_id: ConversationId::new(),
            initiator_id: initiator,
            call_type: CallType::Video,
            participant_ids,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ringing_state() {
        let alice = UserId::new();
        let bob = UserId::new();
        let state = CallState::ringing(&record(alice, &[bob]));

        assert_eq!(state.status, CallStatus::Ringing);
        assert_eq!(state.participants[&alice], ParticipantState::Joined);
        assert_eq!(state.participants[&bob], ParticipantState::Invited);
        assert!(state.is_participant(bob));
    }

    #[test]
    fn test_accept_connects_call() {
        let alice = UserId::new();
        let bob = UserId::new();
        let mut state = CallState::ringing(&record(alice, &[bob]));

        state.accept(bob, Utc::now()).unwrap();
        assert_eq!(state.status, CallStatus::Connected);
        assert!(state.connected_at.is_some());
        assert_eq!(state.participants[&bob], ParticipantState::Joined);
    }

    #[test]
    fn test_initiator_cannot_accept_own_ringing_call() {
        let alice = UserId::new();
        let bob = UserId::new();
        let mut state = CallState::ringing(&record(alice, &[bob]));

        assert!(matches!(
            state.accept(alice, Utc::now()),
            Err(DomainError::InvalidTransition { .. })
        ));
        assert_eq!(state.status, CallStatus::Ringing);
        assert!(state.connected_at.is_none());
        assert_eq!(state.participants[&bob], ParticipantState::Invited);
    }

    #[test]
    fn test_declined_invitee_cannot_accept() {
        let alice = UserId::new();
        let bob = UserId::new();
        let carol = UserId::new();
        let mut state = CallState::ringing(&record(alice, &[bob, carol]));
        state.decline(bob).unwrap();

        assert!(matches!(
            state.accept(bob, Utc::now()),
            Err(DomainError::NotParticipant(_))
        ));
        assert_eq!(state.status, CallStatus::Ringing);
    }

    #[test]
    fn test_accept_after_end_is_rejected() {
        let alice = UserId::new();
        let bob = UserId::new();
        let mut state = CallState::ringing(&record(alice, &[bob]));
        state.end();

        assert!(matches!(
            state.accept(bob, Utc::now()),
            Err(DomainError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_decline_last_invitee_ends_call() {
        let alice = UserId::new();
        let bob = UserId::new();
        let carol = UserId::new();
        let mut state = CallState::ringing(&record(alice, &[bob, carol]));

        assert!(!state.decline(bob).unwrap());
        assert!(state.decline(carol).unwrap());
        assert!(!state.is_participant(bob));
    }

    #[test]
    fn test_initiator_cannot_decline() {
        let alice = UserId::new();
        let bob = UserId::new();
        let mut state = CallState::ringing(&record(alice, &[bob]));
        assert!(state.decline(alice).is_err());
    }
}
